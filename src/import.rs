use crate::attribute::{code_table, AttributeCodeTable};
use crate::catalog::{CatalogAdapter, ProductFields, ProductId};
use crate::error::ImportError;
use crate::progress::ProgressStore;
use anyhow::anyhow;
use catalog_types::group::ProductGroup;
use catalog_types::Stage;
use itertools::Itertools;
use log_error::LogError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageMode {
    #[default]
    Append,
    Replace,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Tag written next to every sku this importer completes.
    pub supplier: Option<String>,
    pub image_mode: ImageMode,
    pub featured_image_index: usize,
    pub max_images: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRequest {
    pub stage: Stage,
    pub batch_size: usize,
    pub offset: usize,
    #[serde(default)]
    pub force_update: bool,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub processed: usize,
    pub imported: usize,
    pub skipped: usize,
    pub errors: usize,
    /// `None` once the stage has no groups left past this batch.
    pub next_offset: Option<usize>,
    pub cancelled: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: Stage,
    pub batches: usize,
    pub processed: usize,
    pub imported: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl StageReport {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            batches: 0,
            processed: 0,
            imported: 0,
            skipped: 0,
            errors: 0,
        }
    }

    fn absorb(&mut self, batch: &BatchResult) {
        self.batches += 1;
        self.processed += batch.processed;
        self.imported += batch.imported;
        self.skipped += batch.skipped;
        self.errors += batch.errors;
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
    pub cancelled: bool,
}

enum Outcome {
    Imported,
    AlreadyDone,
}

pub struct Importer {
    catalog: Arc<dyn CatalogAdapter>,
    progress: Arc<dyn ProgressStore>,
    codes: &'static AttributeCodeTable,
    options: ImportOptions,
}

impl Importer {
    pub fn new(
        catalog: Arc<dyn CatalogAdapter>,
        progress: Arc<dyn ProgressStore>,
        options: ImportOptions,
    ) -> Self {
        Self {
            catalog,
            progress,
            codes: code_table(),
            options,
        }
    }

    /// Processes `request.batch_size` groups starting at `request.offset`.
    ///
    /// Failures of single groups are counted and logged, never propagated.
    /// Cancellation is checked before each group, so a group is either fully
    /// processed or not touched.
    pub async fn run_batch(
        &self,
        groups: &[ProductGroup],
        request: &BatchRequest,
        token: &CancellationToken,
    ) -> BatchResult {
        let total = groups.len();
        let start = request.offset.min(total);
        let end = start.saturating_add(request.batch_size.max(1)).min(total);
        let mut result = BatchResult::default();
        for group in &groups[start..end] {
            if token.is_cancelled() {
                log::warn!("Stage {} cancelled at offset {}", request.stage, start + result.processed);
                result.cancelled = true;
                break;
            }
            result.processed += 1;
            match self.process(group, request).await {
                Ok(Outcome::Imported) => result.imported += 1,
                Ok(Outcome::AlreadyDone) => result.skipped += 1,
                Err(err) if err.is_precondition() => {
                    log::info!("{err}");
                    result.skipped += 1;
                }
                Err(err) => {
                    log::error!("Stage {} failed for {}: {err}", request.stage, group.base_sku);
                    result.errors += 1;
                }
            }
        }
        let reached = start + result.processed;
        result.next_offset = (reached < total).then_some(reached);
        log::info!(
            "Stage {} batch {}..{reached} of {total}: {} imported, {} skipped, {} errors",
            request.stage,
            start,
            result.imported,
            result.skipped,
            result.errors,
        );
        result
    }

    /// Runs every stage in order, batch by batch, until each reports no more work.
    pub async fn run_all(
        &self,
        groups: &[ProductGroup],
        batch_size: usize,
        force_update: bool,
        token: &CancellationToken,
    ) -> RunReport {
        let mut report = RunReport::default();
        for stage in Stage::ALL {
            let mut stage_report = StageReport::new(stage);
            let mut offset = Some(0);
            while let Some(o) = offset {
                let request = BatchRequest {
                    stage,
                    batch_size,
                    offset: o,
                    force_update,
                };
                let batch = self.run_batch(groups, &request, token).await;
                stage_report.absorb(&batch);
                if batch.cancelled {
                    report.cancelled = true;
                    break;
                }
                offset = batch.next_offset;
            }
            report.stages.push(stage_report);
            if report.cancelled {
                break;
            }
        }
        report
    }

    async fn process(&self, group: &ProductGroup, request: &BatchRequest) -> Result<Outcome, ImportError> {
        let sku = group.base_sku.as_str();
        let stage = request.stage;
        if let Some(required) = stage.previous() {
            let done = self
                .progress
                .is_done(sku, required)
                .await
                .map_err(ImportError::adapter(sku))?;
            if !done {
                return Err(ImportError::Precondition {
                    sku: sku.to_string(),
                    stage,
                    required,
                });
            }
        }
        if !request.force_update
            && self
                .progress
                .is_done(sku, stage)
                .await
                .map_err(ImportError::adapter(sku))?
        {
            return Ok(Outcome::AlreadyDone);
        }
        match stage {
            Stage::Basic => self.import_basic(group).await,
            Stage::Attributes => self.import_attributes(group).await,
            Stage::Images => self.import_images(group).await,
        }
        .map_err(ImportError::adapter(sku))?;
        self.progress
            .mark_done(sku, stage, self.options.supplier.as_deref())
            .await
            .map_err(ImportError::adapter(sku))?;
        Ok(Outcome::Imported)
    }

    async fn product_id(&self, sku: &str) -> anyhow::Result<ProductId> {
        self.catalog
            .find_product_id_by_sku(sku)
            .await?
            .ok_or_else(|| anyhow!("Product {sku} not found in catalog"))
    }

    async fn import_basic(&self, group: &ProductGroup) -> anyhow::Result<()> {
        let record = &group.main_record;
        let existing = self.catalog.find_product_id_by_sku(&record.sku).await?;
        let id = self
            .catalog
            .create_or_update_product(existing, &ProductFields::from(record))
            .await?;
        self.catalog.set_categories(id, &record.categories).await?;
        Ok(())
    }

    async fn import_attributes(&self, group: &ProductGroup) -> anyhow::Result<()> {
        let id = self.product_id(&group.base_sku).await?;
        if !group.is_variable() {
            return Ok(());
        }
        self.catalog.convert_to_variable(id).await?;

        let records = || std::iter::once(&group.main_record).chain(group.variants.iter().map(|v| &v.record));
        let color_options = records()
            .flat_map(|r| self.codes.allowed_colors(r))
            .unique()
            .collect::<Vec<_>>();
        let size_options = records()
            .flat_map(|r| self.codes.allowed_sizes(r))
            .unique()
            .collect::<Vec<_>>();

        let colors = self
            .ensure_terms(
                self.attribute_name(&self.codes.color_attribute_names, "Kolor"),
                group.color_codes(),
                |code| self.codes.decode_color(code, &color_options),
            )
            .await?;
        let sizes = self
            .ensure_terms(
                self.attribute_name(&self.codes.size_attribute_names, "Rozmiar"),
                group.size_codes(),
                |code| self.codes.decode_size(code, &size_options),
            )
            .await?;

        for variant in &group.variants {
            let mut attributes = Vec::new();
            let codes = [
                (&colors, &variant.matched.color_code),
                (&sizes, &variant.matched.size_code),
            ];
            for (decoded, code) in codes {
                if let (Some((slug, values)), Some(code)) = (decoded, code) {
                    if let Some(value) = values.get(code) {
                        attributes.push((slug.clone(), value.clone()));
                    }
                }
            }
            self.catalog
                .create_variation(
                    id,
                    &variant.record.sku,
                    &attributes,
                    &ProductFields::from(&variant.record),
                )
                .await?;
        }
        Ok(())
    }

    fn attribute_name<'a>(&self, names: &'a [String], fallback: &'a str) -> &'a str {
        names.first().map(String::as_str).unwrap_or(fallback)
    }

    /// Creates the taxonomy and one term per code. Returns the taxonomy slug
    /// and the display value chosen for every code, or `None` for no codes.
    async fn ensure_terms<F>(
        &self,
        taxonomy: &str,
        codes: Vec<&str>,
        decode: F,
    ) -> anyhow::Result<Option<(String, HashMap<String, String>)>>
    where
        F: Fn(&str) -> String + Send + Sync,
    {
        if codes.is_empty() {
            return Ok(None);
        }
        let handle = self.catalog.ensure_attribute_taxonomy(taxonomy).await?;
        let mut values = HashMap::new();
        for code in codes {
            let value = decode(code);
            self.catalog.ensure_term(&handle, code, &value).await?;
            values.insert(code.to_string(), value);
        }
        Ok(Some((handle.slug, values)))
    }

    async fn import_images(&self, group: &ProductGroup) -> anyhow::Result<()> {
        let id = self.product_id(&group.base_sku).await?;
        let mut images: Vec<&String> = group.merged_images.iter().collect();
        if let Some(max) = self.options.max_images {
            images.truncate(max);
        }
        if self.options.image_mode == ImageMode::Replace {
            let removed = self.catalog.clear_assets(id).await?;
            log::debug!("Removed {removed} images of {}", group.base_sku);
        }
        if images.is_empty() {
            return Ok(());
        }
        let featured = if self.options.featured_image_index < images.len() {
            self.options.featured_image_index
        } else {
            0
        };
        self.catalog.import_asset(images[featured], id, true).await?;
        for (i, url) in images.iter().enumerate() {
            if i == featured {
                continue;
            }
            self.catalog
                .import_asset(url, id, false)
                .await
                .log_error(&format!("Unable to import image {url} for {}", group.base_sku));
        }

        for variant in &group.variants {
            let Some(url) = variant.record.images.first() else {
                continue;
            };
            let Some(variation) = self
                .catalog
                .find_product_id_by_sku(&variant.record.sku)
                .await?
            else {
                log::warn!("Variation {} not found, image skipped", variant.record.sku);
                continue;
            };
            if self.options.image_mode == ImageMode::Replace {
                self.catalog.clear_assets(variation).await?;
            }
            self.catalog
                .import_asset(url, variation, true)
                .await
                .log_error(&format!("Unable to import image {url} for {}", variant.record.sku));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{
        AssetId, InMemoryCatalog, TaxonomyHandle, TermId, VariationAttributes,
    };
    use crate::grouping::group;
    use crate::progress::InMemoryProgressStore;
    use crate::sku::SafetyValve;
    use async_trait::async_trait;
    use catalog_types::product::{CategoryPath, ProductAttribute, ProductRecord};
    use rust_decimal_macros::dec;
    use tokio::sync::RwLock;

    /// Delegates to an in-memory catalog but refuses to save listed skus.
    struct FailingCatalog {
        inner: InMemoryCatalog,
        failing: RwLock<Vec<String>>,
    }

    impl FailingCatalog {
        fn new(failing: &[&str]) -> Self {
            Self {
                inner: InMemoryCatalog::default(),
                failing: RwLock::new(failing.iter().map(ToString::to_string).collect()),
            }
        }

        async fn check(&self, sku: &str) -> anyhow::Result<()> {
            if self.failing.read().await.iter().any(|s| s == sku) {
                return Err(anyhow!("save of {sku} rejected"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CatalogAdapter for FailingCatalog {
        async fn find_product_id_by_sku(&self, sku: &str) -> anyhow::Result<Option<ProductId>> {
            self.inner.find_product_id_by_sku(sku).await
        }

        async fn create_or_update_product(
            &self,
            id: Option<ProductId>,
            fields: &ProductFields,
        ) -> anyhow::Result<ProductId> {
            self.check(&fields.sku).await?;
            self.inner.create_or_update_product(id, fields).await
        }

        async fn set_categories(&self, id: ProductId, path: &CategoryPath) -> anyhow::Result<Vec<TermId>> {
            self.inner.set_categories(id, path).await
        }

        async fn ensure_attribute_taxonomy(&self, name: &str) -> anyhow::Result<TaxonomyHandle> {
            self.inner.ensure_attribute_taxonomy(name).await
        }

        async fn ensure_term(
            &self,
            taxonomy: &TaxonomyHandle,
            code: &str,
            display_value: &str,
        ) -> anyhow::Result<TermId> {
            self.inner.ensure_term(taxonomy, code, display_value).await
        }

        async fn convert_to_variable(&self, id: ProductId) -> anyhow::Result<()> {
            self.inner.convert_to_variable(id).await
        }

        async fn create_variation(
            &self,
            parent: ProductId,
            sku: &str,
            attributes: &VariationAttributes,
            fields: &ProductFields,
        ) -> anyhow::Result<ProductId> {
            self.check(sku).await?;
            self.inner.create_variation(parent, sku, attributes, fields).await
        }

        async fn import_asset(&self, url: &str, owner: ProductId, is_primary: bool) -> anyhow::Result<AssetId> {
            self.inner.import_asset(url, owner, is_primary).await
        }

        async fn clear_assets(&self, owner: ProductId) -> anyhow::Result<usize> {
            self.inner.clear_assets(owner).await
        }
    }

    fn record(sku: &str, images: &[&str]) -> ProductRecord {
        let mut record = ProductRecord::new(sku);
        record.name = format!("Product {sku}");
        record.regular_price = Some(dec!(10.00));
        record.stock_quantity = Some(1);
        record.categories = CategoryPath::from_segments(["Dom", "Ogród"]);
        record.images = images.iter().map(ToString::to_string).collect();
        record
    }

    fn groups(records: Vec<ProductRecord>) -> Vec<ProductGroup> {
        group(records, &SafetyValve::default()).groups
    }

    fn request(stage: Stage) -> BatchRequest {
        BatchRequest {
            stage,
            batch_size: 10,
            offset: 0,
            force_update: false,
        }
    }

    #[tokio::test]
    async fn failing_record_does_not_abort_batch() {
        let catalog = Arc::new(FailingCatalog::new(&["B"]));
        let progress = Arc::new(InMemoryProgressStore::default());
        let importer = Importer::new(catalog.clone(), progress.clone(), ImportOptions::default());
        let groups = groups(vec![record("A", &[]), record("B", &[]), record("C", &[])]);
        let result = importer
            .run_batch(&groups, &request(Stage::Basic), &CancellationToken::new())
            .await;
        assert_eq!(
            result,
            BatchResult {
                processed: 3,
                imported: 2,
                skipped: 0,
                errors: 1,
                next_offset: None,
                cancelled: false,
            }
        );
        assert!(progress.is_done("A", Stage::Basic).await.unwrap());
        assert!(!progress.is_done("B", Stage::Basic).await.unwrap());
        assert!(progress.is_done("C", Stage::Basic).await.unwrap());
        assert!(catalog.inner.product("B").await.is_none());
    }

    #[tokio::test]
    async fn rejected_variation_leaves_stage_open_until_retry() {
        let catalog = Arc::new(FailingCatalog::new(&["ABC123-02"]));
        let progress = Arc::new(InMemoryProgressStore::default());
        let importer = Importer::new(catalog.clone(), progress.clone(), ImportOptions::default());
        let groups = groups(vec![
            record("ABC123", &[]),
            record("ABC123-01", &[]),
            record("ABC123-02", &[]),
        ]);
        let token = CancellationToken::new();
        assert_eq!(importer.run_batch(&groups, &request(Stage::Basic), &token).await.imported, 1);

        let failed = importer.run_batch(&groups, &request(Stage::Attributes), &token).await;
        assert_eq!((failed.processed, failed.imported, failed.errors), (1, 0, 1));
        assert!(!progress.is_done("ABC123", Stage::Attributes).await.unwrap());
        let blocked = importer.run_batch(&groups, &request(Stage::Images), &token).await;
        assert_eq!((blocked.skipped, blocked.errors), (1, 0));

        catalog.failing.write().await.clear();
        let retried = importer.run_batch(&groups, &request(Stage::Attributes), &token).await;
        assert_eq!((retried.imported, retried.errors), (1, 0));
        assert!(progress.is_done("ABC123", Stage::Attributes).await.unwrap());
        let main = catalog.inner.product("ABC123").await.unwrap();
        let variations = catalog
            .inner
            .variations_of(main.id)
            .await
            .into_iter()
            .map(|v| v.fields.sku)
            .collect::<Vec<_>>();
        assert_eq!(variations, vec!["ABC123-01", "ABC123-02"]);
        assert_eq!(catalog.inner.len().await, 3);
    }

    #[tokio::test]
    async fn nested_parent_stays_a_top_level_product() {
        let catalog = Arc::new(InMemoryCatalog::default());
        let importer = Importer::new(
            catalog.clone(),
            Arc::new(InMemoryProgressStore::default()),
            ImportOptions::default(),
        );
        let groups = groups(vec![
            record("KP", &[]),
            record("KP-10", &[]),
            record("KP-10-01", &[]),
            record("KP-10-02", &[]),
        ]);
        let report = importer.run_all(&groups, 10, false, &CancellationToken::new()).await;
        assert!(report.stages.iter().all(|s| s.errors == 0));

        let parent = catalog.product("KP-10").await.unwrap();
        assert_eq!(parent.parent, None);
        assert!(parent.variable);
        assert_eq!(catalog.variations_of(parent.id).await.len(), 2);
        let kp = catalog.product("KP").await.unwrap();
        assert!(!kp.variable);
        assert!(catalog.variations_of(kp.id).await.is_empty());
    }

    #[tokio::test]
    async fn second_run_skips_done_records() {
        let catalog = Arc::new(InMemoryCatalog::default());
        let progress = Arc::new(InMemoryProgressStore::default());
        let importer = Importer::new(catalog.clone(), progress, ImportOptions::default());
        let groups = groups(vec![record("A", &[]), record("B", &[])]);
        let token = CancellationToken::new();
        let first = importer.run_batch(&groups, &request(Stage::Basic), &token).await;
        assert_eq!(first.imported, 2);
        let second = importer.run_batch(&groups, &request(Stage::Basic), &token).await;
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped, 2);
        let forced = BatchRequest {
            force_update: true,
            ..request(Stage::Basic)
        };
        assert_eq!(importer.run_batch(&groups, &forced, &token).await.imported, 2);
        assert_eq!(catalog.len().await, 2);
    }

    #[tokio::test]
    async fn stage_without_previous_is_skipped() {
        let catalog = Arc::new(InMemoryCatalog::default());
        let progress = Arc::new(InMemoryProgressStore::default());
        let importer = Importer::new(catalog, progress.clone(), ImportOptions::default());
        let groups = groups(vec![record("A", &[])]);
        let result = importer
            .run_batch(&groups, &request(Stage::Attributes), &CancellationToken::new())
            .await;
        assert_eq!(result.skipped, 1);
        assert_eq!(result.errors, 0);
        assert!(!progress.is_done("A", Stage::Attributes).await.unwrap());
    }

    #[tokio::test]
    async fn batches_advance_offset() {
        let importer = Importer::new(
            Arc::new(InMemoryCatalog::default()),
            Arc::new(InMemoryProgressStore::default()),
            ImportOptions::default(),
        );
        let groups = groups(vec![record("A", &[]), record("B", &[]), record("C", &[])]);
        let token = CancellationToken::new();
        let mut req = BatchRequest {
            batch_size: 2,
            ..request(Stage::Basic)
        };
        let first = importer.run_batch(&groups, &req, &token).await;
        assert_eq!(first.processed, 2);
        assert_eq!(first.next_offset, Some(2));
        req.offset = 2;
        let second = importer.run_batch(&groups, &req, &token).await;
        assert_eq!(second.processed, 1);
        assert_eq!(second.next_offset, None);
        req.offset = 7;
        let past = importer.run_batch(&groups, &req, &token).await;
        assert_eq!(past, BatchResult::default());
    }

    #[tokio::test]
    async fn cancelled_batch_reports_resume_offset() {
        let importer = Importer::new(
            Arc::new(InMemoryCatalog::default()),
            Arc::new(InMemoryProgressStore::default()),
            ImportOptions::default(),
        );
        let groups = groups(vec![record("A", &[]), record("B", &[])]);
        let token = CancellationToken::new();
        token.cancel();
        let result = importer.run_batch(&groups, &request(Stage::Basic), &token).await;
        assert!(result.cancelled);
        assert_eq!(result.processed, 0);
        assert_eq!(result.next_offset, Some(0));
    }

    #[tokio::test]
    async fn full_run_builds_variable_product() {
        let catalog = Arc::new(InMemoryCatalog::default());
        let progress = Arc::new(InMemoryProgressStore::default());
        let options = ImportOptions {
            supplier: Some("anda".to_string()),
            featured_image_index: 1,
            ..Default::default()
        };
        let importer = Importer::new(catalog.clone(), progress.clone(), options);

        let mut base = record("ABC123", &["https://cdn.example.com/main.jpg"]);
        base.attributes.push(ProductAttribute {
            name: "Kolor".to_string(),
            values: vec!["Blue".to_string()],
            variation: true,
        });
        let groups = groups(vec![
            base,
            record("ABC123-04", &["https://cdn.example.com/blue.jpg"]),
            record("ABC123-01_M", &["https://cdn.example.com/white.jpg"]),
            record("STANDALONE", &[]),
        ]);
        let report = importer
            .run_all(&groups, 1, false, &CancellationToken::new())
            .await;
        assert!(!report.cancelled);
        assert_eq!(report.stages.len(), 3);
        assert!(report.stages.iter().all(|s| s.errors == 0 && s.imported == 2));

        let main = catalog.product("ABC123").await.unwrap();
        assert!(main.variable);
        assert_eq!(main.categories.len(), 2);
        let variations = catalog.variations_of(main.id).await;
        assert_eq!(variations.len(), 2);
        assert_eq!(variations[0].attributes, vec![("pa_kolor".to_string(), "Blue".to_string())]);
        assert_eq!(
            variations[1].attributes,
            vec![
                ("pa_kolor".to_string(), "Biały".to_string()),
                ("pa_rozmiar".to_string(), "M".to_string()),
            ]
        );

        let assets = catalog.assets_of(main.id).await;
        assert_eq!(assets.len(), 3);
        assert_eq!(assets[0].url, "https://cdn.example.com/blue.jpg");
        assert!(assets[0].is_primary);
        assert_eq!(catalog.assets_of(variations[0].id).await.len(), 1);
        assert!(!catalog.product("STANDALONE").await.unwrap().variable);
        assert_eq!(progress.supplier_of("ABC123").await.unwrap().as_deref(), Some("anda"));
    }

    #[tokio::test]
    async fn replace_mode_clears_previous_images() {
        let catalog = Arc::new(InMemoryCatalog::default());
        let progress = Arc::new(InMemoryProgressStore::default());
        let options = ImportOptions {
            image_mode: ImageMode::Replace,
            featured_image_index: 5,
            max_images: Some(1),
            ..Default::default()
        };
        let importer = Importer::new(catalog.clone(), progress, options);
        let groups = groups(vec![record(
            "A",
            &["https://cdn.example.com/1.jpg", "https://cdn.example.com/2.jpg"],
        )]);
        let token = CancellationToken::new();
        importer.run_all(&groups, 10, false, &token).await;
        let id = catalog.find_product_id_by_sku("A").await.unwrap().unwrap();
        catalog
            .import_asset("https://cdn.example.com/old.jpg", id, false)
            .await
            .unwrap();
        let forced = BatchRequest {
            force_update: true,
            ..request(Stage::Images)
        };
        assert_eq!(importer.run_batch(&groups, &forced, &token).await.imported, 1);
        let assets = catalog.assets_of(id).await;
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].url, "https://cdn.example.com/1.jpg");
        assert!(assets[0].is_primary);
    }
}
