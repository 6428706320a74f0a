use anyhow::{anyhow, Context};
use async_trait::async_trait;
use catalog_types::product::{CategoryPath, Dimensions, ProductRecord};
use catalog_types::StockStatus;
use lazy_regex::regex;
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio_rusqlite::Connection;
use url::Url;
use xxhash_rust::xxh3::xxh3_64;

pub type ProductId = i64;
pub type TermId = i64;
pub type AssetId = i64;

const CATEGORY_TAXONOMY: &str = "product_cat";

/// Fields written by stage 1 and for every variation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductFields {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub regular_price: Option<Decimal>,
    pub sale_price: Option<Decimal>,
    pub stock_quantity: Option<i64>,
    pub stock_status: StockStatus,
    pub dimensions: Dimensions,
}

impl From<&ProductRecord> for ProductFields {
    fn from(r: &ProductRecord) -> Self {
        Self {
            sku: r.sku.clone(),
            name: r.name.clone(),
            description: r.description.clone(),
            short_description: r.short_description.clone(),
            regular_price: r.regular_price,
            sale_price: r.sale_price,
            stock_quantity: r.stock_quantity,
            stock_status: r.effective_stock_status(),
            dimensions: r.dimensions.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TaxonomyHandle {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

/// `(taxonomy slug, display value)` pairs identifying a variation.
pub type VariationAttributes = [(String, String)];

pub fn slugify(name: &str) -> String {
    let slug = regex!(r"[^\p{L}\p{N}]+")
        .replace_all(&name.trim().to_lowercase(), "-")
        .trim_matches('-')
        .to_string();
    format!("pa_{slug}")
}

/// Mutable external catalog the orchestrator writes into.
#[async_trait]
pub trait CatalogAdapter: Send + Sync {
    async fn find_product_id_by_sku(&self, sku: &str) -> anyhow::Result<Option<ProductId>>;
    async fn create_or_update_product(
        &self,
        id: Option<ProductId>,
        fields: &ProductFields,
    ) -> anyhow::Result<ProductId>;
    async fn set_categories(&self, id: ProductId, path: &CategoryPath) -> anyhow::Result<Vec<TermId>>;
    async fn ensure_attribute_taxonomy(&self, name: &str) -> anyhow::Result<TaxonomyHandle>;
    async fn ensure_term(
        &self,
        taxonomy: &TaxonomyHandle,
        code: &str,
        display_value: &str,
    ) -> anyhow::Result<TermId>;
    async fn convert_to_variable(&self, id: ProductId) -> anyhow::Result<()>;
    async fn create_variation(
        &self,
        parent: ProductId,
        sku: &str,
        attributes: &VariationAttributes,
        fields: &ProductFields,
    ) -> anyhow::Result<ProductId>;
    async fn import_asset(&self, url: &str, owner: ProductId, is_primary: bool) -> anyhow::Result<AssetId>;
    async fn clear_assets(&self, owner: ProductId) -> anyhow::Result<usize>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredProduct {
    pub id: ProductId,
    pub parent: Option<ProductId>,
    pub variable: bool,
    pub fields: ProductFields,
    pub categories: Vec<TermId>,
    pub attributes: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredAsset {
    pub id: AssetId,
    pub url: String,
    pub is_primary: bool,
}

#[derive(Default)]
struct CatalogState {
    next_id: i64,
    products: HashMap<ProductId, StoredProduct>,
    by_sku: HashMap<String, ProductId>,
    taxonomies: HashMap<String, TaxonomyHandle>,
    // (taxonomy, parent term, code) -> (term, display value)
    terms: HashMap<(String, TermId, String), (TermId, String)>,
    assets: HashMap<ProductId, Vec<(u64, StoredAsset)>>,
}

impl CatalogState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn term(&mut self, taxonomy: &str, parent: TermId, code: &str, value: &str) -> TermId {
        let key = (taxonomy.to_string(), parent, code.to_string());
        if let Some((id, display)) = self.terms.get_mut(&key) {
            *display = value.to_string();
            return *id;
        }
        let id = self.next_id();
        self.terms.insert(key, (id, value.to_string()));
        id
    }

    fn upsert(&mut self, id: Option<ProductId>, parent: Option<ProductId>, fields: &ProductFields) -> anyhow::Result<ProductId> {
        let id = match id {
            Some(id) if self.products.contains_key(&id) => id,
            Some(id) => return Err(anyhow!("Product {id} does not exist")),
            None => match self.by_sku.get(&fields.sku) {
                Some(id) => *id,
                None => {
                    let id = self.next_id();
                    self.products.insert(
                        id,
                        StoredProduct {
                            id,
                            parent,
                            variable: false,
                            fields: fields.clone(),
                            categories: Vec::new(),
                            attributes: Vec::new(),
                        },
                    );
                    id
                }
            },
        };
        let product = self
            .products
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Product {id} does not exist"))?;
        if product.fields.sku != fields.sku {
            self.by_sku.remove(&product.fields.sku);
        }
        product.fields = fields.clone();
        if parent.is_some() {
            product.parent = parent;
        }
        self.by_sku.insert(fields.sku.clone(), id);
        Ok(id)
    }

    fn product_mut(&mut self, id: ProductId) -> anyhow::Result<&mut StoredProduct> {
        self.products
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Product {id} does not exist"))
    }
}

/// Catalog kept in memory, used for dry runs and tests.
#[derive(Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    pub async fn product(&self, sku: &str) -> Option<StoredProduct> {
        let state = self.state.read().await;
        state
            .by_sku
            .get(sku)
            .and_then(|id| state.products.get(id))
            .cloned()
    }

    pub async fn variations_of(&self, parent: ProductId) -> Vec<StoredProduct> {
        let state = self.state.read().await;
        let mut res: Vec<_> = state
            .products
            .values()
            .filter(|p| p.parent == Some(parent))
            .cloned()
            .collect();
        res.sort_by_key(|p| p.id);
        res
    }

    pub async fn assets_of(&self, owner: ProductId) -> Vec<StoredAsset> {
        self.state
            .read()
            .await
            .assets
            .get(&owner)
            .map(|a| a.iter().map(|(_, a)| a.clone()).collect())
            .unwrap_or_default()
    }

    /// Display values of the terms of a taxonomy, sorted.
    pub async fn term_values(&self, taxonomy_slug: &str) -> Vec<String> {
        let state = self.state.read().await;
        let mut values: Vec<_> = state
            .terms
            .iter()
            .filter(|((t, _, _), _)| t == taxonomy_slug)
            .map(|(_, (_, v))| v.clone())
            .collect();
        values.sort();
        values
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.products.len()
    }
}

#[async_trait]
impl CatalogAdapter for InMemoryCatalog {
    async fn find_product_id_by_sku(&self, sku: &str) -> anyhow::Result<Option<ProductId>> {
        Ok(self.state.read().await.by_sku.get(sku).copied())
    }

    async fn create_or_update_product(
        &self,
        id: Option<ProductId>,
        fields: &ProductFields,
    ) -> anyhow::Result<ProductId> {
        self.state.write().await.upsert(id, None, fields)
    }

    async fn set_categories(&self, id: ProductId, path: &CategoryPath) -> anyhow::Result<Vec<TermId>> {
        let mut state = self.state.write().await;
        state.product_mut(id)?;
        let mut parent = 0;
        let mut terms = Vec::new();
        for segment in path.segments() {
            parent = state.term(CATEGORY_TAXONOMY, parent, segment, segment);
            terms.push(parent);
        }
        state.product_mut(id)?.categories = terms.clone();
        Ok(terms)
    }

    async fn ensure_attribute_taxonomy(&self, name: &str) -> anyhow::Result<TaxonomyHandle> {
        let slug = slugify(name);
        let mut state = self.state.write().await;
        if let Some(handle) = state.taxonomies.get(&slug) {
            return Ok(handle.clone());
        }
        let handle = TaxonomyHandle {
            id: state.next_id(),
            name: name.to_string(),
            slug: slug.clone(),
        };
        state.taxonomies.insert(slug, handle.clone());
        Ok(handle)
    }

    async fn ensure_term(
        &self,
        taxonomy: &TaxonomyHandle,
        code: &str,
        display_value: &str,
    ) -> anyhow::Result<TermId> {
        let mut state = self.state.write().await;
        if !state.taxonomies.contains_key(&taxonomy.slug) {
            return Err(anyhow!("Unknown taxonomy {}", taxonomy.slug));
        }
        Ok(state.term(&taxonomy.slug, 0, code, display_value))
    }

    async fn convert_to_variable(&self, id: ProductId) -> anyhow::Result<()> {
        self.state.write().await.product_mut(id)?.variable = true;
        Ok(())
    }

    async fn create_variation(
        &self,
        parent: ProductId,
        sku: &str,
        attributes: &VariationAttributes,
        fields: &ProductFields,
    ) -> anyhow::Result<ProductId> {
        let mut state = self.state.write().await;
        if !state.product_mut(parent)?.variable {
            return Err(anyhow!("Product {parent} is not variable"));
        }
        let fields = ProductFields {
            sku: sku.to_string(),
            ..fields.clone()
        };
        let id = state.upsert(None, Some(parent), &fields)?;
        state.product_mut(id)?.attributes = attributes.to_vec();
        Ok(id)
    }

    async fn import_asset(&self, url: &str, owner: ProductId, is_primary: bool) -> anyhow::Result<AssetId> {
        let url = Url::parse(url).with_context(|| format!("Invalid asset url {url}"))?;
        let hash = xxh3_64(url.as_str().as_bytes());
        let mut state = self.state.write().await;
        state.product_mut(owner)?;
        let id = state.next_id();
        let assets = state.assets.entry(owner).or_default();
        if is_primary {
            assets.iter_mut().for_each(|(_, a)| a.is_primary = false);
        }
        if let Some((_, asset)) = assets.iter_mut().find(|(h, _)| *h == hash) {
            asset.is_primary |= is_primary;
            return Ok(asset.id);
        }
        assets.push((
            hash,
            StoredAsset {
                id,
                url: url.to_string(),
                is_primary,
            },
        ));
        Ok(id)
    }

    async fn clear_assets(&self, owner: ProductId) -> anyhow::Result<usize> {
        Ok(self
            .state
            .write()
            .await
            .assets
            .remove(&owner)
            .map(|a| a.len())
            .unwrap_or_default())
    }
}

/// Local catalog staging database.
pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            let _ = conn.pragma_update(None, "journal_mode", &"WAL");
            let _ = conn.pragma_update(None, "synchronous", &"NORMAL");
            let _ = conn.pragma_update(None, "busy_timeout", &5000i64);
            let conn = Transaction::new(conn, TransactionBehavior::Deferred)?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS catalog_product (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    sku TEXT NOT NULL UNIQUE,
                    parent_id INTEGER,
                    variable INTEGER NOT NULL DEFAULT 0,
                    name TEXT NOT NULL,
                    description TEXT,
                    short_description TEXT,
                    regular_price TEXT,
                    sale_price TEXT,
                    stock_quantity INTEGER,
                    stock_status INTEGER NOT NULL,
                    weight TEXT,
                    length TEXT,
                    width TEXT,
                    height TEXT,
                    attributes TEXT,
                    updated_at TEXT NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS catalog_taxonomy (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    slug TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS catalog_term (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    taxonomy TEXT NOT NULL,
                    parent_id INTEGER NOT NULL DEFAULT 0,
                    code TEXT NOT NULL,
                    name TEXT NOT NULL,
                    UNIQUE (taxonomy, parent_id, code)
                )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS catalog_product_term (
                    product_id INTEGER NOT NULL,
                    term_id INTEGER NOT NULL,
                    PRIMARY KEY (product_id, term_id)
                )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS catalog_asset (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id INTEGER NOT NULL,
                    url_hash INTEGER NOT NULL,
                    url TEXT NOT NULL,
                    is_primary INTEGER NOT NULL DEFAULT 0,
                    UNIQUE (owner_id, url_hash)
                )",
                [],
            )?;
            conn.commit()?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    pub async fn product(&self, sku: &str) -> anyhow::Result<Option<StoredProduct>> {
        let sku = sku.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let product = conn
                    .query_row(
                        "SELECT id, parent_id, variable, sku, name, description, short_description,
                            regular_price, sale_price, stock_quantity, stock_status,
                            weight, length, width, height, attributes
                        FROM catalog_product WHERE sku = ?1",
                        [&sku],
                        |row| {
                            Ok(ProductRow {
                                id: row.get(0)?,
                                parent: row.get(1)?,
                                variable: row.get(2)?,
                                sku: row.get(3)?,
                                name: row.get(4)?,
                                description: row.get(5)?,
                                short_description: row.get(6)?,
                                regular_price: row.get(7)?,
                                sale_price: row.get(8)?,
                                stock_quantity: row.get(9)?,
                                stock_status: row.get(10)?,
                                dimensions: [row.get(11)?, row.get(12)?, row.get(13)?, row.get(14)?],
                                attributes: row.get(15)?,
                            })
                        },
                    )
                    .optional()?;
                let Some(product) = product else {
                    return Ok(None);
                };
                let mut stmt = conn.prepare(
                    "SELECT term_id FROM catalog_product_term WHERE product_id = ?1 ORDER BY term_id",
                )?;
                let terms = stmt
                    .query_map([product.id], |row| row.get(0))?
                    .collect::<Result<Vec<TermId>, _>>()?;
                Ok(Some((product, terms)))
            })
            .await?;
        row.map(|(product, terms)| product.into_stored(terms)).transpose()
    }

    pub async fn assets_of(&self, owner: ProductId) -> anyhow::Result<Vec<StoredAsset>> {
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, url, is_primary FROM catalog_asset WHERE owner_id = ?1 ORDER BY id",
                )?;
                let assets = stmt
                    .query_map([owner], |row| {
                        Ok(StoredAsset {
                            id: row.get(0)?,
                            url: row.get(1)?,
                            is_primary: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(assets)
            })
            .await?)
    }

    async fn upsert(&self, id: Option<ProductId>, parent: Option<ProductId>, fields: &ProductFields, attributes: Option<String>) -> anyhow::Result<Option<ProductId>> {
        let fields = fields.clone();
        let decimal = |d: Option<Decimal>| d.map(|d| d.to_string());
        let prices = (decimal(fields.regular_price), decimal(fields.sale_price));
        let dims = [
            decimal(fields.dimensions.weight),
            decimal(fields.dimensions.length),
            decimal(fields.dimensions.width),
            decimal(fields.dimensions.height),
        ];
        Ok(self
            .conn
            .call(move |conn| {
                let now = OffsetDateTime::now_utc();
                let status = fields.stock_status as u8;
                let id = match id {
                    Some(id) => {
                        let changed = conn.execute(
                            "UPDATE catalog_product SET sku = ?2, name = ?3, description = ?4,
                                short_description = ?5, regular_price = ?6, sale_price = ?7,
                                stock_quantity = ?8, stock_status = ?9, weight = ?10, length = ?11,
                                width = ?12, height = ?13, updated_at = ?14
                            WHERE id = ?1",
                            params![
                                id,
                                fields.sku,
                                fields.name,
                                fields.description,
                                fields.short_description,
                                prices.0,
                                prices.1,
                                fields.stock_quantity,
                                status,
                                dims[0],
                                dims[1],
                                dims[2],
                                dims[3],
                                now,
                            ],
                        )?;
                        (changed > 0).then_some(id)
                    }
                    None => Some(conn.query_row(
                        "INSERT INTO catalog_product (sku, name, description, short_description,
                            regular_price, sale_price, stock_quantity, stock_status,
                            weight, length, width, height, updated_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                        ON CONFLICT (sku) DO UPDATE SET name = excluded.name,
                            description = excluded.description,
                            short_description = excluded.short_description,
                            regular_price = excluded.regular_price,
                            sale_price = excluded.sale_price,
                            stock_quantity = excluded.stock_quantity,
                            stock_status = excluded.stock_status,
                            weight = excluded.weight, length = excluded.length,
                            width = excluded.width, height = excluded.height,
                            updated_at = excluded.updated_at
                        RETURNING id",
                        params![
                            fields.sku,
                            fields.name,
                            fields.description,
                            fields.short_description,
                            prices.0,
                            prices.1,
                            fields.stock_quantity,
                            status,
                            dims[0],
                            dims[1],
                            dims[2],
                            dims[3],
                            now,
                        ],
                        |row| row.get(0),
                    )?),
                };
                if let Some(id) = id {
                    if let Some(parent) = parent {
                        conn.execute(
                            "UPDATE catalog_product SET parent_id = ?2, attributes = ?3 WHERE id = ?1",
                            params![id, parent, attributes],
                        )?;
                    }
                }
                Ok(id)
            })
            .await?)
    }

    async fn is_variable(&self, id: ProductId) -> anyhow::Result<Option<bool>> {
        Ok(self
            .conn
            .call(move |conn| {
                let variable = conn
                    .query_row(
                        "SELECT variable FROM catalog_product WHERE id = ?1",
                        [id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(variable)
            })
            .await?)
    }
}

struct ProductRow {
    id: ProductId,
    parent: Option<ProductId>,
    variable: bool,
    sku: String,
    name: String,
    description: Option<String>,
    short_description: Option<String>,
    regular_price: Option<String>,
    sale_price: Option<String>,
    stock_quantity: Option<i64>,
    stock_status: u8,
    dimensions: [Option<String>; 4],
    attributes: Option<String>,
}

impl ProductRow {
    fn into_stored(self, categories: Vec<TermId>) -> anyhow::Result<StoredProduct> {
        let decimal = |d: Option<String>| -> anyhow::Result<Option<Decimal>> {
            d.map(|d| Decimal::from_str(&d).with_context(|| format!("Invalid decimal {d}")))
                .transpose()
        };
        let [weight, length, width, height] = self.dimensions;
        let attributes = self
            .attributes
            .map(|a| serde_json::from_str::<Vec<(String, String)>>(&a))
            .transpose()
            .context("Unable to parse variation attributes")?
            .unwrap_or_default();
        Ok(StoredProduct {
            id: self.id,
            parent: self.parent,
            variable: self.variable,
            fields: ProductFields {
                sku: self.sku,
                name: self.name,
                description: self.description,
                short_description: self.short_description,
                regular_price: decimal(self.regular_price)?,
                sale_price: decimal(self.sale_price)?,
                stock_quantity: self.stock_quantity,
                stock_status: StockStatus::from(self.stock_status),
                dimensions: Dimensions {
                    weight: decimal(weight)?,
                    length: decimal(length)?,
                    width: decimal(width)?,
                    height: decimal(height)?,
                },
            },
            categories,
            attributes,
        })
    }
}

#[async_trait]
impl CatalogAdapter for SqliteCatalog {
    async fn find_product_id_by_sku(&self, sku: &str) -> anyhow::Result<Option<ProductId>> {
        let sku = sku.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                let id = conn
                    .query_row("SELECT id FROM catalog_product WHERE sku = ?1", [sku], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok(id)
            })
            .await?)
    }

    async fn create_or_update_product(
        &self,
        id: Option<ProductId>,
        fields: &ProductFields,
    ) -> anyhow::Result<ProductId> {
        self.upsert(id, None, fields, None)
            .await?
            .ok_or_else(|| anyhow!("Product {id:?} does not exist"))
    }

    async fn set_categories(&self, id: ProductId, path: &CategoryPath) -> anyhow::Result<Vec<TermId>> {
        if self.is_variable(id).await?.is_none() {
            return Err(anyhow!("Product {id} does not exist"));
        }
        let segments = path.segments().to_vec();
        Ok(self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut parent: TermId = 0;
                let mut terms = Vec::new();
                for segment in &segments {
                    parent = tx.query_row(
                        "INSERT INTO catalog_term (taxonomy, parent_id, code, name)
                        VALUES (?1, ?2, ?3, ?3)
                        ON CONFLICT (taxonomy, parent_id, code) DO UPDATE SET name = excluded.name
                        RETURNING id",
                        params![CATEGORY_TAXONOMY, parent, segment],
                        |row| row.get(0),
                    )?;
                    terms.push(parent);
                }
                tx.execute(
                    "DELETE FROM catalog_product_term WHERE product_id = ?1
                        AND term_id IN (SELECT id FROM catalog_term WHERE taxonomy = ?2)",
                    params![id, CATEGORY_TAXONOMY],
                )?;
                for term in &terms {
                    tx.execute(
                        "INSERT OR IGNORE INTO catalog_product_term (product_id, term_id) VALUES (?1, ?2)",
                        params![id, term],
                    )?;
                }
                tx.commit()?;
                Ok(terms)
            })
            .await?)
    }

    async fn ensure_attribute_taxonomy(&self, name: &str) -> anyhow::Result<TaxonomyHandle> {
        let name = name.to_string();
        let slug = slugify(&name);
        Ok(self
            .conn
            .call(move |conn| {
                let id = conn.query_row(
                    "INSERT INTO catalog_taxonomy (slug, name) VALUES (?1, ?2)
                    ON CONFLICT (slug) DO UPDATE SET slug = excluded.slug
                    RETURNING id",
                    params![slug, name],
                    |row| row.get(0),
                )?;
                Ok(TaxonomyHandle { id, name, slug })
            })
            .await?)
    }

    async fn ensure_term(
        &self,
        taxonomy: &TaxonomyHandle,
        code: &str,
        display_value: &str,
    ) -> anyhow::Result<TermId> {
        let taxonomy = taxonomy.slug.clone();
        let code = code.to_string();
        let display_value = display_value.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                let id = conn.query_row(
                    "INSERT INTO catalog_term (taxonomy, parent_id, code, name)
                    VALUES (?1, 0, ?2, ?3)
                    ON CONFLICT (taxonomy, parent_id, code) DO UPDATE SET name = excluded.name
                    RETURNING id",
                    params![taxonomy, code, display_value],
                    |row| row.get(0),
                )?;
                Ok(id)
            })
            .await?)
    }

    async fn convert_to_variable(&self, id: ProductId) -> anyhow::Result<()> {
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute("UPDATE catalog_product SET variable = 1 WHERE id = ?1", [id])?)
            })
            .await?;
        if changed == 0 {
            return Err(anyhow!("Product {id} does not exist"));
        }
        Ok(())
    }

    async fn create_variation(
        &self,
        parent: ProductId,
        sku: &str,
        attributes: &VariationAttributes,
        fields: &ProductFields,
    ) -> anyhow::Result<ProductId> {
        match self.is_variable(parent).await? {
            Some(true) => (),
            Some(false) => return Err(anyhow!("Product {parent} is not variable")),
            None => return Err(anyhow!("Product {parent} does not exist")),
        }
        let fields = ProductFields {
            sku: sku.to_string(),
            ..fields.clone()
        };
        let attributes = serde_json::to_string(attributes)?;
        self.upsert(None, Some(parent), &fields, Some(attributes))
            .await?
            .ok_or_else(|| anyhow!("Unable to store variation {sku}"))
    }

    async fn import_asset(&self, url: &str, owner: ProductId, is_primary: bool) -> anyhow::Result<AssetId> {
        let url = Url::parse(url).with_context(|| format!("Invalid asset url {url}"))?;
        if self.is_variable(owner).await?.is_none() {
            return Err(anyhow!("Product {owner} does not exist"));
        }
        let hash = xxh3_64(url.as_str().as_bytes()) as i64;
        let url = url.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if is_primary {
                    tx.execute(
                        "UPDATE catalog_asset SET is_primary = 0 WHERE owner_id = ?1",
                        [owner],
                    )?;
                }
                let id = tx.query_row(
                    "INSERT INTO catalog_asset (owner_id, url_hash, url, is_primary)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT (owner_id, url_hash)
                        DO UPDATE SET is_primary = is_primary OR excluded.is_primary
                    RETURNING id",
                    params![owner, hash, url, is_primary],
                    |row| row.get(0),
                )?;
                tx.commit()?;
                Ok(id)
            })
            .await?)
    }

    async fn clear_assets(&self, owner: ProductId) -> anyhow::Result<usize> {
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM catalog_asset WHERE owner_id = ?1", [owner])?)
            })
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fields(sku: &str) -> ProductFields {
        let mut record = ProductRecord::new(sku);
        record.name = format!("Product {sku}");
        record.regular_price = Some(dec!(19.99));
        record.stock_quantity = Some(3);
        record.dimensions.weight = Some(dec!(0.5));
        ProductFields::from(&record)
    }

    async fn exercise(catalog: &dyn CatalogAdapter) -> (ProductId, ProductId) {
        assert_eq!(catalog.find_product_id_by_sku("ABC").await.unwrap(), None);
        let id = catalog.create_or_update_product(None, &fields("ABC")).await.unwrap();
        let again = catalog.create_or_update_product(None, &fields("ABC")).await.unwrap();
        assert_eq!(id, again);
        assert_eq!(catalog.find_product_id_by_sku("ABC").await.unwrap(), Some(id));
        assert!(catalog.create_or_update_product(Some(9999), &fields("ABC")).await.is_err());

        let path = CategoryPath::from_segments(["Dom", "Kuchnia"]);
        let terms = catalog.set_categories(id, &path).await.unwrap();
        assert_eq!(terms.len(), 2);
        assert_eq!(catalog.set_categories(id, &path).await.unwrap(), terms);

        let tax = catalog.ensure_attribute_taxonomy("Kolor").await.unwrap();
        assert_eq!(tax.slug, "pa_kolor");
        assert_eq!(catalog.ensure_attribute_taxonomy("Kolor").await.unwrap(), tax);
        let term = catalog.ensure_term(&tax, "01", "Biały").await.unwrap();
        assert_eq!(catalog.ensure_term(&tax, "01", "Biały").await.unwrap(), term);

        let attrs = vec![(tax.slug.clone(), "Biały".to_string())];
        assert!(catalog
            .create_variation(id, "ABC-01", &attrs, &fields("ABC-01"))
            .await
            .is_err());
        catalog.convert_to_variable(id).await.unwrap();
        let variation = catalog
            .create_variation(id, "ABC-01", &attrs, &fields("ABC-01"))
            .await
            .unwrap();
        assert_eq!(
            catalog
                .create_variation(id, "ABC-01", &attrs, &fields("ABC-01"))
                .await
                .unwrap(),
            variation
        );

        let first = catalog.import_asset("https://cdn.example.com/a.jpg", id, true).await.unwrap();
        catalog.import_asset("https://cdn.example.com/b.jpg", id, false).await.unwrap();
        assert_eq!(
            catalog.import_asset("https://cdn.example.com/a.jpg", id, true).await.unwrap(),
            first
        );
        assert!(catalog.import_asset("not a url", id, false).await.is_err());
        (id, variation)
    }

    #[tokio::test]
    async fn in_memory_catalog_upserts_by_sku() {
        let catalog = InMemoryCatalog::default();
        let (id, variation) = exercise(&catalog).await;
        let product = catalog.product("ABC").await.unwrap();
        assert!(product.variable);
        assert_eq!(product.categories.len(), 2);
        let variations = catalog.variations_of(id).await;
        assert_eq!(variations.len(), 1);
        assert_eq!(variations[0].id, variation);
        assert_eq!(variations[0].attributes[0].1, "Biały");
        let assets = catalog.assets_of(id).await;
        assert_eq!(assets.len(), 2);
        assert!(assets[0].is_primary);
        assert!(!assets[1].is_primary);
        assert_eq!(catalog.term_values("pa_kolor").await, vec!["Biały".to_string()]);
        assert_eq!(catalog.clear_assets(id).await.unwrap(), 2);
        assert!(catalog.assets_of(id).await.is_empty());
    }

    #[tokio::test]
    async fn sqlite_catalog_upserts_by_sku() {
        let conn = Connection::open_in_memory().await.unwrap();
        let catalog = SqliteCatalog::init(conn).await.unwrap();
        let (id, variation) = exercise(&catalog).await;
        let product = catalog.product("ABC").await.unwrap().unwrap();
        assert!(product.variable);
        assert_eq!(product.fields.regular_price, Some(dec!(19.99)));
        assert_eq!(product.fields.dimensions.weight, Some(dec!(0.5)));
        assert_eq!(product.categories.len(), 2);
        let stored = catalog.product("ABC-01").await.unwrap().unwrap();
        assert_eq!(stored.id, variation);
        assert_eq!(stored.parent, Some(id));
        assert_eq!(stored.attributes, vec![("pa_kolor".to_string(), "Biały".to_string())]);
        let assets = catalog.assets_of(id).await.unwrap();
        assert_eq!(assets.len(), 2);
        assert!(assets[0].is_primary);
        assert_eq!(catalog.clear_assets(id).await.unwrap(), 2);
    }

    #[test]
    fn slug_keeps_letters() {
        assert_eq!(slugify(" Rozmiar buta "), "pa_rozmiar-buta");
        assert_eq!(slugify("Größe"), "pa_größe");
    }
}
