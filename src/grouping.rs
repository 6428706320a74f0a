use crate::sku::{self, Classification, SafetyValve};
use catalog_types::group::{ProductGroup, Variant, VariantMatch};
use catalog_types::product::ProductRecord;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use typesafe_repository::{IdentityOf, RefIdentity};

#[derive(Debug, Default)]
pub struct Grouping {
    pub groups: Vec<ProductGroup>,
    pub dropped: Vec<ProductRecord>,
    pub readmitted: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct GroupingSummary {
    pub groups: usize,
    pub variable: usize,
    pub synthesized: usize,
    pub standalone: usize,
    pub variants: usize,
    pub dropped: usize,
    pub readmitted: usize,
}

impl Grouping {
    pub fn summary(&self) -> GroupingSummary {
        let variable = self.groups.iter().filter(|g| g.is_variable()).count();
        GroupingSummary {
            groups: self.groups.len(),
            variable,
            synthesized: self.groups.iter().filter(|g| g.synthesized).count(),
            standalone: self.groups.len() - variable,
            variants: self.groups.iter().map(|g| g.variants.len()).sum(),
            dropped: self.dropped.len(),
            readmitted: self.readmitted,
        }
    }
}

fn merge_images<'a>(existing: &'a [String], incoming: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut res = Vec::new();
    for img in existing.iter().chain(incoming) {
        if seen.insert(img.as_str()) {
            res.push(img.clone());
        }
    }
    res
}

fn build_group(base_sku: String, main: Option<ProductRecord>, variants: Vec<Variant>) -> Option<ProductGroup> {
    let (mut main_record, synthesized) = match main {
        Some(record) => (record, false),
        None => {
            let Some(first) = variants.first() else {
                log::error!("Variant bucket {base_sku} is empty, unable to synthesize main product");
                return None;
            };
            log::warn!(
                "No base record for {base_sku}, synthesizing it from variant {}",
                first.record.sku
            );
            let mut record = first.record.clone();
            record.sku = base_sku.clone();
            (record, true)
        }
    };
    let merged_images = merge_images(
        &main_record.images,
        variants.iter().flat_map(|v| v.record.images.iter()),
    );
    main_record.images = merged_images.clone();
    Some(ProductGroup {
        base_sku,
        main_record,
        variants,
        merged_images,
        synthesized,
    })
}

/// Groups a flat feed into base products with their variants.
///
/// Groups that have variants come first, in the order their base sku was
/// first seen on a variant; base records without variants follow in feed
/// order. The output depends only on the input order.
pub fn group(records: Vec<ProductRecord>, valve: &SafetyValve) -> Grouping {
    let mut classification = sku::classify(records);
    let readmitted = valve.apply(&mut classification);
    if classification.is_empty() {
        log::warn!("No records to group");
    }
    let Classification { entries, unmatched } = classification;

    // A record that is itself the parent of other variants is imported as
    // that parent, never as a variant.
    let parents: HashSet<IdentityOf<ProductRecord>> = entries
        .iter()
        .filter(|e| e.matched.is_variant())
        .map(|e| e.matched.base_sku.clone())
        .collect();

    let mut bases: Vec<Option<ProductRecord>> = Vec::new();
    let mut base_index: HashMap<IdentityOf<ProductRecord>, usize> = HashMap::new();
    let mut bucket_order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, Vec<Variant>> = HashMap::new();
    for mut entry in entries {
        if entry.matched.is_variant() && parents.contains(entry.record.id_ref()) {
            log::warn!(
                "{} has variants of its own, importing it as a parent instead of a variant of {}",
                entry.record.sku,
                entry.matched.base_sku
            );
            entry.matched = VariantMatch::base(entry.record.sku.clone());
        }
        if entry.matched.is_variant() {
            buckets
                .entry(entry.matched.base_sku.clone())
                .or_insert_with_key(|key| {
                    bucket_order.push(key.clone());
                    Vec::new()
                })
                .push(entry);
        } else {
            base_index.insert(entry.record.id_ref().clone(), bases.len());
            bases.push(Some(entry.record));
        }
    }

    let mut groups = Vec::with_capacity(bucket_order.len() + bases.len());
    for base_sku in bucket_order {
        let variants = buckets.remove(&base_sku).unwrap_or_default();
        let main = base_index
            .get(&base_sku)
            .and_then(|&i| bases.get_mut(i))
            .and_then(Option::take);
        if let Some(group) = build_group(base_sku, main, variants) {
            groups.push(group);
        }
    }
    groups.extend(bases.into_iter().flatten().map(ProductGroup::standalone));
    Grouping {
        groups,
        dropped: unmatched,
        readmitted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_types::group::VariantKind;

    fn record(sku: &str, images: &[&str]) -> ProductRecord {
        let mut r = ProductRecord::new(sku);
        r.name = format!("Name of {sku}");
        r.images = images.iter().map(ToString::to_string).collect();
        r
    }

    fn skus(records: &[&str]) -> Vec<ProductRecord> {
        records.iter().map(|s| record(s, &[])).collect()
    }

    #[test]
    fn groups_variants_under_existing_base() {
        let grouping = group(skus(&["ABC123", "ABC123-01", "ABC123-02"]), &SafetyValve::default());
        assert_eq!(grouping.groups.len(), 1);
        let g = &grouping.groups[0];
        assert_eq!(g.base_sku, "ABC123");
        assert_eq!(g.main_record.sku, "ABC123");
        assert_eq!(g.main_record.name, "Name of ABC123");
        assert!(!g.synthesized);
        assert_eq!(
            g.variants
                .iter()
                .map(|v| v.matched.color_code.as_deref())
                .collect::<Vec<_>>(),
            vec![Some("01"), Some("02")]
        );
    }

    #[test]
    fn synthesizes_main_from_first_variant() {
        let grouping = group(skus(&["XYZ-01", "XYZ-02"]), &SafetyValve::default());
        assert_eq!(grouping.groups.len(), 1);
        let g = &grouping.groups[0];
        assert!(g.synthesized);
        assert_eq!(g.main_record.sku, "XYZ");
        assert_eq!(g.main_record.name, "Name of XYZ-01");
        assert_eq!(g.variants.len(), 2);
    }

    #[test]
    fn orders_variable_groups_before_standalone() {
        let grouping = group(
            skus(&["SOLO", "B-01", "A", "A_M", "B-02", "OTHER", "A-01_L"]),
            &SafetyValve::default(),
        );
        let order = grouping
            .groups
            .iter()
            .map(|g| (g.base_sku.as_str(), g.variants.len()))
            .collect::<Vec<_>>();
        assert_eq!(order, vec![("B", 2), ("A", 2), ("SOLO", 0), ("OTHER", 0)]);
        assert_eq!(grouping.groups[1].variants[1].matched.kind, VariantKind::Combined);
    }

    #[test]
    fn every_record_lands_in_exactly_one_group() {
        let input = ["A", "A-01", "A_XL", "B-03", "C", "", "D_16GB", "D"];
        let grouping = group(skus(&input), &SafetyValve::default());
        let mut seen = grouping
            .groups
            .iter()
            .flat_map(|g| {
                let main = (!g.synthesized).then_some(g.main_record.sku.clone());
                main.into_iter()
                    .chain(g.variants.iter().map(|v| v.record.sku.clone()))
            })
            .collect::<Vec<_>>();
        seen.sort();
        let mut expected = input
            .iter()
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        expected.sort();
        assert_eq!(seen, expected);
        assert_eq!(grouping.dropped.len(), 1);
    }

    #[test]
    fn variant_with_own_variants_becomes_parent() {
        let grouping = group(skus(&["KP", "KP-10", "KP-10-01", "KP-10-02"]), &SafetyValve::default());
        let order = grouping
            .groups
            .iter()
            .map(|g| (g.base_sku.as_str(), g.synthesized, g.variants.len()))
            .collect::<Vec<_>>();
        assert_eq!(order, vec![("KP-10", false, 2), ("KP", false, 0)]);
        assert_eq!(grouping.groups[0].main_record.name, "Name of KP-10");

        let mut seen = HashSet::new();
        for g in &grouping.groups {
            assert!(seen.insert(g.main_record.sku.clone()), "{}", g.main_record.sku);
            for v in &g.variants {
                assert!(seen.insert(v.record.sku.clone()), "{}", v.record.sku);
            }
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn grouping_is_stable() {
        let input = skus(&["Q-01", "R", "Q-02", "R_S", "T"]);
        let first = group(input.clone(), &SafetyValve::default());
        let second = group(input, &SafetyValve::default());
        assert_eq!(first.groups, second.groups);
    }

    #[test]
    fn merges_images_without_duplicates() {
        let records = vec![
            record("M", &["m1.jpg", "shared.jpg"]),
            record("M-01", &["shared.jpg", "v1.jpg"]),
            record("M-02", &["v1.jpg", "v2.jpg", "m1.jpg"]),
        ];
        let grouping = group(records, &SafetyValve::default());
        let g = &grouping.groups[0];
        let expected = vec!["m1.jpg", "shared.jpg", "v1.jpg", "v2.jpg"];
        assert_eq!(g.merged_images, expected);
        assert_eq!(g.main_record.images, expected);
        assert_eq!(g.variants[0].record.images, vec!["shared.jpg", "v1.jpg"]);
    }

    #[test]
    fn reports_summary() {
        let valve = SafetyValve {
            min_base_count: 2,
            min_feed_size: 3,
        };
        let grouping = group(skus(&["A", "A-01", "P-10", "P-11", ""]), &valve);
        assert_eq!(
            grouping.summary(),
            GroupingSummary {
                groups: 3,
                variable: 1,
                synthesized: 0,
                standalone: 2,
                variants: 1,
                dropped: 1,
                readmitted: 2,
            }
        );
    }
}
