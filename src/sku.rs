//! Suffix-based sku classification.
//!
//! Rules are tried in order and the first match wins:
//! combined `-NN_SIZE` / `_NN_SIZE`, color `-NN` / `_NN`, size `_SIZE`.
//! Anything else is a base sku. Size tokens are letter sizes from XXXXS to
//! XXXL or a 1-3 digit number with an optional `GB` suffix.

use catalog_types::group::{Variant, VariantKind, VariantMatch};
use catalog_types::product::ProductRecord;
use lazy_regex::regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

fn normalize_size(token: &str) -> String {
    token.to_uppercase()
}

pub fn match_sku(sku: &str) -> VariantMatch {
    let sku = sku.trim();
    if sku.is_empty() || sku.chars().any(char::is_control) {
        return VariantMatch::unmatched(sku);
    }
    let combined =
        regex!(r"(?i)^(.+)[-_](\d{2})_(XXXXS|XXXS|XXS|XS|XXXL|XXL|XL|S|M|L|\d{1,3}(?:GB)?)$");
    if let Some(c) = combined.captures(sku) {
        return VariantMatch {
            kind: VariantKind::Combined,
            base_sku: c[1].to_string(),
            color_code: Some(c[2].to_string()),
            size_code: Some(normalize_size(&c[3])),
        };
    }
    if let Some(c) = regex!(r"^(.+)[-_](\d{2})$").captures(sku) {
        return VariantMatch {
            kind: VariantKind::Color,
            base_sku: c[1].to_string(),
            color_code: Some(c[2].to_string()),
            size_code: None,
        };
    }
    let size = regex!(r"(?i)^(.+)_(XXXXS|XXXS|XXS|XS|XXXL|XXL|XL|S|M|L|\d{1,3}(?:GB)?)$");
    if let Some(c) = size.captures(sku) {
        return VariantMatch {
            kind: VariantKind::Size,
            base_sku: c[1].to_string(),
            color_code: None,
            size_code: Some(normalize_size(&c[2])),
        };
    }
    VariantMatch::base(sku)
}

/// Raw matcher output over a whole feed.
#[derive(Debug, Default)]
pub struct Classification {
    pub entries: Vec<Variant>,
    pub unmatched: Vec<ProductRecord>,
}

impl Classification {
    pub fn len(&self) -> usize {
        self.entries.len() + self.unmatched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn base_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.matched.kind == VariantKind::Base)
            .count()
    }

    pub fn variant_count(&self) -> usize {
        self.entries.iter().filter(|e| e.matched.is_variant()).count()
    }
}

pub fn classify(records: Vec<ProductRecord>) -> Classification {
    let mut classification = Classification::default();
    for record in records {
        let matched = match_sku(&record.sku);
        if matched.kind == VariantKind::Unmatched {
            log::error!("Dropping record with malformed sku {:?}", record.sku);
            classification.unmatched.push(record);
            continue;
        }
        classification.entries.push(Variant { record, matched });
    }
    classification
}

/// Re-admission heuristic for feeds where suffix matching swallowed most
/// standalone products.
///
/// When a feed is large and almost nothing classified as base, every variant
/// whose base sku is not itself a record of the feed is turned back into a
/// base record. This trades grouping precision for not losing products; it
/// does not try to tell real variants from look-alike skus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyValve {
    pub min_base_count: usize,
    pub min_feed_size: usize,
}

impl Default for SafetyValve {
    fn default() -> Self {
        Self {
            min_base_count: 100,
            min_feed_size: 1000,
        }
    }
}

impl SafetyValve {
    pub fn is_triggered(&self, classification: &Classification) -> bool {
        classification.base_count() < self.min_base_count
            && classification.len() > self.min_feed_size
    }

    /// Returns the number of records re-admitted as base.
    pub fn apply(&self, classification: &mut Classification) -> usize {
        if !self.is_triggered(classification) {
            return 0;
        }
        let bases = classification
            .entries
            .iter()
            .filter(|e| e.matched.kind == VariantKind::Base)
            .map(|e| e.record.sku.clone())
            .collect::<HashSet<_>>();
        let mut readmitted = 0;
        for entry in classification
            .entries
            .iter_mut()
            .filter(|e| e.matched.is_variant() && !bases.contains(&e.matched.base_sku))
        {
            entry.matched = VariantMatch::base(entry.record.sku.clone());
            readmitted += 1;
        }
        log::warn!(
            "Safety valve triggered: {} base records among {}, re-admitted {readmitted} skus as base",
            bases.len(),
            classification.len()
        );
        readmitted
    }
}
