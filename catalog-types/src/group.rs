use crate::product::ProductRecord;
use derive_more::Display;
use itertools::Itertools;
use serde::Serialize;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "lowercase")]
pub enum VariantKind {
    #[display("base")]
    Base,
    #[display("color")]
    Color,
    #[display("size")]
    Size,
    #[display("combined")]
    Combined,
    #[display("unmatched")]
    Unmatched,
}

/// Classification of a single sku by its suffix.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantMatch {
    pub kind: VariantKind,
    pub base_sku: String,
    pub color_code: Option<String>,
    pub size_code: Option<String>,
}

impl VariantMatch {
    pub fn base<S: Into<String>>(sku: S) -> Self {
        Self {
            kind: VariantKind::Base,
            base_sku: sku.into(),
            color_code: None,
            size_code: None,
        }
    }

    pub fn unmatched<S: Into<String>>(sku: S) -> Self {
        Self {
            kind: VariantKind::Unmatched,
            base_sku: sku.into(),
            color_code: None,
            size_code: None,
        }
    }

    pub fn is_variant(&self) -> bool {
        matches!(
            self.kind,
            VariantKind::Color | VariantKind::Size | VariantKind::Combined
        )
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub record: ProductRecord,
    pub matched: VariantMatch,
}

/// A base product together with its variants: the unit of import.
///
/// `main_record.sku` always equals `base_sku`. When the feed has no record
/// for the base sku, `main_record` is a copy of the first variant and
/// `synthesized` is set.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ProductGroup {
    pub base_sku: String,
    pub main_record: ProductRecord,
    pub variants: Vec<Variant>,
    pub merged_images: Vec<String>,
    pub synthesized: bool,
}

impl ProductGroup {
    pub fn standalone(record: ProductRecord) -> Self {
        Self {
            base_sku: record.sku.clone(),
            merged_images: record.images.clone(),
            main_record: record,
            variants: Vec::new(),
            synthesized: false,
        }
    }

    pub fn is_variable(&self) -> bool {
        !self.variants.is_empty()
    }

    /// Distinct color codes across the variants, first-seen order.
    pub fn color_codes(&self) -> Vec<&str> {
        self.variants
            .iter()
            .filter_map(|v| v.matched.color_code.as_deref())
            .unique()
            .collect()
    }

    /// Distinct size codes across the variants, first-seen order.
    pub fn size_codes(&self) -> Vec<&str> {
        self.variants
            .iter()
            .filter_map(|v| v.matched.size_code.as_deref())
            .unique()
            .collect()
    }
}
