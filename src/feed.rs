use crate::error::{FeedError, ValidationError};
use catalog_types::product::{CategoryPath, Dimensions, ProductAttribute, ProductRecord};
use catalog_types::StockStatus;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::str::FromStr;
use url::Url;

#[derive(Debug, Default, Deserialize)]
pub struct Feed {
    #[serde(default, rename = "product")]
    pub products: Vec<FeedProduct>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FeedProduct {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub regular_price: Option<String>,
    pub sale_price: Option<String>,
    pub stock_quantity: Option<String>,
    pub stock_status: Option<String>,
    pub weight: Option<String>,
    pub length: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    #[serde(default)]
    pub categories: Option<FeedCategories>,
    #[serde(default)]
    pub attributes: Option<FeedAttributes>,
    #[serde(default)]
    pub images: Option<FeedImages>,
    #[serde(default)]
    pub meta_data: Option<FeedMetaData>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FeedCategories {
    #[serde(rename = "$value", default)]
    pub parts: Vec<CategoryPart>,
}

#[derive(Clone, Debug, Deserialize)]
pub enum CategoryPart {
    #[serde(rename = "category")]
    Category(String),
    #[serde(rename = "$text")]
    Text(String),
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FeedAttributes {
    #[serde(default, rename = "attribute")]
    pub attributes: Vec<FeedAttribute>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FeedAttribute {
    pub name: Option<String>,
    #[serde(default, rename = "value")]
    pub values: Vec<String>,
    pub variation: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FeedImages {
    #[serde(default, rename = "image")]
    pub images: Vec<FeedImage>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FeedImage {
    #[serde(default, rename = "@src")]
    pub src: Option<String>,
    #[serde(default, rename = "$text")]
    pub text: Option<String>,
}

impl FeedImage {
    fn link(&self) -> Option<&str> {
        self.src
            .as_deref()
            .or(self.text.as_deref())
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FeedMetaData {
    #[serde(default, rename = "meta")]
    pub meta: Vec<FeedMeta>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FeedMeta {
    pub key: Option<String>,
    pub value: Option<String>,
}

#[derive(Clone, Debug)]
pub struct FeedOptions {
    pub category_delimiter: String,
    pub image_base_url: Option<Url>,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            category_delimiter: ">".to_string(),
            image_base_url: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ParsedFeed {
    pub records: Vec<ProductRecord>,
    pub rejected: Vec<ValidationError>,
}

/// Feed entry paired with the options needed to validate it.
pub struct WithOptions<'a, T>(pub &'a FeedOptions, pub T);

pub async fn read_feed<P: AsRef<std::path::Path>>(
    path: P,
    options: &FeedOptions,
) -> Result<ParsedFeed, FeedError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_feed(&content, options)
}

pub fn parse_feed(content: &str, options: &FeedOptions) -> Result<ParsedFeed, FeedError> {
    let feed: Feed = quick_xml::de::from_str(content)?;
    let total = feed.products.len();
    let mut seen = HashSet::new();
    let mut parsed = ParsedFeed::default();
    for product in feed.products {
        match ProductRecord::try_from(WithOptions(options, product)) {
            Ok(record) if !seen.insert(record.sku.clone()) => {
                let err = ValidationError::new(Some(&record.sku), "Duplicate sku in feed");
                log::warn!("{err}");
                parsed.rejected.push(err);
            }
            Ok(record) => parsed.records.push(record),
            Err(err) => {
                log::warn!("{err}");
                parsed.rejected.push(err);
            }
        }
    }
    log::info!(
        "Parsed feed: {total} entries, {} valid, {} rejected",
        parsed.records.len(),
        parsed.rejected.len()
    );
    Ok(parsed)
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_decimal(sku: &str, field: &str, raw: Option<String>) -> Result<Option<Decimal>, ValidationError> {
    let Some(raw) = non_empty(raw) else {
        return Ok(None);
    };
    let normalized = raw.replace([' ', '\u{a0}'], "").replace(',', ".");
    Decimal::from_str(&normalized)
        .map(Some)
        .map_err(|err| ValidationError::new(Some(sku), format!("Unable to parse {field} {raw:?}: {err}")))
}

fn parse_quantity(sku: &str, raw: Option<String>) -> Result<Option<i64>, ValidationError> {
    let Some(value) = parse_decimal(sku, "stock_quantity", raw)? else {
        return Ok(None);
    };
    if !value.fract().is_zero() {
        return Err(ValidationError::new(
            Some(sku),
            format!("Stock quantity {value} is not a whole number"),
        ));
    }
    value
        .to_i64()
        .map(Some)
        .ok_or_else(|| ValidationError::new(Some(sku), format!("Stock quantity {value} out of range")))
}

fn parse_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|r| r.trim().to_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "y")
    )
}

fn resolve_image(link: &str, base: Option<&Url>) -> Option<String> {
    match Url::parse(link) {
        Ok(url) => Some(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => base.and_then(|b| b.join(link).ok()).map(|u| u.to_string()),
        Err(_) => None,
    }
}

impl TryFrom<WithOptions<'_, FeedProduct>> for ProductRecord {
    type Error = ValidationError;

    fn try_from(WithOptions(options, p): WithOptions<'_, FeedProduct>) -> Result<Self, Self::Error> {
        let sku = non_empty(p.sku).ok_or_else(|| ValidationError::new(None, "Product must contain sku"))?;
        if sku.chars().any(char::is_control) {
            return Err(ValidationError::new(Some(&sku), "Sku contains control characters"));
        }
        let stock_status = match non_empty(p.stock_status) {
            Some(s) => Some(StockStatus::parse(&s).ok_or_else(|| {
                ValidationError::new(Some(&sku), format!("Unknown stock status {s:?}"))
            })?),
            None => None,
        };
        let dimensions = Dimensions {
            weight: parse_decimal(&sku, "weight", p.weight)?,
            length: parse_decimal(&sku, "length", p.length)?,
            width: parse_decimal(&sku, "width", p.width)?,
            height: parse_decimal(&sku, "height", p.height)?,
        };
        let delimiter = options.category_delimiter.as_str();
        let categories = CategoryPath::from_segments(
            p.categories
                .map(|c| c.parts)
                .unwrap_or_default()
                .iter()
                .flat_map(|part| match part {
                    CategoryPart::Category(s) | CategoryPart::Text(s) => s.split(delimiter),
                }),
        );
        let attributes = p
            .attributes
            .map(|a| a.attributes)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| {
                let name = non_empty(a.name)?;
                let values = a
                    .values
                    .iter()
                    .flat_map(|v| v.split('|'))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>();
                Some(ProductAttribute {
                    name,
                    values,
                    variation: parse_flag(a.variation.as_deref()),
                })
            })
            .collect();
        let mut seen = HashSet::new();
        let images = p
            .images
            .map(|i| i.images)
            .unwrap_or_default()
            .iter()
            .filter_map(FeedImage::link)
            .filter_map(|link| {
                let resolved = resolve_image(link, options.image_base_url.as_ref());
                if resolved.is_none() {
                    log::warn!("Dropping invalid image url {link:?} of {sku}");
                }
                resolved
            })
            .filter(|img| seen.insert(img.clone()))
            .collect();
        let raw_meta = p
            .meta_data
            .map(|m| m.meta)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| Some((non_empty(m.key)?, m.value.unwrap_or_default())))
            .collect();
        Ok(ProductRecord {
            name: non_empty(p.name).unwrap_or_else(|| sku.clone()),
            description: non_empty(p.description),
            short_description: non_empty(p.short_description),
            regular_price: parse_decimal(&sku, "regular_price", p.regular_price)?,
            sale_price: parse_decimal(&sku, "sale_price", p.sale_price)?,
            stock_quantity: parse_quantity(&sku, p.stock_quantity)?,
            stock_status,
            dimensions,
            categories,
            attributes,
            images,
            raw_meta,
            sku,
        })
    }
}
