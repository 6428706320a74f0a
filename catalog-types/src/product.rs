use crate::StockStatus;
use itertools::Itertools;
use rust_decimal::Decimal;
use serde::Serialize;
use typesafe_repository::macros::Id;
use typesafe_repository::{Identity, RefIdentity};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub weight: Option<Decimal>,
    pub length: Option<Decimal>,
    pub width: Option<Decimal>,
    pub height: Option<Decimal>,
}

/// Category hierarchy from the root segment down to the leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct CategoryPath(pub Vec<String>);

impl CategoryPath {
    pub fn parse<S: AsRef<str>>(raw: S, delimiter: &str) -> Self {
        Self::from_segments(raw.as_ref().split(delimiter))
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            segments
                .into_iter()
                .map(|s| s.as_ref().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for CategoryPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().join(" > "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductAttribute {
    pub name: String,
    pub values: Vec<String>,
    pub variation: bool,
}

impl ProductAttribute {
    pub fn is_named<S: AsRef<str>>(&self, names: &[S]) -> bool {
        let name = self.name.trim();
        names.iter().any(|n| n.as_ref().eq_ignore_ascii_case(name))
    }
}

/// One product entry from a supplier feed, already validated.
#[derive(Id, Debug, Clone, PartialEq, Eq, Serialize)]
#[Id(ref_id)]
pub struct ProductRecord {
    #[id]
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub regular_price: Option<Decimal>,
    pub sale_price: Option<Decimal>,
    pub stock_quantity: Option<i64>,
    pub stock_status: Option<StockStatus>,
    pub dimensions: Dimensions,
    pub categories: CategoryPath,
    pub attributes: Vec<ProductAttribute>,
    pub images: Vec<String>,
    pub raw_meta: Vec<(String, String)>,
}

impl ProductRecord {
    pub fn new<S: Into<String>>(sku: S) -> Self {
        Self {
            sku: sku.into(),
            name: String::new(),
            description: None,
            short_description: None,
            regular_price: None,
            sale_price: None,
            stock_quantity: None,
            stock_status: None,
            dimensions: Dimensions::default(),
            categories: CategoryPath::default(),
            attributes: Vec::new(),
            images: Vec::new(),
            raw_meta: Vec::new(),
        }
    }

    /// Values of every attribute whose name is one of `names`, in feed order.
    pub fn attribute_values<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        self.attributes
            .iter()
            .filter(|a| a.is_named(names))
            .flat_map(|a| a.values.iter().cloned())
            .unique()
            .collect()
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.raw_meta
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Stock status stated by the feed, or derived from the quantity when absent.
    pub fn effective_stock_status(&self) -> StockStatus {
        match (self.stock_status, self.stock_quantity) {
            (Some(s), _) => s,
            (None, Some(q)) if q > 0 => StockStatus::InStock,
            (None, Some(_)) => StockStatus::OutOfStock,
            (None, None) => StockStatus::InStock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_category_path() {
        let path = CategoryPath::parse(" Odzież > Koszulki >  > T-shirt ", ">");
        assert_eq!(path.segments(), &["Odzież", "Koszulki", "T-shirt"]);
        assert_eq!(path.to_string(), "Odzież > Koszulki > T-shirt");
        assert_eq!(CategoryPath::parse("  ", ">"), CategoryPath::default());
    }

    #[test]
    fn collects_attribute_values_case_insensitively() {
        let mut record = ProductRecord::new("ABC");
        record.attributes = vec![
            ProductAttribute {
                name: "Kolor".to_string(),
                values: vec!["Niebieski".to_string(), "Czarny".to_string()],
                variation: true,
            },
            ProductAttribute {
                name: "COLOR".to_string(),
                values: vec!["Czarny".to_string(), "Blue".to_string()],
                variation: false,
            },
            ProductAttribute {
                name: "Rozmiar".to_string(),
                values: vec!["M".to_string()],
                variation: true,
            },
        ];
        assert_eq!(
            record.attribute_values(&["kolor", "color"]),
            vec!["Niebieski", "Czarny", "Blue"]
        );
        assert_eq!(record.attribute_values(&["size"]), Vec::<String>::new());
    }

    #[test]
    fn derives_stock_status_from_quantity() {
        let mut record = ProductRecord::new("ABC");
        record.regular_price = Some(dec!(10.50));
        assert_eq!(record.effective_stock_status(), StockStatus::InStock);
        record.stock_quantity = Some(0);
        assert_eq!(record.effective_stock_status(), StockStatus::OutOfStock);
        record.stock_status = Some(StockStatus::OnBackorder);
        assert_eq!(record.effective_stock_status(), StockStatus::OnBackorder);
    }
}
