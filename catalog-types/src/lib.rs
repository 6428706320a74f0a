use derive_more::Display;
use serde::{Deserialize, Serialize};

pub mod group;
pub mod product;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum StockStatus {
    #[display("outofstock")]
    OutOfStock = 0,
    #[display("instock")]
    InStock = 1,
    #[display("onbackorder")]
    OnBackorder = 2,
}

impl StockStatus {
    pub fn parse<S: AsRef<str>>(s: S) -> Option<Self> {
        match s.as_ref().trim().to_lowercase().replace(['_', '-', ' '], "").as_str() {
            "instock" | "available" | "1" | "true" => Some(Self::InStock),
            "outofstock" | "unavailable" | "0" | "false" => Some(Self::OutOfStock),
            "onbackorder" | "backorder" | "onorder" => Some(Self::OnBackorder),
            _ => None,
        }
    }
}

impl From<u8> for StockStatus {
    fn from(s: u8) -> Self {
        match s {
            0 => Self::OutOfStock,
            1 => Self::InStock,
            _ => Self::OnBackorder,
        }
    }
}

/// Ordered phase of the import pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Stage {
    #[display("basic")]
    Basic = 1,
    #[display("attributes")]
    Attributes = 2,
    #[display("images")]
    Images = 3,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Basic, Stage::Attributes, Stage::Images];

    pub fn number(self) -> u8 {
        self as u8
    }

    /// Stage that must be done for the same sku before this one may run.
    pub fn previous(self) -> Option<Stage> {
        match self {
            Stage::Basic => None,
            Stage::Attributes => Some(Stage::Basic),
            Stage::Images => Some(Stage::Attributes),
        }
    }
}

impl TryFrom<u8> for Stage {
    type Error = u8;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(Self::Basic),
            2 => Ok(Self::Attributes),
            3 => Ok(Self::Images),
            n => Err(n),
        }
    }
}
