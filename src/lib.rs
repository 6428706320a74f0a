#![deny(clippy::unwrap_used)]

pub mod attribute;
pub mod catalog;
pub mod config;
pub mod error;
pub mod feed;
pub mod grouping;
pub mod import;
pub mod progress;
pub mod sku;
