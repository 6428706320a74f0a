use crate::attribute::AttributeCodeTable;
use crate::feed::FeedOptions;
use crate::import::{ImageMode, ImportOptions};
use crate::sku::SafetyValve;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "cfg.d/import.yml";

/// Per-supplier overrides of the image handling.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SupplierProfile {
    pub featured_image_index: Option<usize>,
    pub image_mode: Option<ImageMode>,
    pub image_base_url: Option<String>,
    pub max_images: Option<usize>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ImporterConfig {
    pub supplier: Option<String>,
    pub db_path: String,
    pub batch_size: usize,
    pub force_update: bool,
    pub image_mode: ImageMode,
    pub featured_image_index: usize,
    pub max_images: Option<usize>,
    pub category_delimiter: String,
    pub image_base_url: Option<String>,
    pub safety_valve: SafetyValve,
    pub code_table_path: Option<PathBuf>,
    pub suppliers: HashMap<String, SupplierProfile>,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            supplier: None,
            db_path: "storage/catalog_import.db".to_string(),
            batch_size: 50,
            force_update: false,
            image_mode: ImageMode::Append,
            featured_image_index: 0,
            max_images: None,
            category_delimiter: ">".to_string(),
            image_base_url: None,
            safety_valve: SafetyValve::default(),
            code_table_path: None,
            suppliers: HashMap::new(),
        }
    }
}

impl ImporterConfig {
    /// Reads the file named by `IMPORT_CONFIG` (or the default path) and
    /// applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = envmnt::get_or("IMPORT_CONFIG", DEFAULT_CONFIG_PATH);
        Ok(Self::load_from(path)?.with_env())
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                log::info!("Config {path:?} not found, using defaults");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Unable to read config {path:?}"));
            }
        };
        Self::from_str(&data).with_context(|| format!("Unable to parse config {path:?}"))
    }

    pub fn from_str(data: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(data).or_else(|_| serde_yaml::from_str(data))?)
    }

    pub fn with_env(mut self) -> Self {
        if let Ok(batch_size) = envmnt::get_parse("IMPORT_BATCH_SIZE") {
            self.batch_size = batch_size;
        }
        if envmnt::exists("IMPORT_DB_PATH") {
            self.db_path = envmnt::get_or("IMPORT_DB_PATH", &self.db_path);
        }
        if envmnt::exists("IMPORT_SUPPLIER") {
            self.supplier = Some(envmnt::get_or("IMPORT_SUPPLIER", ""))
                .filter(|s| !s.is_empty());
        }
        self.force_update = envmnt::is_or("IMPORT_FORCE_UPDATE", self.force_update);
        self
    }

    /// Profile of the active supplier, empty when none is configured.
    pub fn profile(&self) -> SupplierProfile {
        self.supplier
            .as_ref()
            .and_then(|s| self.suppliers.get(s))
            .cloned()
            .unwrap_or_default()
    }

    pub fn import_options(&self) -> ImportOptions {
        let profile = self.profile();
        ImportOptions {
            supplier: self.supplier.clone(),
            image_mode: profile.image_mode.unwrap_or(self.image_mode),
            featured_image_index: profile
                .featured_image_index
                .unwrap_or(self.featured_image_index),
            max_images: profile.max_images.or(self.max_images),
        }
    }

    pub fn feed_options(&self) -> anyhow::Result<FeedOptions> {
        let image_base_url = self
            .profile()
            .image_base_url
            .or_else(|| self.image_base_url.clone())
            .map(|u| Url::parse(&u).with_context(|| format!("Invalid image base url {u}")))
            .transpose()?;
        Ok(FeedOptions {
            category_delimiter: self.category_delimiter.clone(),
            image_base_url,
        })
    }

    pub fn code_table(&self) -> anyhow::Result<AttributeCodeTable> {
        match &self.code_table_path {
            Some(path) => AttributeCodeTable::load(path),
            None => Ok(AttributeCodeTable::builtin()),
        }
    }
}
