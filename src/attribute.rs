use anyhow::Context;
use catalog_types::product::ProductRecord;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const COLORS: &[(&str, &[&str])] = &[
    ("01", &["Biały", "White", "Weiß"]),
    ("02", &["Czarny", "Black", "Schwarz"]),
    ("03", &["Czerwony", "Red", "Rot"]),
    ("04", &["Niebieski", "Blue", "Blau"]),
    ("05", &["Zielony", "Green", "Grün"]),
    ("06", &["Żółty", "Yellow", "Gelb"]),
    ("07", &["Pomarańczowy", "Orange", "Orange"]),
    ("08", &["Różowy", "Pink", "Rosa"]),
    ("09", &["Fioletowy", "Purple", "Lila"]),
    ("10", &["Szary", "Grey", "Grau"]),
    ("11", &["Brązowy", "Brown", "Braun"]),
    ("12", &["Granatowy", "Navy", "Marineblau"]),
    ("13", &["Srebrny", "Silver", "Silber"]),
    ("14", &["Złoty", "Gold", "Gold"]),
    ("15", &["Beżowy", "Beige", "Beige"]),
    ("16", &["Błękitny", "Light blue", "Hellblau"]),
    ("17", &["Jasnozielony", "Light green", "Hellgrün"]),
    ("18", &["Bordowy", "Burgundy", "Weinrot"]),
    ("19", &["Grafitowy", "Graphite", "Graphit"]),
    ("20", &["Transparentny", "Transparent", "Transparent"]),
    ("WH", &["Biały", "White", "Weiß"]),
    ("BK", &["Czarny", "Black", "Schwarz"]),
    ("RD", &["Czerwony", "Red", "Rot"]),
    ("BL", &["Niebieski", "Blue", "Blau"]),
    ("GR", &["Zielony", "Green", "Grün"]),
    ("YE", &["Żółty", "Yellow", "Gelb"]),
    ("OR", &["Pomarańczowy", "Orange", "Orange"]),
    ("PK", &["Różowy", "Pink", "Rosa"]),
    ("PU", &["Fioletowy", "Purple", "Lila"]),
    ("GY", &["Szary", "Grey", "Grau"]),
    ("BR", &["Brązowy", "Brown", "Braun"]),
    ("NV", &["Granatowy", "Navy", "Marineblau"]),
    ("SL", &["Srebrny", "Silver", "Silber"]),
    ("GD", &["Złoty", "Gold", "Gold"]),
];

const SIZES: &[(&str, &[&str])] = &[
    ("XXXXS", &["XXXXS", "4XS"]),
    ("XXXS", &["XXXS", "3XS"]),
    ("XXS", &["XXS", "2XS"]),
    ("XS", &["XS"]),
    ("S", &["S"]),
    ("M", &["M"]),
    ("L", &["L"]),
    ("XL", &["XL"]),
    ("XXL", &["XXL", "2XL"]),
    ("XXXL", &["XXXL", "3XL"]),
    ("8GB", &["8 GB"]),
    ("16GB", &["16 GB"]),
    ("32GB", &["32 GB"]),
    ("64GB", &["64 GB"]),
    ("128GB", &["128 GB"]),
    ("256GB", &["256 GB"]),
];

fn default_color_attribute_names() -> Vec<String> {
    ["kolor", "color", "colour", "farbe", "pa_kolor", "pa_color"]
        .into_iter()
        .map(ToString::to_string)
        .collect()
}

fn default_size_attribute_names() -> Vec<String> {
    ["rozmiar", "size", "größe", "pojemność", "pa_rozmiar", "pa_size"]
        .into_iter()
        .map(ToString::to_string)
        .collect()
}

fn to_table(entries: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
    entries
        .iter()
        .map(|(code, values)| {
            (
                code.to_string(),
                values.iter().map(ToString::to_string).collect(),
            )
        })
        .collect()
}

/// Mapping from coded sku fragments to display values, most preferred first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeCodeTable {
    #[serde(default)]
    pub colors: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub sizes: HashMap<String, Vec<String>>,
    #[serde(default = "default_color_attribute_names")]
    pub color_attribute_names: Vec<String>,
    #[serde(default = "default_size_attribute_names")]
    pub size_attribute_names: Vec<String>,
}

impl Default for AttributeCodeTable {
    fn default() -> Self {
        Self::builtin()
    }
}

static CODE_TABLE: OnceCell<AttributeCodeTable> = OnceCell::new();

/// Installs the process-wide table. Only the first call has an effect.
pub fn install(table: AttributeCodeTable) -> bool {
    CODE_TABLE.set(table).is_ok()
}

pub fn code_table() -> &'static AttributeCodeTable {
    CODE_TABLE.get_or_init(AttributeCodeTable::builtin)
}

fn same_value(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

fn decode(table: &HashMap<String, Vec<String>>, code: &str, allowed: &[String]) -> String {
    let code = code.trim();
    let Some(candidates) = table.get(&code.to_uppercase()) else {
        return code.to_string();
    };
    candidates
        .iter()
        .find_map(|c| allowed.iter().find(|a| same_value(a, c)))
        .or(candidates.first())
        .cloned()
        .unwrap_or_else(|| code.to_string())
}

impl AttributeCodeTable {
    pub fn builtin() -> Self {
        Self {
            colors: to_table(COLORS),
            sizes: to_table(SIZES),
            color_attribute_names: default_color_attribute_names(),
            size_attribute_names: default_size_attribute_names(),
        }
    }

    /// Parses a table from JSON or YAML.
    pub fn from_str(data: &str) -> anyhow::Result<Self> {
        let table: Self = serde_json::from_str(data)
            .or_else(|_| serde_yaml::from_str(data))
            .context("Unable to parse attribute code table")?;
        Ok(table.normalized())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read attribute code table {path:?}"))?;
        Self::from_str(&data)
    }

    fn normalized(self) -> Self {
        let upper = |t: HashMap<String, Vec<String>>| -> HashMap<String, Vec<String>> {
            t.into_iter()
                .map(|(k, v)| (k.trim().to_uppercase(), v))
                .collect()
        };
        Self {
            colors: upper(self.colors),
            sizes: upper(self.sizes),
            ..self
        }
    }

    /// Display value for a color code: an allowed option named by the table
    /// wins, then the table's first candidate, then the code itself.
    pub fn decode_color(&self, code: &str, allowed: &[String]) -> String {
        decode(&self.colors, code, allowed)
    }

    /// Same fallback order as [`decode_color`](Self::decode_color).
    pub fn decode_size(&self, code: &str, allowed: &[String]) -> String {
        decode(&self.sizes, code, allowed)
    }

    pub fn allowed_colors(&self, record: &ProductRecord) -> Vec<String> {
        record.attribute_values(&self.color_attribute_names)
    }

    pub fn allowed_sizes(&self, record: &ProductRecord) -> Vec<String> {
        record.attribute_values(&self.size_attribute_names)
    }
}
