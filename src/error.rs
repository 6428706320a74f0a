use catalog_types::Stage;
use derive_more::{Display, Error};

/// A feed entry that could not be turned into a product record.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
#[display("Invalid record {}: {reason}", sku.as_deref().unwrap_or("<no sku>"))]
pub struct ValidationError {
    #[error(ignore)]
    pub sku: Option<String>,
    #[error(ignore)]
    pub reason: String,
}

impl ValidationError {
    pub fn new<S: Into<String>>(sku: Option<&str>, reason: S) -> Self {
        Self {
            sku: sku.map(ToString::to_string),
            reason: reason.into(),
        }
    }
}

/// Failure that prevents any processing of the feed.
#[derive(Debug, Display, Error)]
pub enum FeedError {
    #[display("Unable to read feed: {_0}")]
    Io(std::io::Error),
    #[display("Unable to parse feed: {_0}")]
    Parse(quick_xml::DeError),
}

impl From<std::io::Error> for FeedError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<quick_xml::DeError> for FeedError {
    fn from(err: quick_xml::DeError) -> Self {
        Self::Parse(err)
    }
}

/// Per-record failure inside a stage.
#[derive(Debug, Display, Error)]
pub enum ImportError {
    #[display("Stage {stage} requires stage {required} to be done for {sku}")]
    Precondition {
        #[error(ignore)]
        sku: String,
        #[error(ignore)]
        stage: Stage,
        #[error(ignore)]
        required: Stage,
    },
    #[display("Catalog rejected {sku}: {cause:#}")]
    Adapter {
        #[error(ignore)]
        sku: String,
        #[error(ignore)]
        cause: anyhow::Error,
    },
}

impl ImportError {
    pub fn adapter<S: Into<String>>(sku: S) -> impl FnOnce(anyhow::Error) -> Self {
        let sku = sku.into();
        move |cause| Self::Adapter { sku, cause }
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition { .. })
    }
}
