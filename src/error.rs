//! Error types for the segmentation engine

use thiserror::Error;

/// All errors produced while building a customer segmentation.
///
/// Variants fall into three groups: bad input shape (`MissingColumns`,
/// `EmptyInput`), insufficient data (`InsufficientCustomers`) and numerically
/// degenerate input (`DegenerateFeature`, `DegenerateClustering`). Row-level
/// anomalies never surface here; the cleaner absorbs them.
#[derive(Error, Debug)]
pub enum RfmError {
    /// The transaction table lacks columns the engine cannot run without.
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// The transaction table contains no rows at all.
    #[error("Transaction table is empty")]
    EmptyInput,

    /// Fewer customers than clusters were available after aggregation.
    #[error("Need at least {clusters} customers to form {clusters} segments, found {customers}")]
    InsufficientCustomers { customers: usize, clusters: usize },

    /// A transformed feature cannot be standardized.
    #[error("Feature '{feature}' is degenerate: {reason}")]
    DegenerateFeature {
        feature: &'static str,
        reason: String,
    },

    /// The clustering produced a partition the quality metric is undefined for.
    #[error("Degenerate clustering: {0}")]
    DegenerateClustering(String),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The K-Means backend failed to fit.
    #[error("K-Means fitting failed: {0}")]
    Clustering(#[from] linfa_clustering::KMeansError),

    /// A dataframe operation failed.
    #[error("Dataframe error: {0}")]
    Frame(#[from] polars::prelude::PolarsError),

    /// A stored timestamp cannot be represented as a calendar date.
    #[error("Timestamp out of range: {0} microseconds since epoch")]
    TimestampOutOfRange(i64),

    /// A CSV document could not be read or written.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RfmError {
    /// True for errors caused by the shape of the input table.
    pub fn is_input_shape(&self) -> bool {
        matches!(self, RfmError::MissingColumns(_) | RfmError::EmptyInput)
    }

    /// True for errors caused by too little data to cluster.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, RfmError::InsufficientCustomers { .. })
    }

    /// True for errors caused by a numerically degenerate feature space.
    pub fn is_degenerate(&self) -> bool {
        matches!(
            self,
            RfmError::DegenerateFeature { .. } | RfmError::DegenerateClustering(_)
        )
    }
}
