//! RfmForge: customer segmentation from transaction records
//!
//! Raw transaction lines are cleaned, reduced to one Recency, Frequency,
//! Monetary (RFM) row per customer, and clustered with K-Means into named
//! behavioral segments.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod rfm;
pub mod segment;
pub mod sink;

// Re-export public items for easier access
pub use cli::Args;
pub use config::{PipelineConfig, SegmenterConfig};
pub use data::{
    clean_transactions, CleanedTransactions, CsvTransactionSource, RawTable, TransactionLine,
    TransactionSource,
};
pub use error::RfmError;
pub use model::{fit_kmeans, silhouette_score, KMeansModel, RfmData};
pub use pipeline::{run_pipeline, PipelineReport};
pub use rfm::{compute_rfm, CustomerRfm, RfmTable};
pub use segment::{
    label_cluster, segment_customers, LabelingStrategy, SegmentedCustomer, Segmentation,
    SEGMENT_CATALOG,
};
pub use sink::{CsvSegmentSink, SegmentSink};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, RfmError>;
