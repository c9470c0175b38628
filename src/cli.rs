//! Command-line interface definitions and argument parsing

use clap::Parser;
use std::path::PathBuf;

use crate::config::{PipelineConfig, SegmenterConfig, DEFAULT_CLUSTERS, DEFAULT_SEED};
use crate::segment::LabelingStrategy;

/// Customer segmentation using K-Means clustering on RFM features
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the denormalized transaction CSV
    #[arg(short, long, env = "RFM_INPUT", default_value = "transactions.csv")]
    pub input: PathBuf,

    /// Where the segmented customer table is written
    #[arg(short, long, env = "RFM_OUTPUT", default_value = "rfm_features.csv")]
    pub output: PathBuf,

    /// Where the segment catalog is written
    #[arg(long, env = "RFM_SEGMENTS_OUTPUT", default_value = "segments.csv")]
    pub segments_output: PathBuf,

    /// Number of clusters for K-Means
    #[arg(short = 'k', long, env = "RFM_CLUSTERS", default_value_t = DEFAULT_CLUSTERS)]
    pub clusters: usize,

    /// Seed for the K-Means initialization
    #[arg(long, env = "RFM_SEED", default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Number of K-Means initializations
    #[arg(long, env = "RFM_N_INIT", default_value = "10")]
    pub n_init: usize,

    /// Maximum iterations for K-Means algorithm
    #[arg(long, default_value = "300")]
    pub max_iters: u64,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value = "1e-4")]
    pub tolerance: f64,

    /// How cluster labels are turned into segment names
    #[arg(long, env = "RFM_LABELING", value_enum, default_value_t = LabelingStrategy::ByIndex)]
    pub labeling: LabelingStrategy,

    /// Rows per output write batch
    #[arg(long, default_value = "2000")]
    pub batch_size: usize,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            segmenter: SegmenterConfig {
                n_clusters: self.clusters,
                seed: self.seed,
                n_init: self.n_init,
                max_iters: self.max_iters,
                tolerance: self.tolerance,
                labeling: self.labeling,
            },
            batch_size: self.batch_size,
        }
    }

    /// Default `tracing` filter directive for this invocation
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}
