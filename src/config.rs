//! Engine and pipeline configuration

use crate::error::RfmError;
use crate::segment::{LabelingStrategy, SEGMENT_CATALOG};

/// Default number of segments
pub const DEFAULT_CLUSTERS: usize = 4;
/// Default K-Means seed
pub const DEFAULT_SEED: u64 = 42;

/// Parameters of the segmenter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmenterConfig {
    /// Number of clusters K
    pub n_clusters: usize,
    /// Seed for the K-Means random number generator
    pub seed: u64,
    /// Independent K-Means initializations, the lowest inertia wins
    pub n_init: usize,
    /// Iteration cap for each initialization
    pub max_iters: u64,
    /// Convergence tolerance
    pub tolerance: f64,
    /// How cluster labels are mapped to segment names
    pub labeling: LabelingStrategy,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            n_clusters: DEFAULT_CLUSTERS,
            seed: DEFAULT_SEED,
            n_init: 10,
            max_iters: 300,
            tolerance: 1e-4,
            labeling: LabelingStrategy::ByIndex,
        }
    }
}

impl SegmenterConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.n_clusters < 2 {
            return Err(RfmError::InvalidConfig(format!(
                "at least 2 clusters are required, got {}",
                self.n_clusters
            )));
        }
        if self.n_init == 0 {
            return Err(RfmError::InvalidConfig("n_init must be positive".to_string()));
        }
        if self.max_iters == 0 {
            return Err(RfmError::InvalidConfig("max_iters must be positive".to_string()));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(RfmError::InvalidConfig(format!(
                "tolerance must be a positive number, got {}",
                self.tolerance
            )));
        }
        if self.labeling == LabelingStrategy::Calibrated && self.n_clusters != SEGMENT_CATALOG.len() {
            return Err(RfmError::InvalidConfig(format!(
                "calibrated labeling needs exactly {} clusters, got {}",
                SEGMENT_CATALOG.len(),
                self.n_clusters
            )));
        }
        Ok(())
    }
}

/// Parameters of a full pipeline run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub segmenter: SegmenterConfig,
    /// Rows per sink write batch
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segmenter: SegmenterConfig::default(),
            batch_size: 2000,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 {
            return Err(RfmError::InvalidConfig("batch_size must be positive".to_string()));
        }
        self.segmenter.validate()
    }
}
