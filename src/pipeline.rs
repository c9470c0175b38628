//! End-to-end run: clean, aggregate, segment, persist

use chrono::NaiveDateTime;
use tracing::info;

use crate::config::PipelineConfig;
use crate::data::{clean_transactions, CleaningStats, TransactionSource};
use crate::rfm::compute_rfm;
use crate::segment::{segment_customers, Segmentation, SEGMENT_CATALOG};
use crate::sink::SegmentSink;

/// Summary of a completed run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub raw_rows: usize,
    pub cleaning: CleaningStats,
    pub snapshot_date: Option<NaiveDateTime>,
    pub segmentation: Segmentation,
}

impl PipelineReport {
    pub fn customers(&self) -> usize {
        self.segmentation.customers.len()
    }
}

/// Run the full segmentation against a source and a sink.
///
/// The sink is only touched once segmentation has succeeded, and it stores the
/// customer table and the catalog together, so a failed run leaves previously
/// stored results in place.
pub fn run_pipeline<S, K>(source: &mut S, sink: &mut K, config: &PipelineConfig) -> crate::Result<PipelineReport>
where
    S: TransactionSource + ?Sized,
    K: SegmentSink + ?Sized,
{
    config.validate()?;

    let raw = source.load()?;
    info!(rows = raw.len(), columns = raw.headers.len(), "loaded raw transactions");

    let cleaned = clean_transactions(&raw)?;
    info!(
        retained = cleaned.stats.retained,
        dropped = cleaned.stats.dropped(),
        "cleaned transactions"
    );

    let rfm = compute_rfm(&cleaned)?;
    if let Some(snapshot) = rfm.snapshot_date {
        info!(snapshot = %snapshot.date(), "snapshot date");
    }
    info!(customers = rfm.len(), "computed rfm");

    let segmentation = segment_customers(&rfm, &config.segmenter)?;
    info!(
        silhouette = segmentation.silhouette,
        inertia = segmentation.inertia,
        labeling = ?segmentation.labeling,
        "segmented customers"
    );
    for profile in &segmentation.profiles {
        info!(
            cluster_id = profile.cluster_id,
            segment = %profile.segment_name,
            customers = profile.customers,
            "segment size"
        );
    }

    sink.store(&segmentation.customers, &SEGMENT_CATALOG)?;
    info!(
        rows = segmentation.customers.len(),
        segments = SEGMENT_CATALOG.len(),
        "stored segmentation"
    );

    Ok(PipelineReport {
        raw_rows: raw.len(),
        cleaning: cleaned.stats,
        snapshot_date: rfm.snapshot_date,
        segmentation,
    })
}
