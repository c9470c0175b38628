//! RfmForge: RFM customer segmentation CLI
//!
//! Loads the transaction CSV, runs the segmentation pipeline and writes the
//! segmented customer table plus the segment catalog.

use anyhow::{Context, Result};
use clap::Parser;
use rfmforge::{run_pipeline, Args, CsvSegmentSink, CsvTransactionSource};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let args = Args::parse();
    setup_logging(args.log_level());

    let config = args.pipeline_config();
    config.validate().context("invalid configuration")?;

    let start_time = Instant::now();
    let mut source = CsvTransactionSource::new(&args.input);
    let mut sink = CsvSegmentSink::new(&args.output, &args.segments_output)
        .with_batch_size(config.batch_size);

    let report = run_pipeline(&mut source, &mut sink, &config)
        .with_context(|| format!("segmentation of {} failed", args.input.display()))?;

    println!("\n=== Segment Statistics ===");
    println!("Customers: {}", report.customers());
    println!("Silhouette score: {:.4}", report.segmentation.silhouette);
    println!("Within-cluster sum of squares: {:.2}", report.segmentation.inertia);
    println!();
    println!("  Cluster | Segment                    | Customers | Recency | Frequency | Monetary");
    println!("  --------|----------------------------|-----------|---------|-----------|----------");
    for profile in &report.segmentation.profiles {
        println!(
            "  {:7} | {:26} | {:9} | {:7.1} | {:9.2} | {:10.2}",
            profile.cluster_id,
            profile.segment_name,
            profile.customers,
            profile.mean_recency,
            profile.mean_frequency,
            profile.mean_monetary
        );
    }

    info!(
        elapsed_secs = start_time.elapsed().as_secs_f64(),
        output = %args.output.display(),
        segments = %args.segments_output.display(),
        "pipeline complete"
    );

    Ok(())
}

/// Install the global `tracing` subscriber; `RUST_LOG` wins over `default_level`.
fn setup_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}
