//! Persistence of segmentation results

use csv::Writer;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::segment::{SegmentDefinition, SegmentedCustomer};

/// Timestamp layout used for `last_purchase_date`
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Destination for a finished segmentation.
///
/// `store` replaces whatever an earlier run stored, and either both tables are
/// replaced or neither is. The customer table carries a `cluster_id` column next
/// to `segment_name` on purpose, so consumers can join on the numeric id.
pub trait SegmentSink {
    fn store(&mut self, customers: &[SegmentedCustomer], catalog: &[SegmentDefinition]) -> crate::Result<()>;
}

#[derive(Debug, Serialize)]
struct CustomerRecord<'a> {
    customer_id: &'a str,
    recency: i64,
    frequency: u32,
    monetary: f64,
    last_purchase_date: String,
    cluster_id: usize,
    segment_name: &'a str,
}

impl<'a> From<&'a SegmentedCustomer> for CustomerRecord<'a> {
    fn from(customer: &'a SegmentedCustomer) -> Self {
        Self {
            customer_id: &customer.rfm.customer_id,
            recency: customer.rfm.recency,
            frequency: customer.rfm.frequency,
            monetary: customer.rfm.monetary,
            last_purchase_date: customer.rfm.last_purchase.format(DATE_FORMAT).to_string(),
            cluster_id: customer.cluster_id,
            segment_name: &customer.segment_name,
        }
    }
}

#[derive(Debug, Serialize)]
struct SegmentRecord<'a> {
    segment_id: &'a str,
    segment_name: &'a str,
    description: &'a str,
}

const CUSTOMER_HEADERS: [&str; 7] = [
    "customer_id",
    "recency",
    "frequency",
    "monetary",
    "last_purchase_date",
    "cluster_id",
    "segment_name",
];

/// Writes customers and the segment catalog to two CSV files.
///
/// Both files are first written to temporary files next to their targets and
/// renamed into place only once both are complete.
#[derive(Debug, Clone)]
pub struct CsvSegmentSink {
    customers_path: PathBuf,
    catalog_path: PathBuf,
    batch_size: usize,
}

impl CsvSegmentSink {
    pub fn new(customers_path: impl Into<PathBuf>, catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            customers_path: customers_path.into(),
            catalog_path: catalog_path.into(),
            batch_size: 2000,
        }
    }

    /// Rows written between flushes; zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn customers_path(&self) -> &Path {
        &self.customers_path
    }

    pub fn catalog_path(&self) -> &Path {
        &self.catalog_path
    }

    fn write_customers<W: Write>(&self, out: W, customers: &[SegmentedCustomer]) -> crate::Result<()> {
        let mut writer = Writer::from_writer(out);
        if customers.is_empty() {
            writer.write_record(CUSTOMER_HEADERS)?;
        }

        let batches = customers.len().div_ceil(self.batch_size);
        for (idx, batch) in customers.chunks(self.batch_size).enumerate() {
            for customer in batch {
                writer.serialize(CustomerRecord::from(customer))?;
            }
            writer.flush()?;
            debug!(batch = idx + 1, batches, rows = batch.len(), "wrote customer batch");
        }

        writer.flush()?;
        Ok(())
    }

    fn write_catalog<W: Write>(&self, out: W, catalog: &[SegmentDefinition]) -> crate::Result<()> {
        let mut writer = Writer::from_writer(out);
        for segment in catalog {
            writer.serialize(SegmentRecord {
                segment_id: segment.slug,
                segment_name: segment.name,
                description: segment.description,
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Temporary file in the directory of `target`, so the final rename stays on one filesystem.
fn staging_file(target: &Path) -> crate::Result<NamedTempFile> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok(NamedTempFile::new_in(dir)?)
}

impl SegmentSink for CsvSegmentSink {
    fn store(&mut self, customers: &[SegmentedCustomer], catalog: &[SegmentDefinition]) -> crate::Result<()> {
        let mut staged_customers = staging_file(&self.customers_path)?;
        self.write_customers(staged_customers.as_file_mut(), customers)?;

        let mut staged_catalog = staging_file(&self.catalog_path)?;
        self.write_catalog(staged_catalog.as_file_mut(), catalog)?;

        staged_customers.as_file().sync_all()?;
        staged_catalog.as_file().sync_all()?;

        // Nothing above touched the targets; from here on both renames must land.
        staged_customers
            .persist(&self.customers_path)
            .map_err(|e| e.error)?;
        staged_catalog.persist(&self.catalog_path).map_err(|e| e.error)?;

        debug!(
            customers = %self.customers_path.display(),
            catalog = %self.catalog_path.display(),
            "replaced stored segmentation"
        );
        Ok(())
    }
}
