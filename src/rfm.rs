//! Per-customer Recency, Frequency, Monetary aggregation

use chrono::{Duration, NaiveDateTime};
use polars::prelude::*;
use tracing::debug;

use crate::data::{datetime_from_micros, CleanedTransactions};

/// Behavioral summary of one customer.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRfm {
    pub customer_id: String,
    /// Latest transaction timestamp of this customer
    pub last_purchase: NaiveDateTime,
    /// Whole days between the run's snapshot date and `last_purchase`
    pub recency: i64,
    /// Number of distinct purchase timestamps
    pub frequency: u32,
    /// Sum of line totals
    pub monetary: f64,
}

impl CustomerRfm {
    /// The raw `[recency, frequency, monetary]` feature vector
    pub fn features(&self) -> [f64; 3] {
        [self.recency as f64, self.frequency as f64, self.monetary]
    }
}

/// RFM rows for one run together with the snapshot they were measured from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RfmTable {
    /// One day after the latest transaction; `None` for an empty input
    pub snapshot_date: Option<NaiveDateTime>,
    /// Sorted by customer id
    pub customers: Vec<CustomerRfm>,
}

impl RfmTable {
    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    pub fn get(&self, customer_id: &str) -> Option<&CustomerRfm> {
        self.customers
            .binary_search_by(|c| c.customer_id.as_str().cmp(customer_id))
            .ok()
            .map(|idx| &self.customers[idx])
    }
}

/// Reference point for recency: the latest transaction in the whole dataset plus one day.
pub fn snapshot_date(transactions: &CleanedTransactions) -> crate::Result<Option<NaiveDateTime>> {
    let dates = transactions
        .frame
        .column("transaction_date")?
        .cast(&DataType::Int64)?;
    match dates.i64()?.max() {
        Some(latest) => Ok(Some(datetime_from_micros(latest)? + Duration::days(1))),
        None => Ok(None),
    }
}

/// Reduce cleaned transaction lines to one RFM row per customer.
///
/// The snapshot date is shared by every customer of the run. Frequency counts
/// distinct timestamps, so several lines bought at the same moment are one
/// purchase. An empty input yields an empty table.
pub fn compute_rfm(transactions: &CleanedTransactions) -> crate::Result<RfmTable> {
    let Some(snapshot) = snapshot_date(transactions)? else {
        return Ok(RfmTable::default());
    };

    let grouped = transactions
        .frame
        .clone()
        .lazy()
        .group_by([col("customer_id")])
        .agg([
            col("transaction_date").max().alias("last_purchase"),
            col("transaction_date").n_unique().alias("frequency"),
            col("total").sum().alias("monetary"),
        ])
        .select([
            col("customer_id"),
            col("last_purchase").cast(DataType::Int64),
            col("frequency").cast(DataType::UInt32),
            col("monetary"),
        ])
        .collect()?;

    let ids = grouped.column("customer_id")?.str()?;
    let last_purchases = grouped.column("last_purchase")?.i64()?;
    let frequencies = grouped.column("frequency")?.u32()?;
    let spends = grouped.column("monetary")?.f64()?;

    let mut customers = Vec::with_capacity(grouped.height());
    for idx in 0..grouped.height() {
        let (Some(customer_id), Some(last), Some(frequency), Some(monetary)) = (
            ids.get(idx),
            last_purchases.get(idx),
            frequencies.get(idx),
            spends.get(idx),
        ) else {
            continue;
        };
        let last_purchase = datetime_from_micros(last)?;
        customers.push(CustomerRfm {
            customer_id: customer_id.to_string(),
            last_purchase,
            recency: (snapshot - last_purchase).num_days(),
            frequency,
            monetary,
        });
    }
    customers.sort_by(|a, b| a.customer_id.cmp(&b.customer_id));

    debug!(snapshot = %snapshot, customers = customers.len(), "computed rfm features");

    Ok(RfmTable {
        snapshot_date: Some(snapshot),
        customers,
    })
}
