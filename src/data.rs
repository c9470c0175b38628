//! Transaction table loading and row-level cleaning

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, Trim};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::RfmError;

/// Columns the engine cannot run without.
pub const REQUIRED_COLUMNS: [&str; 5] = [
    "transaction_id",
    "customer_id",
    "transaction_date",
    "total_amount",
    "total",
];

/// Descriptive columns tagged as categorical during cleaning.
pub const CATEGORICAL_COLUMNS: [&str; 10] = [
    "product_name",
    "category",
    "brand",
    "storage",
    "color",
    "payment_method",
    "shipping_method",
    "delivery_time",
    "coupon_code",
    "transaction_city",
];

/// Columns coerced to numbers during cleaning.
pub const NUMERIC_COLUMNS: [&str; 9] = [
    "quantity",
    "unit_price",
    "item_discount",
    "total",
    "total_amount",
    "price",
    "release_year",
    "sales_factor",
    "age",
];

/// Denormalized transaction table as delivered by a data source.
///
/// Every cell is kept as raw text; empty cells are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    /// Column names in source order
    pub headers: Vec<String>,
    /// One entry per product line, aligned with `headers`
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Option<String>>) {
        self.rows.push(row);
    }

    /// Position of a column by exact name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All-text dataframe with one column per header; short rows are padded with nulls.
    pub fn to_frame(&self) -> crate::Result<DataFrame> {
        let columns: Vec<Series> = self
            .headers
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let cells: Vec<Option<String>> = self
                    .rows
                    .iter()
                    .map(|row| row.get(idx).cloned().flatten())
                    .collect();
                Series::new(name, cells)
            })
            .collect();
        Ok(DataFrame::new(columns)?)
    }
}

/// How a non-core column is interpreted after cleaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Categorical,
    Numeric,
    Text,
}

impl ColumnKind {
    pub fn of(column: &str) -> Self {
        if CATEGORICAL_COLUMNS.contains(&column) {
            ColumnKind::Categorical
        } else if NUMERIC_COLUMNS.contains(&column) {
            ColumnKind::Numeric
        } else {
            ColumnKind::Text
        }
    }
}

/// A passenger value carried through cleaning untouched by the RFM math.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Categorical(Option<String>),
    Numeric(Option<f64>),
    Text(Option<String>),
}

impl Attribute {
    fn from_series(kind: ColumnKind, series: &Series, idx: usize) -> PolarsResult<Self> {
        Ok(match kind {
            ColumnKind::Categorical => Attribute::Categorical(series.str()?.get(idx).map(str::to_string)),
            ColumnKind::Numeric => Attribute::Numeric(series.f64()?.get(idx)),
            ColumnKind::Text => Attribute::Text(series.str()?.get(idx).map(str::to_string)),
        })
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Attribute::Numeric(value) => *value,
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::Categorical(value) | Attribute::Text(value) => value.as_deref(),
            Attribute::Numeric(_) => None,
        }
    }
}

/// One validated product line of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionLine {
    pub transaction_id: String,
    pub customer_id: String,
    /// Purchase timestamp, normalized to UTC
    pub transaction_date: NaiveDateTime,
    /// Amount of the whole transaction; missing when unparseable
    pub total_amount: Option<f64>,
    /// Amount of this line, always strictly positive
    pub total: f64,
    /// Descriptive columns keyed by column name
    pub attributes: BTreeMap<String, Attribute>,
}

impl TransactionLine {
    pub fn attribute(&self, column: &str) -> Option<&Attribute> {
        self.attributes.get(column)
    }
}

/// Row counts per cleaning outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleaningStats {
    pub input_rows: usize,
    pub duplicates: usize,
    pub invalid_dates: usize,
    pub non_positive_totals: usize,
    pub missing_customers: usize,
    pub retained: usize,
}

impl CleaningStats {
    pub fn dropped(&self) -> usize {
        self.input_rows - self.retained
    }
}

/// Output of [`clean_transactions`].
///
/// `frame` keeps the source columns: `transaction_date` as a UTC datetime,
/// numeric columns as `Float64`, everything else as text.
#[derive(Debug, Clone, Default)]
pub struct CleanedTransactions {
    pub frame: DataFrame,
    pub stats: CleaningStats,
}

impl CleanedTransactions {
    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Typed view of the cleaned rows, in source order.
    pub fn lines(&self) -> crate::Result<Vec<TransactionLine>> {
        let frame = &self.frame;
        let transaction_ids = frame.column("transaction_id")?.str()?;
        let customer_ids = frame.column("customer_id")?.str()?;
        let dates = frame.column("transaction_date")?.cast(&DataType::Int64)?;
        let dates = dates.i64()?;
        let amounts = frame.column("total_amount")?.f64()?;
        let totals = frame.column("total")?.f64()?;

        let passengers: Vec<(&str, ColumnKind, &Series)> = frame
            .get_columns()
            .iter()
            .filter(|series| !REQUIRED_COLUMNS.contains(&series.name()))
            .map(|series| (series.name(), ColumnKind::of(series.name()), series))
            .collect();

        let mut lines = Vec::with_capacity(frame.height());
        for idx in 0..frame.height() {
            let (Some(customer_id), Some(micros), Some(total)) =
                (customer_ids.get(idx), dates.get(idx), totals.get(idx))
            else {
                continue;
            };

            let mut attributes = BTreeMap::new();
            for &(name, kind, series) in &passengers {
                attributes.insert(name.to_string(), Attribute::from_series(kind, series, idx)?);
            }

            lines.push(TransactionLine {
                transaction_id: transaction_ids.get(idx).unwrap_or_default().to_string(),
                customer_id: customer_id.to_string(),
                transaction_date: datetime_from_micros(micros)?,
                total_amount: amounts.get(idx),
                total,
                attributes,
            });
        }
        Ok(lines)
    }
}

/// Validate and normalize a raw transaction table.
///
/// Exact duplicate rows are dropped (first occurrence wins), timestamps are
/// parsed, numeric columns coerced and categorical columns tagged. Rows with an
/// unparseable date, a blank customer id, or a `total` that is missing or not
/// strictly positive are dropped. Malformed values never fail the batch; only
/// missing required columns or an empty table do.
pub fn clean_transactions(table: &RawTable) -> crate::Result<CleanedTransactions> {
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| table.column_index(column).is_none())
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(RfmError::MissingColumns(missing));
    }
    if table.is_empty() {
        return Err(RfmError::EmptyInput);
    }

    let raw = table.to_frame()?;
    let mut stats = CleaningStats {
        input_rows: raw.height(),
        ..CleaningStats::default()
    };

    // Duplicates are judged on the raw text, before any coercion.
    let unique = raw
        .lazy()
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()?;
    stats.duplicates = stats.input_rows - unique.height();

    let mut coercions = vec![
        col("transaction_date").map(
            coerce_timestamps,
            GetOutput::from_type(DataType::Datetime(TimeUnit::Microseconds, None)),
        ),
        col("customer_id").map(coerce_identifiers, GetOutput::from_type(DataType::String)),
    ];
    coercions.extend(
        table
            .headers
            .iter()
            .filter(|name| ColumnKind::of(name) == ColumnKind::Numeric)
            .map(|name| col(name.as_str()).map(coerce_numbers, GetOutput::from_type(DataType::Float64))),
    );
    let typed = unique.clone().lazy().with_columns(coercions).collect()?;

    let dated = typed
        .lazy()
        .filter(col("transaction_date").is_not_null())
        .collect()?;
    stats.invalid_dates = unique.height() - dated.height();

    let positive = dated
        .clone()
        .lazy()
        .filter(col("total").gt(lit(0.0)))
        .collect()?;
    stats.non_positive_totals = dated.height() - positive.height();

    let frame = positive
        .clone()
        .lazy()
        .filter(col("customer_id").is_not_null())
        .collect()?;
    stats.missing_customers = positive.height() - frame.height();

    stats.retained = frame.height();
    debug!(
        input = stats.input_rows,
        duplicates = stats.duplicates,
        invalid_dates = stats.invalid_dates,
        non_positive_totals = stats.non_positive_totals,
        missing_customers = stats.missing_customers,
        retained = stats.retained,
        "cleaned transaction table"
    );

    Ok(CleanedTransactions { frame, stats })
}

/// Unparseable timestamps become null.
fn coerce_timestamps(series: Series) -> PolarsResult<Option<Series>> {
    let micros: Int64Chunked = series
        .str()?
        .into_iter()
        .map(|value| {
            value
                .and_then(parse_timestamp)
                .map(|ts| ts.and_utc().timestamp_micros())
        })
        .collect();
    Ok(Some(
        micros
            .with_name(series.name())
            .into_datetime(TimeUnit::Microseconds, None)
            .into_series(),
    ))
}

/// Malformed and non-finite numbers become null.
fn coerce_numbers(series: Series) -> PolarsResult<Option<Series>> {
    let numbers: Float64Chunked = series
        .str()?
        .into_iter()
        .map(|value| value.and_then(parse_number))
        .collect();
    Ok(Some(numbers.with_name(series.name()).into_series()))
}

/// Identifiers are trimmed; blank ones become null.
fn coerce_identifiers(series: Series) -> PolarsResult<Option<Series>> {
    let ids: StringChunked = series
        .str()?
        .into_iter()
        .map(|value| value.map(str::trim).filter(|id| !id.is_empty()))
        .collect();
    Ok(Some(ids.with_name(series.name()).into_series()))
}

/// Convert a stored UTC microsecond timestamp back to a naive datetime.
pub fn datetime_from_micros(micros: i64) -> crate::Result<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.naive_utc())
        .ok_or(RfmError::TimestampOutOfRange(micros))
}

/// Parse a timestamp in any of the accepted layouts, normalized to UTC.
///
/// Returns `None` for anything unrecognised.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(value, format) {
            return Some(dt.naive_utc());
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Parse a numeric cell; empty, malformed and non-finite values are missing.
pub fn parse_number(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
}

/// Anything that can hand the engine a denormalized transaction table.
pub trait TransactionSource {
    fn load(&mut self) -> crate::Result<RawTable>;
}

impl TransactionSource for RawTable {
    fn load(&mut self) -> crate::Result<RawTable> {
        Ok(self.clone())
    }
}

/// Reads the transaction table from a headered CSV file.
#[derive(Debug, Clone)]
pub struct CsvTransactionSource {
    path: PathBuf,
}

impl CsvTransactionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TransactionSource for CsvTransactionSource {
    fn load(&mut self) -> crate::Result<RawTable> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_path(&self.path)?;

        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut table = RawTable::new(headers);

        for record in reader.records() {
            let record = record?;
            table.push_row(
                record
                    .iter()
                    .map(|value| (!value.is_empty()).then(|| value.to_string()))
                    .collect(),
            );
        }

        debug!(path = %self.path.display(), rows = table.len(), "loaded transaction csv");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADERS: [&str; 7] = [
        "transaction_id",
        "customer_id",
        "transaction_date",
        "total_amount",
        "total",
        "payment_method",
        "quantity",
    ];

    fn table(rows: &[[&str; 7]]) -> RawTable {
        let mut table = RawTable::new(HEADERS.iter().map(|h| h.to_string()).collect());
        for row in rows {
            table.push_row(
                row.iter()
                    .map(|v| (!v.is_empty()).then(|| v.to_string()))
                    .collect(),
            );
        }
        table
    }

    #[test]
    fn test_duplicates_are_removed() {
        let raw = table(&[
            ["T1", "C1", "2024-01-01", "80", "50", "card", "1"],
            ["T1", "C1", "2024-01-01", "80", "50", "card", "1"],
            ["T1", "C1", "2024-01-01", "80", "30", "card", "1"],
        ]);
        let cleaned = clean_transactions(&raw).unwrap();
        let lines = cleaned.lines().unwrap();

        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned.stats.duplicates, 1);
        assert_ne!(lines[0], lines[1]);
        assert_eq!(lines[1].total, 30.0);
    }

    #[test]
    fn test_invalid_dates_and_totals_are_dropped() {
        let raw = table(&[
            ["T1", "C1", "not a date", "10", "10", "card", "1"],
            ["T2", "C1", "2024-01-02", "10", "0", "card", "1"],
            ["T3", "C1", "2024-01-03", "10", "-5", "card", "1"],
            ["T4", "C1", "2024-01-04", "10", "abc", "card", "1"],
            ["T5", "C1", "2024-01-05", "10", "", "card", "1"],
            ["T6", "C1", "2024-01-06", "10", "12.5", "card", "1"],
        ]);
        let cleaned = clean_transactions(&raw).unwrap();

        assert_eq!(cleaned.len(), 1);
        let lines = cleaned.lines().unwrap();
        assert_eq!(lines[0].transaction_id, "T6");
        assert_eq!(cleaned.stats.invalid_dates, 1);
        assert_eq!(cleaned.stats.non_positive_totals, 4);
        assert_eq!(cleaned.stats.dropped(), 5);
        assert!(lines.iter().all(|line| line.total > 0.0));
    }

    #[test]
    fn test_numeric_coercion_keeps_row() {
        let raw = table(&[["T1", "C1", "2024-01-01", "n/a", "20", "card", "two"]]);
        let cleaned = clean_transactions(&raw).unwrap();

        let lines = cleaned.lines().unwrap();
        let line = &lines[0];
        assert_eq!(line.total_amount, None);
        assert_eq!(line.attribute("quantity"), Some(&Attribute::Numeric(None)));
        assert_eq!(
            line.attribute("payment_method"),
            Some(&Attribute::Categorical(Some("card".to_string())))
        );
        assert_eq!(line.attribute("payment_method").unwrap().as_str(), Some("card"));
    }

    #[test]
    fn test_blank_customer_is_dropped() {
        let raw = table(&[
            ["T1", "", "2024-01-01", "20", "20", "card", "1"],
            ["T2", "C2", "2024-01-01", "20", "20", "card", "1"],
        ]);
        let cleaned = clean_transactions(&raw).unwrap();

        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned.stats.missing_customers, 1);
    }

    #[test]
    fn test_duplicates_judged_before_coercion() {
        // same parsed values, different raw text
        let raw = table(&[
            ["T1", "C1", "2024-01-01", "80", "50", "card", "1"],
            ["T1", "C1", "2024-01-01 00:00:00", "80", "50.0", "card", "1"],
        ]);
        let cleaned = clean_transactions(&raw).unwrap();
        assert_eq!(cleaned.stats.duplicates, 0);
        assert_eq!(cleaned.len(), 2);
    }

    #[test]
    fn test_cleaned_frame_types() {
        let raw = table(&[["T1", " C1 ", "2024-01-01T10:30:00+02:00", "80", "50", "card", "3"]]);
        let cleaned = clean_transactions(&raw).unwrap();

        let frame = &cleaned.frame;
        assert_eq!(
            frame.column("transaction_date").unwrap().dtype(),
            &DataType::Datetime(TimeUnit::Microseconds, None)
        );
        assert_eq!(frame.column("total").unwrap().dtype(), &DataType::Float64);
        assert_eq!(frame.column("quantity").unwrap().dtype(), &DataType::Float64);
        assert_eq!(frame.column("payment_method").unwrap().dtype(), &DataType::String);

        let line = &cleaned.lines().unwrap()[0];
        assert_eq!(line.customer_id, "C1");
        assert_eq!(line.transaction_date.to_string(), "2024-01-01 08:30:00");
        assert_eq!(line.attribute("quantity").unwrap().as_number(), Some(3.0));
    }

    #[test]
    fn test_missing_required_columns() {
        let mut raw = RawTable::new(vec!["transaction_id".to_string(), "customer_id".to_string()]);
        raw.push_row(vec![Some("T1".to_string()), Some("C1".to_string())]);

        match clean_transactions(&raw) {
            Err(RfmError::MissingColumns(columns)) => {
                assert_eq!(columns, vec!["transaction_date", "total_amount", "total"]);
            }
            other => panic!("expected MissingColumns, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_table_is_fatal() {
        let raw = table(&[]);
        assert!(matches!(clean_transactions(&raw), Err(RfmError::EmptyInput)));
    }

    #[test]
    fn test_all_rows_filtered_is_not_an_error() {
        let raw = table(&[["T1", "C1", "garbage", "1", "1", "card", "1"]]);
        let cleaned = clean_transactions(&raw).unwrap();
        assert!(cleaned.is_empty());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();

        assert_eq!(parse_timestamp("2024-01-01 10:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T10:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T10:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01 10:30:00+00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T17:30:00+07:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-01-01"),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_timestamp("2024-13-45"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 12.5 "), Some(12.5));
        assert_eq!(parse_number("1e3"), Some(1000.0));
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("twelve"), None);
    }

    #[test]
    fn test_csv_source() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "transaction_id,customer_id,transaction_date,total_amount,total,brand").unwrap();
        writeln!(file, "T1,C1,2024-01-01 09:00:00,100,60,Acme").unwrap();
        writeln!(file, "T1,C1,2024-01-01 09:00:00,100,40,").unwrap();

        let mut source = CsvTransactionSource::new(file.path());
        let raw = source.load().unwrap();

        assert_eq!(raw.headers.len(), 6);
        assert_eq!(raw.len(), 2);
        assert_eq!(raw.rows[1][5], None);
        assert_eq!(raw.rows[0][5].as_deref(), Some("Acme"));
    }
}
