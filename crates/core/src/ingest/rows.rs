use crate::domain::record::{RawRecord, RecordMetadata};
use crate::error::{CoreError, Result};
use csv::StringRecord;
use std::borrow::Cow;
use std::fs::File;
use std::io::Read;
use std::path::Path;

// Only the first few bad rows are logged one by one; the rest are only counted.
const MAX_LOGGED_ROW_ERRORS: usize = 10;

// Canonical export column order, used when a header name is not recognized.
const POS_DATE: usize = 0;
const POS_LABEL: usize = 1;
const POS_LOCATOR: usize = 2;
const POS_CLICKS: usize = 3;
const POS_IMPRESSIONS: usize = 4;
const POS_CTR: usize = 5;
const POS_POSITION: usize = 6;
const POS_COUNTRY: usize = 7;
const POS_DEVICE: usize = 8;

/// Counters for one ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub rows_read: usize,
    pub rows_yielded: usize,
    pub rows_skipped: usize,
    pub header_rows_dropped: usize,
}

/// Column indexes resolved from the header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    pub date: usize,
    pub label: usize,
    pub locator: usize,
    pub clicks: usize,
    pub impressions: usize,
    pub ctr: usize,
    pub position: usize,
    pub country: usize,
    pub device: usize,
    /// The date column's header text, used to spot repeated header rows.
    pub date_label: String,
}

impl ColumnMap {
    pub fn from_headers(headers: &StringRecord) -> Self {
        let names: Vec<String> = headers.iter().map(normalize_header_name).collect();
        let find = |aliases: &[&str], fallback: usize| {
            names
                .iter()
                .position(|n| aliases.contains(&n.as_str()))
                .unwrap_or(fallback)
        };

        let date = find(&["date", "day"], POS_DATE);
        let date_label = headers
            .get(date)
            .map(|s| s.trim().trim_start_matches('\u{feff}').to_string())
            .unwrap_or_default();

        Self {
            date,
            label: find(&["query", "top queries", "label"], POS_LABEL),
            locator: find(&["page", "url", "top pages", "locator"], POS_LOCATOR),
            clicks: find(&["clicks"], POS_CLICKS),
            impressions: find(&["impressions"], POS_IMPRESSIONS),
            ctr: find(&["ctr", "click_through_rate", "click through rate"], POS_CTR),
            position: find(&["position", "mean_position", "avg position"], POS_POSITION),
            country: find(&["country"], POS_COUNTRY),
            device: find(&["device"], POS_DEVICE),
            date_label,
        }
    }

    fn is_header_row(&self, record: &StringRecord) -> bool {
        if self.date_label.is_empty() {
            return false;
        }
        record
            .get(self.date)
            .map(|v| v.trim().trim_start_matches('\u{feff}'))
            .is_some_and(|v| v.eq_ignore_ascii_case(&self.date_label))
    }
}

fn normalize_header_name(name: &str) -> String {
    name.trim()
        .trim_start_matches('\u{feff}')
        .trim()
        .to_ascii_lowercase()
}

/// Lazily yields [`RawRecord`]s from a delimited export.
///
/// The stream is single-pass. Rows with an empty date key (or that the CSV
/// layer cannot decode) are skipped and counted; once more than
/// `error_budget` rows have been skipped the iterator yields
/// [`CoreError::SourceCorrupted`] and stops. A stream that ends without a
/// single valid record also ends with `SourceCorrupted`.
pub struct RowIngestor<R: Read> {
    reader: csv::Reader<R>,
    columns: ColumnMap,
    record: StringRecord,
    stats: IngestStats,
    error_budget: usize,
    logged_errors: usize,
    done: bool,
}

impl RowIngestor<File> {
    pub fn from_path(path: &Path, error_budget: usize) -> Result<Self> {
        let file = File::open(path).map_err(|e| CoreError::from_source_io(path, e))?;
        Self::new(file, error_budget)
    }
}

impl<R: Read> RowIngestor<R> {
    pub fn new(input: R, error_budget: usize) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .quoting(true)
            .double_quote(true)
            .trim(csv::Trim::All)
            .from_reader(input);

        let headers = reader.headers().map_err(classify_csv_error)?.clone();
        let columns = ColumnMap::from_headers(&headers);
        tracing::debug!(?columns, "resolved export columns");

        Ok(Self {
            reader,
            columns,
            record: StringRecord::new(),
            stats: IngestStats::default(),
            error_budget,
            logged_errors: 0,
            done: false,
        })
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Counts a skipped row; returns the fatal error once the budget is exhausted.
    fn skip_row(&mut self, reason: &str) -> Option<CoreError> {
        self.stats.rows_skipped += 1;
        if self.logged_errors < MAX_LOGGED_ROW_ERRORS {
            tracing::warn!(
                row = self.stats.rows_read,
                skipped = self.stats.rows_skipped,
                reason,
                "skipping malformed export row"
            );
            self.logged_errors += 1;
        }

        if self.stats.rows_skipped > self.error_budget {
            self.done = true;
            tracing::error!(
                skipped = self.stats.rows_skipped,
                budget = self.error_budget,
                "row error budget exceeded; aborting ingestion"
            );
            return Some(CoreError::SourceCorrupted(format!(
                "more than {} malformed rows (after {} rows read)",
                self.error_budget, self.stats.rows_read
            )));
        }
        None
    }

    fn finish(&mut self) -> Option<Result<RawRecord>> {
        self.done = true;
        tracing::info!(
            rows_read = self.stats.rows_read,
            rows_yielded = self.stats.rows_yielded,
            rows_skipped = self.stats.rows_skipped,
            header_rows_dropped = self.stats.header_rows_dropped,
            "export ingestion finished"
        );
        if self.stats.rows_yielded == 0 {
            return Some(Err(CoreError::SourceCorrupted(
                "export is empty or contains no valid rows".to_string(),
            )));
        }
        None
    }

    fn to_raw_record(&self) -> RawRecord {
        let field = |idx: usize| self.record.get(idx).unwrap_or("");
        RawRecord {
            date: field(self.columns.date).to_string(),
            clicks: parse_metric(field(self.columns.clicks)),
            impressions: parse_metric(field(self.columns.impressions)),
            click_through_rate: parse_metric(field(self.columns.ctr)),
            mean_position: parse_metric(field(self.columns.position)),
            metadata: RecordMetadata {
                label: field(self.columns.label).to_string(),
                locator: field(self.columns.locator).to_string(),
                country: field(self.columns.country).to_string(),
                device: field(self.columns.device).to_string(),
            },
        }
    }
}

impl<R: Read> Iterator for RowIngestor<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            match self.reader.read_record(&mut self.record) {
                Ok(true) => {
                    self.stats.rows_read += 1;

                    if self.columns.is_header_row(&self.record) {
                        self.stats.header_rows_dropped += 1;
                        continue;
                    }

                    let has_date = self
                        .record
                        .get(self.columns.date)
                        .is_some_and(|d| !d.is_empty());
                    if !has_date {
                        if let Some(fatal) = self.skip_row("missing date key") {
                            return Some(Err(fatal));
                        }
                        continue;
                    }

                    self.stats.rows_yielded += 1;
                    return Some(Ok(self.to_raw_record()));
                }
                Ok(false) => return self.finish(),
                Err(err) => {
                    if matches!(err.kind(), csv::ErrorKind::Io(_)) {
                        self.done = true;
                        return Some(Err(classify_csv_error(err)));
                    }
                    self.stats.rows_read += 1;
                    let reason = format!("undecodable row: {err}");
                    if let Some(fatal) = self.skip_row(&reason) {
                        return Some(Err(fatal));
                    }
                }
            }
        }
    }
}

fn classify_csv_error(err: csv::Error) -> CoreError {
    match err.into_kind() {
        csv::ErrorKind::Io(io) => CoreError::SourceIo(io.to_string()),
        other => CoreError::SourceCorrupted(format!("{other:?}")),
    }
}

/// Lenient numeric parse: blanks, junk and non-finite values become 0.
///
/// Accepts surrounding whitespace, a trailing `%` (the number is kept as
/// written) and `,` thousands separators.
pub fn parse_metric(raw: &str) -> f64 {
    let s = raw.trim();
    let s = s.strip_suffix('%').unwrap_or(s).trim();
    if s.is_empty() {
        return 0.0;
    }

    let cleaned: Cow<'_, str> = if s.contains(',') {
        Cow::Owned(s.replace(',', ""))
    } else {
        Cow::Borrowed(s)
    };

    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "date,query,page,clicks,impressions,ctr,position,country,device\n";

    fn ingest(body: &str, budget: usize) -> (Vec<Result<RawRecord>>, IngestStats) {
        let input = format!("{HEADER}{body}");
        let mut rows = RowIngestor::new(input.as_bytes(), budget).unwrap();
        let out: Vec<_> = rows.by_ref().collect();
        (out, rows.stats().clone())
    }

    #[test]
    fn parses_rows_into_typed_records() {
        let (rows, stats) = ingest(
            "2024-03-01,rust csv,https://example.com/a,10,200,0.05,3.2,usa,DESKTOP\n",
            100,
        );
        assert_eq!(rows.len(), 1);
        let r = rows[0].as_ref().unwrap();
        assert_eq!(r.date, "2024-03-01");
        assert_eq!(r.clicks, 10.0);
        assert_eq!(r.impressions, 200.0);
        assert_eq!(r.click_through_rate, 0.05);
        assert_eq!(r.mean_position, 3.2);
        assert_eq!(r.metadata.label, "rust csv");
        assert_eq!(r.metadata.device, "DESKTOP");
        assert_eq!(stats.rows_yielded, 1);
    }

    #[test]
    fn drops_repeated_header_rows_silently() {
        let body = format!(
            "2024-03-01,q,p,1,10,0.1,1,usa,MOBILE\n{HEADER}2024-03-02,q,p,2,20,0.1,1,usa,MOBILE\n"
        );
        let (rows, stats) = ingest(&body, 0);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.is_ok()));
        assert_eq!(stats.header_rows_dropped, 1);
        assert_eq!(stats.rows_skipped, 0);
    }

    #[test]
    fn skips_rows_without_date_and_counts_them() {
        let (rows, stats) = ingest(
            ",q,p,1,10,0.1,1,usa,MOBILE\n2024-03-02,q,p,2,20,0.1,1,usa,MOBILE\n",
            5,
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].as_ref().unwrap().date, "2024-03-02");
        assert_eq!(stats.rows_skipped, 1);
    }

    #[test]
    fn coerces_bad_numbers_to_zero() {
        let (rows, _) = ingest("2024-03-01,q,p,abc,,NaN,inf,usa,MOBILE\n", 0);
        let r = rows[0].as_ref().unwrap();
        assert_eq!(r.clicks, 0.0);
        assert_eq!(r.impressions, 0.0);
        assert_eq!(r.click_through_rate, 0.0);
        assert_eq!(r.mean_position, 0.0);
    }

    #[test]
    fn tolerates_short_and_long_rows() {
        let (rows, _) = ingest("2024-03-01,q,p,5\n2024-03-02,q,p,1,2,0.5,1,usa,MOBILE,extra\n", 0);
        assert_eq!(rows.len(), 2);
        let short = rows[0].as_ref().unwrap();
        assert_eq!(short.clicks, 5.0);
        assert_eq!(short.impressions, 0.0);
        assert_eq!(short.metadata.device, "");
    }

    #[test]
    fn aborts_when_error_budget_exceeded() {
        let body = ",q,p,1,1,0,0,x,y\n".repeat(4);
        let (rows, stats) = ingest(&body, 3);
        let last = rows.last().unwrap();
        assert!(matches!(last, Err(CoreError::SourceCorrupted(_))));
        assert_eq!(stats.rows_skipped, 4);
    }

    fn ingest_bytes(body: &[u8], budget: usize) -> (Vec<Result<RawRecord>>, IngestStats) {
        let mut input = HEADER.as_bytes().to_vec();
        input.extend_from_slice(body);
        let mut rows = RowIngestor::new(input.as_slice(), budget).unwrap();
        let out: Vec<_> = rows.by_ref().collect();
        (out, rows.stats().clone())
    }

    #[test]
    fn undecodable_row_is_skipped_and_counted() {
        let body = b"2024-03-01,q\xff,p,1,10,0.1,1,usa,MOBILE\n2024-03-02,q,p,2,20,0.1,1,usa,MOBILE\n";
        let (rows, stats) = ingest_bytes(body, 5);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].as_ref().unwrap().date, "2024-03-02");
        assert_eq!(stats.rows_skipped, 1);
        assert_eq!(stats.rows_yielded, 1);
    }

    #[test]
    fn undecodable_row_counts_against_budget() {
        let body = b"2024-03-01,q\xff,p,1,10,0.1,1,usa,MOBILE\n2024-03-02,q,p,2,20,0.1,1,usa,MOBILE\n";
        let (rows, stats) = ingest_bytes(body, 0);
        assert_eq!(rows.len(), 1);
        assert!(matches!(rows[0], Err(CoreError::SourceCorrupted(_))));
        assert_eq!(stats.rows_skipped, 1);
        assert_eq!(stats.rows_yielded, 0);
    }

    #[test]
    fn empty_source_is_fatal() {
        let (rows, _) = ingest("", 100);
        assert_eq!(rows.len(), 1);
        assert!(matches!(rows[0], Err(CoreError::SourceCorrupted(_))));
    }

    #[test]
    fn resolves_columns_by_name_in_any_order() {
        let input = "\u{feff}Clicks,Date,Impressions,CTR,Position\n7,2024-01-02,70,0.1,4\n";
        let mut rows = RowIngestor::new(input.as_bytes(), 0).unwrap();
        assert_eq!(rows.columns().date, 1);
        let r = rows.next().unwrap().unwrap();
        assert_eq!(r.date, "2024-01-02");
        assert_eq!(r.clicks, 7.0);
        assert_eq!(r.impressions, 70.0);
        assert_eq!(r.mean_position, 4.0);
    }

    #[test]
    fn missing_file_is_classified() {
        let res = RowIngestor::from_path(Path::new("/nonexistent/trendlens/export.csv"), 10);
        assert!(matches!(res, Err(CoreError::SourceNotFound(_))));
    }

    #[test]
    fn parse_metric_handles_common_formats() {
        assert_eq!(parse_metric(" 1,234 "), 1234.0);
        assert_eq!(parse_metric("4.5%"), 4.5);
        assert_eq!(parse_metric(""), 0.0);
        assert_eq!(parse_metric("n/a"), 0.0);
        assert_eq!(parse_metric("-3"), -3.0);
    }
}
