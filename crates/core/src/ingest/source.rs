use crate::config::Settings;
use crate::domain::daily::DailyAggregate;
use crate::error::{CoreError, Result};
use crate::ingest::aggregate::aggregate_daily;
use crate::ingest::rows::RowIngestor;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Produces the full daily aggregate collection from scratch.
///
/// This is the expensive step the rebuild coordinator guards.
#[async_trait::async_trait]
pub trait AggregateSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn build_daily(&self) -> Result<Vec<DailyAggregate>>;
}

/// Streams a CSV export from disk through ingestion and aggregation.
#[derive(Debug, Clone)]
pub struct CsvExportSource {
    path: PathBuf,
    error_budget: usize,
}

impl CsvExportSource {
    pub fn new(path: impl Into<PathBuf>, error_budget: usize) -> Self {
        Self {
            path: path.into(),
            error_budget,
        }
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let path = settings.require_source_csv_path()?;
        Ok(Self::new(path, settings.ingest_error_budget))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocking ingest + fold. Runs in constant memory relative to the row count.
    pub fn build_blocking(&self) -> Result<Vec<DailyAggregate>> {
        let t0 = Instant::now();
        let rows = RowIngestor::from_path(&self.path, self.error_budget)?;
        let daily = aggregate_daily(rows)?;
        tracing::info!(
            source = %self.path.display(),
            days = daily.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "built daily aggregates from export"
        );
        Ok(daily)
    }
}

#[async_trait::async_trait]
impl AggregateSource for CsvExportSource {
    fn source_name(&self) -> &'static str {
        "csv_export"
    }

    async fn build_daily(&self) -> Result<Vec<DailyAggregate>> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.build_blocking())
            .await
            .map_err(|e| CoreError::Aggregation(format!("aggregation task failed: {e}")))?
    }
}
