pub mod domain;
pub mod error;
pub mod governor;
pub mod ingest;
pub mod insights;
pub mod llm;
pub mod storage;

pub mod config {
    use anyhow::Context;
    use std::path::PathBuf;
    use std::time::Duration;

    pub const DEFAULT_SNAPSHOT_PATH: &str = "data/daily_aggregates.json";
    pub const DEFAULT_INGEST_ERROR_BUDGET: usize = 100;
    pub const DEFAULT_MAX_POINTS: usize = 60;
    pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 30_000;
    pub const DEFAULT_RATE_LIMIT_CAPACITY: u32 = 10;
    pub const DEFAULT_RATE_LIMIT_REFILL_PER_MINUTE: f64 = 10.0;
    pub const DEFAULT_RATE_LIMIT_IDLE_SECS: u64 = 600;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub source_csv_path: Option<PathBuf>,
        pub snapshot_path: PathBuf,
        pub ingest_error_budget: usize,
        pub insights_max_points: usize,
        pub insights_max_payload_bytes: usize,
        pub rate_limit_capacity: u32,
        pub rate_limit_refill_per_minute: f64,
        pub rate_limit_idle: Duration,
        pub anthropic_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                source_csv_path: std::env::var("SOURCE_CSV_PATH")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .map(PathBuf::from),
                snapshot_path: std::env::var("SNAPSHOT_PATH")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_PATH)),
                ingest_error_budget: env_parse("INGEST_ERROR_BUDGET")?
                    .unwrap_or(DEFAULT_INGEST_ERROR_BUDGET),
                insights_max_points: env_parse("INSIGHTS_MAX_POINTS")?
                    .unwrap_or(DEFAULT_MAX_POINTS),
                insights_max_payload_bytes: env_parse("INSIGHTS_MAX_PAYLOAD_BYTES")?
                    .unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES),
                rate_limit_capacity: env_parse("RATE_LIMIT_CAPACITY")?
                    .unwrap_or(DEFAULT_RATE_LIMIT_CAPACITY),
                rate_limit_refill_per_minute: env_parse("RATE_LIMIT_REFILL_PER_MINUTE")?
                    .unwrap_or(DEFAULT_RATE_LIMIT_REFILL_PER_MINUTE),
                rate_limit_idle: Duration::from_secs(
                    env_parse("RATE_LIMIT_IDLE_SECS")?.unwrap_or(DEFAULT_RATE_LIMIT_IDLE_SECS),
                ),
                anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
            })
        }

        pub fn require_source_csv_path(&self) -> anyhow::Result<&std::path::Path> {
            self.source_csv_path
                .as_deref()
                .context("SOURCE_CSV_PATH is required")
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }
    }

    // Unset or blank falls back to the default; a present but malformed value is a startup error.
    fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match std::env::var(key) {
            Ok(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("{key} is invalid ({raw:?}): {e}")),
            _ => Ok(None),
        }
    }
}
