use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trendlens_core::config::Settings;
use trendlens_core::ingest::source::CsvExportSource;
use trendlens_core::insights::{self, SummaryOptions};
use trendlens_core::llm::anthropic::AnthropicAnalyzer;
use trendlens_core::llm::retry::RetryPolicy;
use trendlens_core::storage::rebuild::RebuildCoordinator;
use trendlens_core::storage::snapshot::SnapshotStore;

#[derive(Debug, Parser)]
#[command(name = "trendlens_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Re-ingest the export and replace the snapshot, even if one exists.
    Rebuild,

    /// Print the insights payload for a date window.
    Summarize {
        /// First day of the window (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// Last day of the window (YYYY-MM-DD).
        #[arg(long)]
        end: String,

        /// Also send the payload to the analysis service and print its report.
        #[arg(long)]
        analyze: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let result = run(&settings, args.command).await;
    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "worker run failed");
    }
    result
}

async fn run(settings: &Settings, command: Command) -> anyhow::Result<()> {
    let source = CsvExportSource::from_settings(settings)?;
    let coordinator = RebuildCoordinator::new(SnapshotStore::from_settings(settings), Arc::new(source));

    match command {
        Command::Rebuild => {
            let daily = coordinator.rebuild().await.context("rebuild failed")?;
            tracing::info!(
                days = daily.len(),
                first = daily.first().map(|d| d.date.as_str()).unwrap_or_default(),
                last = daily.last().map(|d| d.date.as_str()).unwrap_or_default(),
                snapshot = %coordinator.store().path().display(),
                "rebuild complete"
            );
        }
        Command::Summarize {
            start,
            end,
            analyze,
        } => {
            let start = parse_date(&start).context("invalid --start")?;
            let end = parse_date(&end).context("invalid --end")?;
            insights::validate_window(&start, &end)?;

            let daily = coordinator.get_or_build().await?;
            let opts = SummaryOptions {
                max_points: settings.insights_max_points,
                ..SummaryOptions::default()
            };
            let payload = insights::summarize_with(&daily, &start, &end, opts);

            let output = if analyze {
                let analyzer = AnthropicAnalyzer::from_settings(settings)?;
                let report = trendlens_core::llm::analyze_payload(
                    &analyzer,
                    &payload,
                    settings.insights_max_payload_bytes,
                    RetryPolicy::default(),
                )
                .await?;
                json!({ "payload": payload, "report": report })
            } else {
                serde_json::to_value(&payload)?
            };

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn parse_date(raw: &str) -> anyhow::Result<String> {
    let date = chrono::NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")?;
    Ok(date.format("%Y-%m-%d").to_string())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
