use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trendlens_core::config::Settings;
use trendlens_core::domain::analysis::AnalysisReport;
use trendlens_core::domain::daily::DailyAggregate;
use trendlens_core::domain::insights::InsightsPayload;
use trendlens_core::error::CoreError;
use trendlens_core::governor::CallGovernor;
use trendlens_core::ingest::source::CsvExportSource;
use trendlens_core::insights::{self, SummaryOptions};
use trendlens_core::llm::anthropic::AnthropicAnalyzer;
use trendlens_core::llm::error::AnalysisErrorKind;
use trendlens_core::llm::retry::RetryPolicy;
use trendlens_core::llm::{self, InsightsAnalyzer};
use trendlens_core::storage::rebuild::RebuildCoordinator;
use trendlens_core::storage::snapshot::SnapshotStore;

const GOVERNOR_SWEEP_EVERY: Duration = Duration::from_secs(60);

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

    let coordinator = match CsvExportSource::from_settings(&settings) {
        Ok(source) => Some(RebuildCoordinator::new(
            SnapshotStore::from_settings(&settings),
            Arc::new(source),
        )),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "SOURCE_CSV_PATH missing; starting API in degraded mode");
            None
        }
    };

    let analyzer: Option<Arc<dyn InsightsAnalyzer>> =
        match AnthropicAnalyzer::from_settings(&settings) {
            Ok(a) => Some(Arc::new(a)),
            Err(e) => {
                tracing::warn!(error = %e, "analysis disabled; POST /api/insights will return 503");
                None
            }
        };

    let governor = Arc::new(CallGovernor::from_settings(&settings));
    let _sweep = governor.spawn_idle_sweep(GOVERNOR_SWEEP_EVERY, settings.rate_limit_idle);

    let state = AppState {
        coordinator,
        governor,
        analyzer,
        summary: SummaryOptions {
            max_points: settings.insights_max_points,
            ..SummaryOptions::default()
        },
        max_payload_bytes: settings.insights_max_payload_bytes,
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/daily", get(get_daily))
        .route("/api/summary", get(get_summary))
        .route("/api/insights", post(post_insights))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    coordinator: Option<RebuildCoordinator>,
    governor: Arc<CallGovernor>,
    analyzer: Option<Arc<dyn InsightsAnalyzer>>,
    summary: SummaryOptions,
    max_payload_bytes: usize,
}

impl AppState {
    async fn daily(&self) -> Result<Vec<DailyAggregate>, ApiError> {
        let Some(coordinator) = &self.coordinator else {
            return Err(ApiError::not_configured(
                "source_not_configured",
                "No analytics export is configured for this server.",
            ));
        };
        Ok(coordinator.get_or_build().await?)
    }

    /// Resolves the analyzer, then spends a governor token. An unconfigured
    /// server rejects without charging the caller.
    fn admit_analysis(&self, caller: &str) -> Result<Arc<dyn InsightsAnalyzer>, ApiError> {
        let Some(analyzer) = self.analyzer.clone() else {
            return Err(ApiError::not_configured(
                "analysis_not_configured",
                "Analysis is not configured for this server.",
            ));
        };
        if !self.governor.check_limit(caller) {
            tracing::info!(%caller, "insights request rejected by governor");
            return Err(ApiError::rate_limited());
        }
        Ok(analyzer)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RangeParams {
    start: Option<String>,
    end: Option<String>,
}

/// A validated window; `None` bounds are open-ended.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RangeBounds {
    start: Option<String>,
    end: Option<String>,
}

impl RangeBounds {
    fn parse(params: RangeParams) -> Result<Self, ApiError> {
        let start = params.start.map(|s| parse_date("start", &s)).transpose()?;
        let end = params.end.map(|s| parse_date("end", &s)).transpose()?;
        if let (Some(start), Some(end)) = (&start, &end) {
            insights::validate_window(start, end)?;
        }
        Ok(Self { start, end })
    }

    /// Closes open bounds over the first and last day of `series` (which is sorted).
    fn resolve(&self, series: &[DailyAggregate]) -> (String, String) {
        let first = series.first().map(|d| d.date.clone()).unwrap_or_default();
        let last = series.last().map(|d| d.date.clone()).unwrap_or_default();
        (
            self.start.clone().unwrap_or(first),
            self.end.clone().unwrap_or(last),
        )
    }
}

fn parse_date(field: &str, raw: &str) -> Result<String, ApiError> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| {
            ApiError::bad_request(format!("The {field} date must be formatted as YYYY-MM-DD."))
        })
}

async fn get_daily(
    State(state): State<AppState>,
    params: Result<Query<RangeParams>, QueryRejection>,
) -> Result<Json<Vec<DailyAggregate>>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let bounds = RangeBounds::parse(params)?;
    let series = state.daily().await?;
    let (start, end) = bounds.resolve(&series);
    Ok(Json(insights::filter_by_range(&series, &start, &end)))
}

async fn get_summary(
    State(state): State<AppState>,
    params: Result<Query<RangeParams>, QueryRejection>,
) -> Result<Json<InsightsPayload>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let bounds = RangeBounds::parse(params)?;
    let series = state.daily().await?;
    let (start, end) = bounds.resolve(&series);
    Ok(Json(insights::summarize_with(
        &series,
        &start,
        &end,
        state.summary,
    )))
}

#[derive(Debug, Serialize)]
struct InsightsResponse {
    payload: InsightsPayload,
    report: AnalysisReport,
}

async fn post_insights(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<RangeParams>, JsonRejection>,
) -> Result<Json<InsightsResponse>, ApiError> {
    let Json(params) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let bounds = RangeBounds::parse(params)?;

    let caller = caller_id(&headers, peer);
    let analyzer = state.admit_analysis(&caller)?;

    let series = state.daily().await?;
    let (start, end) = bounds.resolve(&series);
    let payload = insights::summarize_with(&series, &start, &end, state.summary);
    let report = llm::analyze_payload(
        analyzer.as_ref(),
        &payload,
        state.max_payload_bytes,
        RetryPolicy::default(),
    )
    .await?;

    tracing::info!(
        %caller,
        %start,
        %end,
        days = payload.series_total_points,
        "insights generated"
    );
    Ok(Json(InsightsResponse { payload, report }))
}

/// First `x-forwarded-for` hop when present, otherwise the peer address.
fn caller_id(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "invalid_request",
            message: message.into(),
        }
    }

    fn rate_limited() -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            kind: "rate_limited",
            message: "Too many analysis requests. Wait a minute and try again.".to_string(),
        }
    }

    fn not_configured(kind: &'static str, message: &str) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            kind,
            message: message.to_string(),
        }
    }
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::InvalidRange(_) => StatusCode::BAD_REQUEST,
        CoreError::RangeTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        CoreError::SourceNotFound(_)
        | CoreError::SourcePermissionDenied(_)
        | CoreError::SourceIo(_)
        | CoreError::SourceCorrupted(_)
        | CoreError::Aggregation(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::SnapshotWrite(_) => StatusCode::INTERNAL_SERVER_ERROR,
        CoreError::Analysis(e) => match e.kind {
            AnalysisErrorKind::Timeout | AnalysisErrorKind::Unavailable => {
                StatusCode::GATEWAY_TIMEOUT
            }
            AnalysisErrorKind::AuthFailure
            | AnalysisErrorKind::QuotaExceeded
            | AnalysisErrorKind::InvalidResponse => StatusCode::BAD_GATEWAY,
        },
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            let err = anyhow::Error::new(err.clone());
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, %status, "request failed");
        }
        Self {
            status,
            kind: err.kind(),
            message: err.user_message(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
