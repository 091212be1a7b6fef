use crate::domain::analysis::AnalysisReport;
use crate::domain::insights::{DateWindow, InsightsPayload};
use crate::error::CoreError;
use crate::insights::serialize_within_limit;
use crate::llm::error::AnalysisError;
use crate::llm::retry::RetryPolicy;

pub mod anthropic;
pub mod error;
pub mod json;
pub mod retry;

#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub range: DateWindow,
    /// Serialized [`InsightsPayload`], already checked against the size bound.
    pub payload_json: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
}

#[async_trait::async_trait]
pub trait InsightsAnalyzer: Send + Sync {
    fn provider(&self) -> Provider;

    /// One attempt, no retries. Failures are classified by [`AnalysisError::kind`].
    async fn analyze(&self, input: &AnalysisInput) -> Result<AnalysisReport, AnalysisError>;
}

/// Size-checks the payload, then runs the analysis with the retry policy.
///
/// An oversized payload fails with [`CoreError::RangeTooLarge`] before any
/// request is made.
pub async fn analyze_payload(
    analyzer: &dyn InsightsAnalyzer,
    payload: &InsightsPayload,
    max_payload_bytes: usize,
    policy: RetryPolicy,
) -> Result<AnalysisReport, CoreError> {
    let payload_json = serialize_within_limit(payload, max_payload_bytes)?;
    let input = AnalysisInput {
        range: payload.range.clone(),
        payload_json,
    };

    let report = retry::with_retry(policy, || analyzer.analyze(&input)).await?;
    Ok(report)
}
