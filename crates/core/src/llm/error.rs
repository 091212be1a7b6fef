use crate::llm::Provider;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisErrorKind {
    Timeout,
    Unavailable,
    AuthFailure,
    QuotaExceeded,
    InvalidResponse,
}

impl AnalysisErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "analysis_timeout",
            Self::Unavailable => "analysis_unavailable",
            Self::AuthFailure => "analysis_auth_failure",
            Self::QuotaExceeded => "analysis_quota_exceeded",
            Self::InvalidResponse => "analysis_invalid_response",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisError {
    pub provider: Provider,
    pub kind: AnalysisErrorKind,
    pub stage: &'static str,
    pub detail: String,
    pub raw_output: Option<String>,
}

impl AnalysisError {
    pub fn new(
        provider: Provider,
        kind: AnalysisErrorKind,
        stage: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            kind,
            stage,
            detail: detail.into(),
            raw_output: None,
        }
    }

    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = Some(raw.into());
        self
    }

    /// Transport trouble and timeouts may clear up; credentials, quota and
    /// malformed output will not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            AnalysisErrorKind::Timeout | AnalysisErrorKind::Unavailable
        )
    }
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "analysis error (provider={:?}, kind={}, stage={}): {}",
            self.provider,
            self.kind.as_str(),
            self.stage,
            self.detail
        )
    }
}

impl std::error::Error for AnalysisError {}
