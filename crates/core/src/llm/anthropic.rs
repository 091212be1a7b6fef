use crate::config::Settings;
use crate::domain::analysis::AnalysisReport;
use crate::domain::contract::{LlmAnalysisReport, MAX_ITEMS_PER_SECTION, MAX_ITEM_CHARS};
use crate::llm::error::{AnalysisError, AnalysisErrorKind};
use crate::llm::json;
use crate::llm::{AnalysisInput, InsightsAnalyzer, Provider};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 2048;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

const TOOL_NAME_EMIT_REPORT: &str = "emit_report";

#[derive(Debug, Clone)]
pub struct AnthropicAnalyzer {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicAnalyzer {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let timeout_secs = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    fn error(kind: AnalysisErrorKind, stage: &'static str, detail: impl Into<String>) -> AnalysisError {
        AnalysisError::new(Provider::Anthropic, kind, stage, detail)
    }

    async fn create_message(
        &self,
        req: CreateMessageRequest,
    ) -> Result<CreateMessageResponse, AnalysisError> {
        let mut headers = HeaderMap::new();
        let api_key = HeaderValue::from_str(&self.api_key).map_err(|_| {
            Self::error(
                AnalysisErrorKind::AuthFailure,
                "request",
                "API key is not a valid header value",
            )
        })?;
        headers.insert("x-api-key", api_key);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .map_err(|e| Self::error(classify_transport(&e), "send", e.to_string()))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| Self::error(classify_transport(&e), "read_body", e.to_string()))?;
        if !status.is_success() {
            return Err(
                Self::error(classify_status(status), "http", format!("status={status}"))
                    .with_raw_output(text),
            );
        }

        serde_json::from_str::<CreateMessageResponse>(&text).map_err(|e| {
            Self::error(
                AnalysisErrorKind::InvalidResponse,
                "decode",
                format!("failed to decode messages response: {e}"),
            )
            .with_raw_output(text.clone())
        })
    }

    fn tools() -> Vec<Tool> {
        let section = serde_json::json!({
            "type": "array",
            "maxItems": MAX_ITEMS_PER_SECTION,
            "items": {"type": "string", "minLength": 1, "maxLength": MAX_ITEM_CHARS}
        });
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["observations", "anomalies", "opportunities", "open_questions"],
            "properties": {
                "observations": section.clone(),
                "anomalies": section.clone(),
                "opportunities": section.clone(),
                "open_questions": section,
            }
        });

        vec![Tool {
            name: TOOL_NAME_EMIT_REPORT,
            description: "Emit the traffic analysis report as structured JSON",
            input_schema: schema,
        }]
    }

    fn tool_choice() -> ToolChoice {
        ToolChoice::Tool {
            name: TOOL_NAME_EMIT_REPORT,
        }
    }

    fn system_prompt() -> String {
        let limits = format!(
            "- at most {MAX_ITEMS_PER_SECTION} items per array, each at most {MAX_ITEM_CHARS} characters"
        );
        [
            "You are a search traffic analyst.",
            "You receive daily click/impression statistics already reduced to totals, trend descriptors, z-score anomalies and a downsampled series.",
            "Return ONLY valid JSON with exactly these keys, each an array of short strings:",
            "  observations, anomalies, opportunities, open_questions",
            "Rules:",
            limits.as_str(),
            "- cite dates and numbers from the input; do not invent data",
            "- use an empty array when there is nothing to say",
        ]
        .join("\n")
    }

    fn user_prompt(input: &AnalysisInput) -> String {
        format!(
            "Analyze search traffic from {} to {}.\n\nSummary JSON:\n{}",
            input.range.start, input.range.end, input.payload_json
        )
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    fn response_tool_report(
        res: &CreateMessageResponse,
    ) -> Result<Option<LlmAnalysisReport>, AnalysisError> {
        for block in &res.content {
            if let ContentBlock::ToolUse { name, input, .. } = block {
                if name == TOOL_NAME_EMIT_REPORT {
                    let parsed = serde_json::from_value::<LlmAnalysisReport>(input.clone())
                        .map_err(|e| {
                            Self::error(
                                AnalysisErrorKind::InvalidResponse,
                                "decode_tool_input",
                                e.to_string(),
                            )
                            .with_raw_output(input.to_string())
                        })?;
                    return Ok(Some(parsed));
                }
            }
        }
        Ok(None)
    }

    fn report_from_response(res: &CreateMessageResponse) -> Result<AnalysisReport, AnalysisError> {
        if let Some(tool_report) = Self::response_tool_report(res)? {
            return tool_report.validate_and_into_report().map_err(|e| {
                Self::error(AnalysisErrorKind::InvalidResponse, "validate", format!("{e:#}"))
            });
        }

        // Fallback to text (should be rare with a forced tool choice).
        let text = Self::response_text(res);
        json::parse_report(&text).map_err(|e| {
            Self::error(AnalysisErrorKind::InvalidResponse, "parse_text", format!("{e:#}"))
                .with_raw_output(text.clone())
        })
    }
}

#[async_trait::async_trait]
impl InsightsAnalyzer for AnthropicAnalyzer {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn analyze(&self, input: &AnalysisInput) -> Result<AnalysisReport, AnalysisError> {
        let req = CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: Some(Self::system_prompt()),
            messages: vec![Message {
                role: "user",
                content: Self::user_prompt(input),
            }],
            tools: Some(Self::tools()),
            tool_choice: Some(Self::tool_choice()),
        };

        let res = self.create_message(req).await?;
        if matches!(res.stop_reason.as_deref(), Some("max_tokens")) {
            tracing::warn!(
                start = %input.range.start,
                end = %input.range.end,
                max_tokens = self.max_tokens,
                "analysis output hit max_tokens; it will likely fail validation"
            );
        }
        Self::report_from_response(&res)
    }
}

/// Maps a non-success HTTP status to an error kind.
pub fn classify_status(status: StatusCode) -> AnalysisErrorKind {
    match status.as_u16() {
        401 | 403 => AnalysisErrorKind::AuthFailure,
        402 | 429 => AnalysisErrorKind::QuotaExceeded,
        408 | 504 => AnalysisErrorKind::Timeout,
        500..=599 => AnalysisErrorKind::Unavailable,
        _ => AnalysisErrorKind::InvalidResponse,
    }
}

fn classify_transport(err: &reqwest::Error) -> AnalysisErrorKind {
    if err.is_timeout() {
        AnalysisErrorKind::Timeout
    } else if err.is_decode() {
        AnalysisErrorKind::InvalidResponse
    } else {
        AnalysisErrorKind::Unavailable
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_response(input: serde_json::Value) -> CreateMessageResponse {
        CreateMessageResponse {
            content: vec![ContentBlock::ToolUse {
                name: TOOL_NAME_EMIT_REPORT.to_string(),
                input,
            }],
            stop_reason: Some("tool_use".to_string()),
        }
    }

    #[test]
    fn parses_tool_use_report_input() {
        let res = tool_response(json!({
            "observations": ["Clicks up 12% week over week"],
            "anomalies": ["2024-03-04: 400 clicks (z=2.9)"],
            "opportunities": ["Expand content around the spike query"],
            "open_questions": [],
        }));
        let report = AnthropicAnalyzer::report_from_response(&res).unwrap();
        assert_eq!(report.observations.len(), 1);
        assert_eq!(report.opportunities[0], "Expand content around the spike query");
    }

    #[test]
    fn decodes_tool_use_block_from_wire_json() {
        let res: CreateMessageResponse = serde_json::from_value(json!({
            "content": [{
                "type": "tool_use",
                "id": "toolu_01A",
                "name": TOOL_NAME_EMIT_REPORT,
                "input": {
                    "observations": [],
                    "anomalies": ["2024-03-04 spiked"],
                    "opportunities": [],
                    "open_questions": []
                }
            }],
            "stop_reason": "tool_use"
        }))
        .unwrap();
        let report = AnthropicAnalyzer::report_from_response(&res).unwrap();
        assert_eq!(report.anomalies, vec!["2024-03-04 spiked"]);
    }

    #[test]
    fn invalid_tool_report_is_rejected() {
        let too_many: Vec<String> = (0..=MAX_ITEMS_PER_SECTION).map(|i| i.to_string()).collect();
        let res = tool_response(json!({
            "observations": too_many,
            "anomalies": [],
            "opportunities": [],
            "open_questions": [],
        }));
        let err = AnthropicAnalyzer::report_from_response(&res).unwrap_err();
        assert_eq!(err.kind, AnalysisErrorKind::InvalidResponse);
        assert!(!err.is_retryable());
    }

    #[test]
    fn falls_back_to_text_blocks() {
        let res: CreateMessageResponse = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "```json\n{\"observations\":[\"a\"],\"anomalies\":[],\"opportunities\":[],\"open_questions\":[]}\n```"}
            ],
            "stop_reason": "end_turn"
        }))
        .unwrap();
        let report = AnthropicAnalyzer::report_from_response(&res).unwrap();
        assert_eq!(report.observations, vec!["a"]);
    }

    #[test]
    fn classifies_statuses() {
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), AnalysisErrorKind::AuthFailure);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), AnalysisErrorKind::AuthFailure);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), AnalysisErrorKind::QuotaExceeded);
        assert_eq!(classify_status(StatusCode::GATEWAY_TIMEOUT), AnalysisErrorKind::Timeout);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), AnalysisErrorKind::Unavailable);
        assert_eq!(
            classify_status(StatusCode::from_u16(529).unwrap()),
            AnalysisErrorKind::Unavailable
        );
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), AnalysisErrorKind::InvalidResponse);
    }

    #[test]
    fn request_serializes_forced_tool_choice() {
        let req = CreateMessageRequest {
            model: "m".to_string(),
            max_tokens: 10,
            system: None,
            messages: vec![],
            tools: Some(AnthropicAnalyzer::tools()),
            tool_choice: Some(AnthropicAnalyzer::tool_choice()),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["tool_choice"], json!({"type": "tool", "name": TOOL_NAME_EMIT_REPORT}));
        assert!(v.get("system").is_none());
        assert_eq!(
            v["tools"][0]["input_schema"]["properties"]["anomalies"]["maxItems"],
            json!(MAX_ITEMS_PER_SECTION)
        );
    }
}
