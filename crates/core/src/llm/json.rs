use crate::domain::analysis::AnalysisReport;
use crate::domain::contract::LlmAnalysisReport;
use anyhow::Context;

/// Pulls a JSON object out of model text: a fenced block if present,
/// otherwise the span from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        // Skip the info string (```json) up to the first newline.
        let body = rest.split_once('\n').map_or("", |(_, body)| body);
        let body = body.rfind("```").map_or(body, |end| &body[..end]);
        return Some(body.trim());
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| trimmed[start..=end].trim())
}

pub fn parse_report(text: &str) -> anyhow::Result<AnalysisReport> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim());
    let parsed = serde_json::from_str::<LlmAnalysisReport>(json_str)
        .with_context(|| format!("model output is not a valid analysis report: {json_str}"))?;
    parsed.validate_and_into_report()
}
