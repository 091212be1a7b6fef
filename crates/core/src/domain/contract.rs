use crate::domain::analysis::AnalysisReport;
use anyhow::ensure;
use serde::{Deserialize, Serialize};

pub const MAX_ITEMS_PER_SECTION: usize = 8;
pub const MAX_ITEM_CHARS: usize = 400;

/// Analysis output exactly as the model produced it, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmAnalysisReport {
    pub observations: Vec<String>,
    pub anomalies: Vec<String>,
    pub opportunities: Vec<String>,
    pub open_questions: Vec<String>,
}

impl LlmAnalysisReport {
    pub fn validate_and_into_report(self) -> anyhow::Result<AnalysisReport> {
        Ok(AnalysisReport {
            observations: validate_section("observations", self.observations)?,
            anomalies: validate_section("anomalies", self.anomalies)?,
            opportunities: validate_section("opportunities", self.opportunities)?,
            open_questions: validate_section("open_questions", self.open_questions)?,
        })
    }
}

fn validate_section(name: &str, items: Vec<String>) -> anyhow::Result<Vec<String>> {
    ensure!(
        items.len() <= MAX_ITEMS_PER_SECTION,
        "{name} must have at most {MAX_ITEMS_PER_SECTION} items (got {})",
        items.len()
    );

    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let item = item.trim().to_string();
        ensure!(!item.is_empty(), "{name}[{idx}] must be non-empty");
        let chars = item.chars().count();
        ensure!(
            chars <= MAX_ITEM_CHARS,
            "{name}[{idx}] exceeds {MAX_ITEM_CHARS} characters (got {chars})"
        );
        out.push(item);
    }
    Ok(out)
}
