use serde::{Deserialize, Serialize};

/// Validated result of the external analysis call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub observations: Vec<String>,
    pub anomalies: Vec<String>,
    pub opportunities: Vec<String>,
    pub open_questions: Vec<String>,
}
