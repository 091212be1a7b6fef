/// One data row of the export. Lives only until it is folded into a
/// [`crate::domain::daily::DateAccumulator`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Grouping key, kept verbatim (never parsed as a calendar date).
    pub date: String,
    pub clicks: f64,
    pub impressions: f64,
    pub click_through_rate: f64,
    pub mean_position: f64,
    pub metadata: RecordMetadata,
}

/// Free-text columns carried through ingestion but ignored by aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordMetadata {
    pub label: String,
    pub locator: String,
    pub country: String,
    pub device: String,
}
