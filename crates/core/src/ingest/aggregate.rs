use crate::domain::daily::{DailyAggregate, DateAccumulator};
use crate::domain::record::RawRecord;
use crate::error::{CoreError, Result};
use std::collections::BTreeMap;

/// Folds a record stream into one [`DailyAggregate`] per date key.
///
/// Consumes the stream to completion; the first error it yields aborts the
/// fold. Output is sorted ascending by date key (plain string order).
pub fn aggregate_daily<I>(records: I) -> Result<Vec<DailyAggregate>>
where
    I: IntoIterator<Item = Result<RawRecord>>,
{
    let mut groups: BTreeMap<String, DateAccumulator> = BTreeMap::new();
    let mut folded: u64 = 0;

    for record in records {
        let record = record?;
        match groups.get_mut(record.date.as_str()) {
            Some(acc) => acc.add(&record),
            None => {
                let mut acc = DateAccumulator::default();
                acc.add(&record);
                groups.insert(record.date, acc);
            }
        }
        folded += 1;
    }

    if groups.is_empty() {
        return Err(CoreError::Aggregation(
            "no date groups produced from the export".to_string(),
        ));
    }

    tracing::info!(records = folded, days = groups.len(), "daily aggregation finished");

    Ok(groups
        .into_iter()
        .map(|(date, acc)| acc.finalize(date))
        .collect())
}
