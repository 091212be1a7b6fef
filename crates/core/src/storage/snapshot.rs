use crate::config::Settings;
use crate::domain::daily::DailyAggregate;
use crate::error::{CoreError, Result};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Outcome of reading the snapshot file. Both non-present variants mean "rebuild".
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotRead {
    Present(Vec<DailyAggregate>),
    Absent,
    Invalid(String),
}

impl SnapshotRead {
    pub fn into_present(self) -> Option<Vec<DailyAggregate>> {
        match self {
            Self::Present(daily) => Some(daily),
            Self::Absent | Self::Invalid(_) => None,
        }
    }
}

/// Flat-file persistence of the whole daily aggregate collection as one JSON array.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the snapshot, so readers only ever see a complete old or new file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.snapshot_path.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> SnapshotRead {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return SnapshotRead::Absent,
            Err(e) => return SnapshotRead::Invalid(format!("unreadable: {e}")),
        };

        let first = bytes.iter().find(|b| !b.is_ascii_whitespace());
        if first != Some(&b'[') {
            return SnapshotRead::Invalid("not a JSON array".to_string());
        }

        let daily = match serde_json::from_slice::<Vec<DailyAggregate>>(&bytes) {
            Ok(daily) => daily,
            Err(e) => return SnapshotRead::Invalid(format!("deserialize failed: {e}")),
        };

        // Strictly ascending dates also rules out duplicates.
        if let Some(pair) = daily.windows(2).find(|w| w[0].date >= w[1].date) {
            return SnapshotRead::Invalid(format!(
                "dates not strictly ascending ({} then {})",
                pair[0].date, pair[1].date
            ));
        }

        SnapshotRead::Present(daily)
    }

    pub fn write(&self, daily: &[DailyAggregate]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| self.write_error(e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.write_error(e))?;
        {
            let mut w = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut w, daily)
                .map_err(|e| self.write_error(io::Error::from(e)))?;
            w.flush().map_err(|e| self.write_error(e))?;
        }
        tmp.as_file().sync_all().map_err(|e| self.write_error(e))?;
        tmp.persist(&self.path)
            .map_err(|e| self.write_error(e.error))?;

        tracing::info!(
            snapshot = %self.path.display(),
            days = daily.len(),
            "snapshot written"
        );
        Ok(())
    }

    fn write_error(&self, err: io::Error) -> CoreError {
        CoreError::SnapshotWrite(format!("{}: {err}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(date: &str, clicks: f64) -> DailyAggregate {
        DailyAggregate {
            date: date.to_string(),
            clicks,
            impressions: clicks * 10.0,
            ctr: 0.1 / 3.0,
            position: 7.123456789,
        }
    }

    #[test]
    fn write_then_read_returns_equal_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("nested/deeper/daily.json"));
        let daily = vec![day("2024-01-01", 1.0), day("2024-01-02", 2.5)];

        store.write(&daily).unwrap();
        assert_eq!(store.read(), SnapshotRead::Present(daily));
    }

    #[test]
    fn missing_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("daily.json"));
        assert_eq!(store.read(), SnapshotRead::Absent);
    }

    #[test]
    fn non_array_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daily.json");
        fs::write(&path, r#"{"date":"2024-01-01"}"#).unwrap();
        assert!(matches!(SnapshotStore::new(&path).read(), SnapshotRead::Invalid(_)));
    }

    #[test]
    fn truncated_json_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daily.json");
        fs::write(&path, r#"[{"date":"2024-01-01","clicks":1"#).unwrap();
        assert!(matches!(SnapshotStore::new(&path).read(), SnapshotRead::Invalid(_)));
    }

    #[test]
    fn unsorted_dates_are_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("daily.json"));
        store
            .write(&[day("2024-01-02", 1.0), day("2024-01-01", 1.0)])
            .unwrap();
        assert!(matches!(store.read(), SnapshotRead::Invalid(_)));
    }

    #[test]
    fn rewrite_replaces_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("daily.json"));
        store.write(&[day("2024-01-01", 1.0)]).unwrap();
        store.write(&[day("2024-02-01", 9.0)]).unwrap();
        let read = store.read().into_present().unwrap();
        assert_eq!(read, vec![day("2024-02-01", 9.0)]);
    }

    #[test]
    fn unwritable_location_is_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"x").unwrap();
        let store = SnapshotStore::new(blocker.join("daily.json"));
        let err = store.write(&[day("2024-01-01", 1.0)]).unwrap_err();
        assert!(matches!(err, CoreError::SnapshotWrite(_)));
    }
}
