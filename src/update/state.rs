//! Persisted update state.
//!
//! Two pieces of state survive restarts: the time of the last remote check
//! (a single scalar in the install home) and the update journal (JSON,
//! beside the install home) that lets a later run notice an update that
//! never finished.

use crate::error::{AidoError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Storage for the last-check timestamp.
pub trait CheckStore: Send + Sync {
    /// `None` when no check was recorded or the record is unreadable.
    fn read(&self) -> Option<DateTime<Utc>>;
    fn write(&self, at: DateTime<Utc>) -> Result<()>;
}

/// Last-check timestamp stored as fractional Unix seconds in a text file.
#[derive(Debug, Clone)]
pub struct FileCheckStore {
    path: PathBuf,
}

impl FileCheckStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CheckStore for FileCheckStore {
    fn read(&self) -> Option<DateTime<Utc>> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        let secs: f64 = text.trim().parse().ok()?;
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        let whole = secs.trunc() as i64;
        let nanos = ((secs - secs.trunc()) * 1e9) as u32;
        DateTime::from_timestamp(whole, nanos)
    }

    fn write(&self, at: DateTime<Utc>) -> Result<()> {
        let text = format!("{}.{:06}", at.timestamp(), at.timestamp_subsec_micros());
        std::fs::write(&self.path, text).map_err(|e| {
            AidoError::Filesystem(format!(
                "cannot record check time in {}: {e}",
                self.path.display()
            ))
        })
    }
}

/// How far an update got before the journal was last written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalPhase {
    /// Backup taken; the install may be partially overwritten.
    InProgress,
    /// New files are in place; waiting for the operator's confirmation.
    Applied,
}

impl std::fmt::Display for JournalPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Applied => write!(f, "applied"),
        }
    }
}

/// Record of the update currently (or last) in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateJournal {
    pub phase: JournalPhase,
    pub from_version: String,
    pub target_version: String,
    /// Backup taken before any file was overwritten.
    pub backup: PathBuf,
    pub started_at: DateTime<Utc>,
}

impl UpdateJournal {
    /// Load the journal. `Ok(None)` when there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            AidoError::Filesystem(format!("corrupt update journal {}: {e}", path.display()))
        })
    }

    /// Persist the journal.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be serialized or written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AidoError::Filesystem(format!("cannot serialize update journal: {e}")))?;
        std::fs::write(path, json).map_err(|e| {
            AidoError::Filesystem(format!(
                "cannot write update journal to {}: {e}",
                path.display()
            ))
        })
    }

    /// Delete the journal if present.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing journal cannot be removed.
    pub fn clear(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Clock that only moves when told to.
    pub struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        pub fn at(t: DateTime<Utc>) -> Self {
            Self(Mutex::new(t))
        }

        pub fn advance(&self, by: chrono::Duration) {
            let mut now = self.0.lock().unwrap_or_else(|e| e.into_inner());
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap_or_else(|e| e.into_inner())
        }
    }

    /// In-memory check store.
    #[derive(Default)]
    pub struct MemoryCheckStore(pub Mutex<Option<DateTime<Utc>>>);

    impl CheckStore for MemoryCheckStore {
        fn read(&self) -> Option<DateTime<Utc>> {
            *self.0.lock().unwrap_or_else(|e| e.into_inner())
        }

        fn write(&self, at: DateTime<Utc>) -> Result<()> {
            *self.0.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn check_store_round_trip_keeps_subsecond_precision() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = FileCheckStore::new(dir.path().join(".last_check"));
        assert!(store.read().is_none());

        let at = DateTime::from_timestamp(1_760_000_000, 250_000_000).unwrap();
        store.write(at).unwrap();
        let read = store.read().unwrap();
        assert_eq!(read.timestamp(), 1_760_000_000);
        assert_eq!(read.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn check_store_reads_plain_float_seconds() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join(".last_check");
        std::fs::write(&path, "1706000000.5\n").unwrap();

        let read = FileCheckStore::new(&path).read().unwrap();
        assert_eq!(read.timestamp(), 1_706_000_000);
    }

    #[test]
    fn corrupt_check_file_reads_as_none() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join(".last_check");
        std::fs::write(&path, "not-a-number").unwrap();
        assert!(FileCheckStore::new(&path).read().is_none());

        std::fs::write(&path, "-5").unwrap();
        assert!(FileCheckStore::new(&path).read().is_none());
    }

    #[test]
    fn check_store_write_to_missing_dir_fails() {
        let store = FileCheckStore::new("/nonexistent/aido/.last_check");
        assert!(store.write(Utc::now()).is_err());
    }

    #[test]
    fn journal_round_trip_and_clear() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join(".aido.update.json");
        assert!(UpdateJournal::load(&path).unwrap().is_none());

        let journal = UpdateJournal {
            phase: JournalPhase::InProgress,
            from_version: "v1.0.0".to_owned(),
            target_version: "v1.1.0".to_owned(),
            backup: dir.path().join("aido.bak_20260101_120000"),
            started_at: DateTime::from_timestamp(1_760_000_000, 0).unwrap(),
        };
        journal.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("in_progress"));
        assert_eq!(UpdateJournal::load(&path).unwrap(), Some(journal));

        UpdateJournal::clear(&path).unwrap();
        assert!(!path.exists());
        UpdateJournal::clear(&path).unwrap();
    }

    #[test]
    fn corrupt_journal_is_an_error() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join(".aido.update.json");
        std::fs::write(&path, "{ truncated").unwrap();
        assert!(UpdateJournal::load(&path).is_err());
    }
}
