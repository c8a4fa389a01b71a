//! Writes a merged settings file over the user's local one.
//!
//! The local file is only replaced after the operator has accepted any
//! conflicts and a timestamped copy of the old file exists. The new content
//! goes to a temporary sibling first and is renamed into place last.

use crate::envfile::{self, ConfigFile, MergeResult};
use crate::error::{AidoError, Result};
use crate::prompt::{Confirm, Decision};
use crate::update::backup::timestamped_sibling;
use crate::update::state::{Clock, SystemClock};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of [`ConfigReconciler::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// No local file existed; the example was copied verbatim.
    Bootstrapped,
    /// The merged file was written. `backup` holds the previous contents.
    Merged {
        conflicts: Vec<String>,
        backup: PathBuf,
    },
    /// The operator refused the conflicting values; nothing was written.
    Declined { conflicts: Vec<String> },
    /// Reading or writing failed; the local file is unchanged.
    Failed(String),
}

impl CommitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Bootstrapped | Self::Merged { .. })
    }
}

/// Reconciles one local settings file against one example file.
#[derive(Clone)]
pub struct ConfigReconciler {
    local: PathBuf,
    example: PathBuf,
    clock: Arc<dyn Clock>,
}

impl ConfigReconciler {
    pub fn new(local: impl Into<PathBuf>, example: impl Into<PathBuf>) -> Self {
        Self {
            local: local.into(),
            example: example.into(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` to stamp config backups.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn local_path(&self) -> &Path {
        &self.local
    }

    /// Merge the two files without writing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if either file exists but cannot be read.
    pub fn preview(&self) -> Result<MergeResult> {
        let local = ConfigFile::parse(&self.local)?;
        let example = ConfigFile::parse(&self.example)?;
        Ok(envfile::merge(&local, &example))
    }

    /// Apply the merge to the local file.
    ///
    /// Conflicts are put to `confirm` as
    /// [`Decision::ProceedDespiteConflicts`]; a bootstrap never asks.
    pub fn commit(&self, confirm: &dyn Confirm) -> CommitOutcome {
        match self.try_commit(confirm) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    local = %self.local.display(),
                    error = %e,
                    "configuration update failed"
                );
                CommitOutcome::Failed(e.to_string())
            }
        }
    }

    fn try_commit(&self, confirm: &dyn Confirm) -> Result<CommitOutcome> {
        if !self.example.is_file() {
            return Err(AidoError::Filesystem(format!(
                "example configuration {} not found",
                self.example.display()
            )));
        }

        if !self.local.exists() {
            let content = std::fs::read(&self.example)?;
            write_replacing(&self.local, &content)?;
            tracing::info!(local = %self.local.display(), "created configuration from example");
            return Ok(CommitOutcome::Bootstrapped);
        }

        let merged = self.preview()?;

        if merged.has_conflicts() {
            let decision = Decision::ProceedDespiteConflicts {
                keys: &merged.conflicts,
            };
            if !confirm.confirm(&decision) {
                tracing::warn!(
                    conflicts = ?merged.conflicts,
                    "configuration update declined; manual migration required"
                );
                return Ok(CommitOutcome::Declined {
                    conflicts: merged.conflicts,
                });
            }
        }

        let backup = timestamped_sibling(&self.local, self.clock.now());
        replace_with_backup(&self.local, &backup, merged.render().as_bytes(), write_replacing)?;
        tracing::info!(
            local = %self.local.display(),
            backup = %backup.display(),
            conflicts = merged.conflicts.len(),
            "configuration merged"
        );

        Ok(CommitOutcome::Merged {
            conflicts: merged.conflicts,
            backup,
        })
    }
}

/// Copy `local` to `backup`, then `write` the new content over `local`.
/// The backup is removed again when the write fails.
fn replace_with_backup(
    local: &Path,
    backup: &Path,
    content: &[u8],
    write: impl FnOnce(&Path, &[u8]) -> Result<()>,
) -> Result<()> {
    std::fs::copy(local, backup).map_err(|e| {
        AidoError::Filesystem(format!(
            "cannot back up {} to {}: {e}",
            local.display(),
            backup.display()
        ))
    })?;

    if let Err(e) = write(local, content) {
        if let Err(rm) = std::fs::remove_file(backup) {
            tracing::warn!(path = %backup.display(), error = %rm, "failed to remove config backup");
        }
        return Err(e);
    }
    Ok(())
}

/// Write `content` to a temporary file beside `target`, then rename it over
/// `target`.
fn write_replacing(target: &Path, content: &[u8]) -> Result<()> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        AidoError::Filesystem(format!("cannot create temp file in {}: {e}", dir.display()))
    })?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| {
        AidoError::Filesystem(format!("cannot replace {}: {}", target.display(), e.error))
    })?;
    Ok(())
}
