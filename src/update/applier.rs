//! Update orchestration.
//!
//! An update moves through
//! `Idle → Checked → Downloaded → BackedUp → ConfigMerged → Applied`.
//! Nothing in the install home is touched before `BackedUp`; a failure while
//! overlaying files restores the home from that backup. The backup
//! stays until the operator confirms the new version works.

use super::archive;
use super::backup;
use super::checker::{CheckResult, ReleaseChecker};
use super::release::{FeedResult, ReleaseDescriptor};
use super::state::{Clock, FileCheckStore, JournalPhase, SystemClock, UpdateJournal};
use crate::aido_dirs::InstallLayout;
use crate::config::UpdateConfig;
use crate::error::{AidoError, Result};
use crate::prompt::{Confirm, Decision};
use crate::reconcile::{CommitOutcome, ConfigReconciler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Where an update currently stands. Ordered by progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UpdatePhase {
    Idle,
    Checked,
    Downloaded,
    BackedUp,
    ConfigMerged,
    /// Terminal success.
    Applied,
    /// Terminal failure after the download.
    RolledBack,
}

impl std::fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Checked => "checked",
            Self::Downloaded => "downloaded",
            Self::BackedUp => "backed_up",
            Self::ConfigMerged => "config_merged",
            Self::Applied => "applied",
            Self::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// Result of [`Updater::perform_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// New files are in place; `backup` awaits the operator's confirmation.
    Applied { version: String, backup: PathBuf },
    /// Stopped before anything in the install home changed.
    Aborted { phase: UpdatePhase, reason: String },
    /// Overlay failed; the install home was restored from `backup`.
    RolledBack { reason: String, backup: PathBuf },
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// State of the installation as found at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallHealth {
    /// No journal and no backups.
    Clean,
    /// An update was applied and not yet confirmed.
    AwaitingConfirmation { journal: UpdateJournal },
    /// An update started but neither finished nor rolled back. `journal` is
    /// `None` when the journal itself is unreadable.
    Interrupted {
        journal: Option<UpdateJournal>,
        backups: Vec<PathBuf>,
    },
    /// Backups exist with no journal explaining them.
    UnverifiedBackups { backups: Vec<PathBuf> },
}

/// Drives checks, updates, confirmation and rollback for one installation.
pub struct Updater {
    layout: InstallLayout,
    download_timeout: Duration,
    checker: ReleaseChecker,
    clock: Arc<dyn Clock>,
    phase: UpdatePhase,
}

impl Updater {
    /// Updater using the on-disk check file and the system clock.
    pub fn new(layout: InstallLayout, config: &UpdateConfig) -> Self {
        let store = Box::new(FileCheckStore::new(layout.check_file()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let checker = ReleaseChecker::new(config, layout.installed_version(), store, clock.clone());
        Self::with_checker(layout, config, checker, clock)
    }

    pub fn with_checker(
        layout: InstallLayout,
        config: &UpdateConfig,
        checker: ReleaseChecker,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            layout,
            download_timeout: Duration::from_secs(config.download_timeout_secs),
            checker,
            clock,
            phase: UpdatePhase::Idle,
        }
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    pub fn checker(&self) -> &ReleaseChecker {
        &self.checker
    }

    pub fn phase(&self) -> UpdatePhase {
        self.phase
    }

    fn enter(&mut self, phase: UpdatePhase) {
        tracing::debug!(from = %self.phase, to = %phase, "update phase");
        self.phase = phase;
    }

    /// Compare against whatever the version marker says now, not what it
    /// said when the checker was built.
    fn refresh_installed_version(&mut self) {
        self.checker
            .set_installed_version(self.layout.installed_version());
    }

    /// Rate-limited release check.
    pub fn check_update(&mut self) -> CheckResult {
        self.refresh_installed_version();
        let result = self.checker.check_for_update();
        self.enter(UpdatePhase::Checked);
        result
    }

    /// Release check ignoring the check interval.
    pub fn check_now(&mut self) -> CheckResult {
        self.refresh_installed_version();
        let result = self.checker.check_now();
        self.enter(UpdatePhase::Checked);
        result
    }

    /// Ask the feed now, ignoring the check interval.
    pub fn latest_release(&mut self) -> FeedResult {
        self.refresh_installed_version();
        let fetched = self.checker.fetch_latest();
        self.checker.record_check_now();
        self.enter(UpdatePhase::Checked);
        fetched
    }

    /// Download `release` and install it over the current installation.
    ///
    /// # Errors
    ///
    /// Only unrecoverable conditions are errors: the disk filling up during
    /// the backup, or a failed restore. Everything else is an
    /// [`UpdateOutcome`].
    pub fn perform_update(
        &mut self,
        release: &ReleaseDescriptor,
        confirm: &dyn Confirm,
    ) -> Result<UpdateOutcome> {
        if let InstallHealth::Interrupted { .. } = self.health() {
            return Ok(self.abort(
                "a previous update was interrupted; run `aido rollback` first".to_owned(),
            ));
        }

        let workdir = match tempfile::Builder::new().prefix("aido-update-").tempdir() {
            Ok(dir) => dir,
            Err(e) => return Ok(self.abort(format!("cannot create temp dir: {e}"))),
        };

        let root = match self.fetch_release(release, workdir.path()) {
            Ok(root) => root,
            Err(e) => {
                tracing::warn!(version = %release.version, error = %e, "update download failed");
                return Ok(self.abort(e.to_string()));
            }
        };
        self.enter(UpdatePhase::Downloaded);

        self.install_from(&root, &release.version, confirm)
    }

    fn fetch_release(&self, release: &ReleaseDescriptor, workdir: &Path) -> Result<PathBuf> {
        let archive_path = workdir.join("release.archive");
        let unpacked = workdir.join("release");
        archive::download(&release.download_url, &archive_path, self.download_timeout)?;
        archive::unpack(&archive_path, &unpacked)?;
        archive::release_root(&unpacked)
    }

    fn abort(&mut self, reason: String) -> UpdateOutcome {
        let phase = self.phase;
        if phase >= UpdatePhase::Downloaded {
            self.enter(UpdatePhase::RolledBack);
        }
        tracing::warn!(%phase, %reason, "update aborted; installation unchanged");
        UpdateOutcome::Aborted { phase, reason }
    }

    /// Install an already unpacked release: back up, reconcile settings,
    /// overlay files.
    ///
    /// # Errors
    ///
    /// See [`perform_update`](Self::perform_update).
    pub fn install_from(
        &mut self,
        release_root: &Path,
        version: &str,
        confirm: &dyn Confirm,
    ) -> Result<UpdateOutcome> {
        if self.phase < UpdatePhase::Downloaded {
            self.enter(UpdatePhase::Downloaded);
        }

        let backup = match backup::create_backup(&self.layout, self.clock.now()) {
            Ok(path) => path,
            Err(e @ AidoError::Fatal(_)) => {
                self.enter(UpdatePhase::RolledBack);
                return Err(e);
            }
            Err(e) => return Ok(self.abort(e.to_string())),
        };

        let journal_path = self.layout.journal_file();
        let mut journal = UpdateJournal {
            phase: JournalPhase::InProgress,
            from_version: self.layout.installed_version(),
            target_version: version.to_owned(),
            backup: backup.clone(),
            started_at: self.clock.now(),
        };
        if let Err(e) = journal.save(&journal_path) {
            self.discard_backup(&backup);
            return Ok(self.abort(e.to_string()));
        }
        self.enter(UpdatePhase::BackedUp);

        let example = release_root.join(self.layout.example_config_name());
        if example.is_file() {
            let reconciler = ConfigReconciler::new(self.layout.local_config(), &example)
                .with_clock(self.clock.clone());
            let reason = match reconciler.commit(confirm) {
                CommitOutcome::Declined { conflicts } => Some(
                    AidoError::UserDeclined(format!(
                        "new defaults for {}; manual migration required",
                        conflicts.join(", ")
                    ))
                    .to_string(),
                ),
                CommitOutcome::Failed(reason) => Some(reason),
                CommitOutcome::Bootstrapped | CommitOutcome::Merged { .. } => None,
            };
            if let Some(reason) = reason {
                self.discard_backup(&backup);
                if let Err(e) = UpdateJournal::clear(&journal_path) {
                    tracing::warn!(error = %e, "failed to clear update journal");
                }
                return Ok(self.abort(reason));
            }
        } else {
            tracing::info!("release ships no example configuration; settings left as is");
        }
        self.enter(UpdatePhase::ConfigMerged);

        if let Err(e) = self.overlay(release_root, version) {
            tracing::warn!(error = %e, "applying update failed; restoring backup");
            backup::restore_backup(&backup, &self.layout).map_err(|restore_err| {
                AidoError::Fatal(format!(
                    "update failed ({e}) and restoring {} failed ({restore_err}); \
                     restore it manually",
                    backup.display()
                ))
            })?;
            if let Err(e) = UpdateJournal::clear(&journal_path) {
                tracing::warn!(error = %e, "failed to clear update journal");
            }
            self.enter(UpdatePhase::RolledBack);
            return Ok(UpdateOutcome::RolledBack {
                reason: e.to_string(),
                backup,
            });
        }

        journal.phase = JournalPhase::Applied;
        if let Err(e) = journal.save(&journal_path) {
            tracing::warn!(error = %e, "failed to mark update as applied");
        }
        self.enter(UpdatePhase::Applied);
        self.refresh_installed_version();
        tracing::info!(version, backup = %backup.display(), "update applied");

        Ok(UpdateOutcome::Applied {
            version: version.to_owned(),
            backup,
        })
    }

    /// Copy every top-level entry of the release over the install home,
    /// except the example and local settings files.
    fn overlay(&self, release_root: &Path, version: &str) -> Result<()> {
        let home = self.layout.home();
        let example_name = self.layout.example_config_name();
        let local_name = self
            .layout
            .local_config()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut entries = std::fs::read_dir(release_root)?
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if name_str == example_name || name_str == local_name {
                continue;
            }
            let source = entry.path();
            let target = home.join(&name);
            let copied = if entry.file_type()?.is_dir() {
                backup::copy_tree(&source, &target, &|_| false)
            } else {
                std::fs::copy(&source, &target).map(|_| ())
            };
            copied.map_err(|e| {
                AidoError::Filesystem(format!("cannot install {}: {e}", target.display()))
            })?;
        }

        let version_name = self
            .layout
            .version_file()
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        if !release_root.join(&version_name).exists() {
            std::fs::write(self.layout.version_file(), format!("{version}\n"))?;
        }
        Ok(())
    }

    fn discard_backup(&self, backup: &Path) {
        if let Err(e) = std::fs::remove_dir_all(backup) {
            tracing::warn!(path = %backup.display(), error = %e, "failed to remove unused backup");
        }
    }

    /// Ask whether the new version works; on yes, remove every backup.
    ///
    /// Returns `true` if backups were pruned.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup directory cannot be listed.
    pub fn confirm_success(&mut self, confirm: &dyn Confirm) -> Result<bool> {
        let version = self.layout.installed_version();
        if !confirm.confirm(&Decision::NewVersionWorks { version: &version }) {
            tracing::info!("new version not confirmed; backups kept for manual rollback");
            return Ok(false);
        }
        backup::prune_backups(&self.layout)?;
        UpdateJournal::clear(&self.layout.journal_file())?;
        Ok(true)
    }

    /// Restore the install home from the journal's backup, or the newest
    /// backup when there is no journal.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no backup or the restore fails.
    pub fn rollback(&mut self) -> Result<PathBuf> {
        let journal_path = self.layout.journal_file();
        let from_journal = UpdateJournal::load(&journal_path)
            .ok()
            .flatten()
            .map(|j| j.backup)
            .filter(|b| b.is_dir());

        let backup = match from_journal {
            Some(b) => b,
            None => backup::list_backups(&self.layout)?
                .pop()
                .ok_or_else(|| AidoError::Filesystem("no backup to restore".to_owned()))?,
        };

        backup::restore_backup(&backup, &self.layout)?;
        UpdateJournal::clear(&journal_path)?;
        self.enter(UpdatePhase::RolledBack);
        self.refresh_installed_version();
        Ok(backup)
    }

    /// Inspect the journal and backups left by earlier runs.
    pub fn health(&self) -> InstallHealth {
        let backups = backup::list_backups(&self.layout).unwrap_or_default();
        match UpdateJournal::load(&self.layout.journal_file()) {
            Ok(Some(journal)) if journal.phase == JournalPhase::Applied => {
                InstallHealth::AwaitingConfirmation { journal }
            }
            Ok(Some(journal)) => InstallHealth::Interrupted {
                journal: Some(journal),
                backups,
            },
            Err(e) => {
                tracing::warn!(error = %e, "update journal unreadable");
                InstallHealth::Interrupted {
                    journal: None,
                    backups,
                }
            }
            Ok(None) if backups.is_empty() => InstallHealth::Clean,
            Ok(None) => InstallHealth::UnverifiedBackups { backups },
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::InstallConfig;
    use crate::prompt::{AssumeNo, AssumeYes};
    use crate::update::state::testing::{ManualClock, MemoryCheckStore};
    use chrono::DateTime;

    fn updater(root: &Path) -> Updater {
        let home = root.join("aido");
        std::fs::create_dir_all(home.join("lib")).unwrap();
        std::fs::write(home.join("VERSION"), "v1.0.0\n").unwrap();
        std::fs::write(home.join("aido.py"), "v1").unwrap();
        std::fs::write(home.join("lib").join("core.py"), "core v1").unwrap();
        std::fs::write(home.join(".env.local"), "LOG_LEVEL=INFO\n").unwrap();

        let layout = InstallLayout::new(home, InstallConfig::default());
        let config = UpdateConfig {
            feed_url: "http://127.0.0.1:9/latest".to_owned(),
            ..UpdateConfig::default()
        };
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at(
            DateTime::from_timestamp(1_760_000_000, 0).unwrap(),
        ));
        let checker = ReleaseChecker::new(
            &config,
            layout.installed_version(),
            Box::new(MemoryCheckStore::default()),
            clock.clone(),
        );
        Updater::with_checker(layout, &config, checker, clock)
    }

    fn release(root: &Path, example: &str) -> PathBuf {
        let dir = root.join("release");
        std::fs::create_dir_all(dir.join("lib")).unwrap();
        std::fs::write(dir.join("VERSION"), "v1.1.0\n").unwrap();
        std::fs::write(dir.join("aido.py"), "v2").unwrap();
        std::fs::write(dir.join("lib").join("extra.py"), "extra").unwrap();
        std::fs::write(dir.join(".env.local.example"), example).unwrap();
        dir
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn successful_install_overlays_files_and_keeps_backup() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut updater = updater(dir.path());
        let root = release(dir.path(), "# level\nLOG_LEVEL=INFO\nNEW=1\n");

        let outcome = updater.install_from(&root, "v1.1.0", &AssumeNo).unwrap();
        let UpdateOutcome::Applied { backup, .. } = outcome else {
            panic!("expected the update to apply");
        };
        assert_eq!(updater.phase(), UpdatePhase::Applied);

        let home = updater.layout().home().to_path_buf();
        assert_eq!(read(&home.join("aido.py")), "v2");
        assert_eq!(read(&home.join("lib").join("core.py")), "core v1");
        assert_eq!(read(&home.join("lib").join("extra.py")), "extra");
        assert!(!home.join(".env.local.example").exists());
        assert!(read(&home.join(".env.local")).contains("NEW=1"));
        assert_eq!(read(&backup.join("aido.py")), "v1");

        assert!(matches!(
            updater.health(),
            InstallHealth::AwaitingConfirmation { .. }
        ));
    }

    #[test]
    fn declined_config_merge_aborts_without_changes() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut updater = updater(dir.path());
        let root = release(dir.path(), "LOG_LEVEL=DEBUG\n");

        let outcome = updater.install_from(&root, "v1.1.0", &AssumeNo).unwrap();
        let UpdateOutcome::Aborted { phase, reason } = outcome else {
            panic!("expected the update to abort");
        };
        assert_eq!(phase, UpdatePhase::BackedUp);
        assert!(reason.starts_with("declined:"));
        assert!(reason.contains("LOG_LEVEL"));
        assert_eq!(updater.phase(), UpdatePhase::RolledBack);

        let home = updater.layout().home().to_path_buf();
        assert_eq!(read(&home.join("aido.py")), "v1");
        assert_eq!(read(&home.join(".env.local")), "LOG_LEVEL=INFO\n");
        assert_eq!(updater.health(), InstallHealth::Clean);
    }

    #[test]
    fn release_without_version_marker_records_descriptor_version() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut updater = updater(dir.path());
        let root = release(dir.path(), "LOG_LEVEL=INFO\n");
        std::fs::remove_file(root.join("VERSION")).unwrap();

        let outcome = updater.install_from(&root, "v1.2.0", &AssumeYes).unwrap();
        assert!(outcome.is_applied());
        assert_eq!(updater.layout().installed_version(), "v1.2.0");
    }

    #[test]
    fn checks_after_install_compare_against_new_version() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut updater = updater(dir.path());
        assert_eq!(updater.checker().installed_version(), "v1.0.0");

        let root = release(dir.path(), "LOG_LEVEL=INFO\n");
        updater.install_from(&root, "v1.1.0", &AssumeYes).unwrap();
        assert_eq!(updater.checker().installed_version(), "v1.1.0");

        // Feed unreachable; the comparison base is still refreshed.
        std::fs::write(updater.layout().version_file(), "v1.1.5\n").unwrap();
        updater.check_now();
        assert_eq!(updater.checker().installed_version(), "v1.1.5");

        updater.rollback().unwrap();
        assert_eq!(updater.checker().installed_version(), "v1.0.0");
    }

    #[test]
    fn confirmation_prunes_only_on_yes() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut updater = updater(dir.path());
        let root = release(dir.path(), "LOG_LEVEL=INFO\n");
        updater.install_from(&root, "v1.1.0", &AssumeYes).unwrap();

        assert!(!updater.confirm_success(&AssumeNo).unwrap());
        assert_eq!(backup::list_backups(updater.layout()).unwrap().len(), 1);

        assert!(updater.confirm_success(&AssumeYes).unwrap());
        assert!(backup::list_backups(updater.layout()).unwrap().is_empty());
        assert_eq!(updater.health(), InstallHealth::Clean);
    }

    #[test]
    fn interrupted_update_blocks_new_updates_until_rollback() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut updater = updater(dir.path());
        let layout = updater.layout().clone();

        let backup = backup::create_backup(&layout, chrono::Utc::now()).unwrap();
        UpdateJournal {
            phase: JournalPhase::InProgress,
            from_version: "v1.0.0".to_owned(),
            target_version: "v1.1.0".to_owned(),
            backup: backup.clone(),
            started_at: chrono::Utc::now(),
        }
        .save(&layout.journal_file())
        .unwrap();
        std::fs::write(layout.home().join("aido.py"), "half-written").unwrap();

        assert!(matches!(updater.health(), InstallHealth::Interrupted { .. }));

        let descriptor = ReleaseDescriptor {
            version: "v1.1.0".to_owned(),
            description: String::new(),
            download_url: "http://127.0.0.1:9/a.zip".to_owned(),
        };
        let outcome = updater.perform_update(&descriptor, &AssumeYes).unwrap();
        assert!(matches!(outcome, UpdateOutcome::Aborted { phase: UpdatePhase::Idle, .. }));

        assert_eq!(updater.rollback().unwrap(), backup);
        assert_eq!(read(&layout.home().join("aido.py")), "v1");
        assert!(matches!(
            updater.health(),
            InstallHealth::UnverifiedBackups { .. }
        ));
    }

    #[test]
    fn unreachable_download_aborts_before_backup() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut updater = updater(dir.path());
        let descriptor = ReleaseDescriptor {
            version: "v1.1.0".to_owned(),
            description: String::new(),
            download_url: "http://127.0.0.1:9/a.zip".to_owned(),
        };

        let outcome = updater.perform_update(&descriptor, &AssumeYes).unwrap();
        assert!(matches!(outcome, UpdateOutcome::Aborted { .. }));
        assert!(backup::list_backups(updater.layout()).unwrap().is_empty());
        assert_eq!(updater.health(), InstallHealth::Clean);
    }

    #[test]
    fn phase_names() {
        assert_eq!(UpdatePhase::ConfigMerged.to_string(), "config_merged");
        assert!(UpdatePhase::Downloaded < UpdatePhase::BackedUp);
    }
}
