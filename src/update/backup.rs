//! Installation backups and their retention.
//!
//! A backup is a full copy of the install home placed beside it as
//! `<tool>.bak_<YYYYmmdd_HHMMSS>`. Backups are only removed in bulk, after
//! the operator confirms that a new version works.

use crate::aido_dirs::InstallLayout;
use crate::error::{AidoError, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Timestamp format shared by install and config backups.
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Entry names a backup leaves out: other backups, the last-check record
/// and excluded artifacts.
fn not_backed_up(layout: &InstallLayout) -> impl Fn(&str) -> bool + '_ {
    let prefix = layout.backup_prefix();
    move |name: &str| {
        name.starts_with(&prefix)
            || name == layout.check_file_name()
            || is_excluded(name, layout.backup_exclude())
    }
}

/// First unused path among `base`, `base_1`, `base_2`, ...
fn first_unused(base: String) -> PathBuf {
    let candidate = PathBuf::from(&base);
    if !candidate.exists() {
        return candidate;
    }
    (1u32..)
        .map(|n| PathBuf::from(format!("{base}_{n}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// `<path>.bak_<timestamp>`, disambiguated against existing files.
pub fn timestamped_sibling(path: &Path, now: DateTime<Utc>) -> PathBuf {
    first_unused(format!(
        "{}.bak_{}",
        path.display(),
        now.format(TIMESTAMP_FORMAT)
    ))
}

/// Whether `name` matches one of the exclusion entries: an exact name, or a
/// `*.ext` suffix pattern.
fn is_excluded(name: &str, exclude: &[String]) -> bool {
    exclude.iter().any(|pattern| match pattern.strip_prefix('*') {
        Some(suffix) => name.ends_with(suffix),
        None => name == pattern,
    })
}

/// Recursively copy `src` into `dst`, merging into existing directories and
/// overwriting existing files. `skip` is asked about every entry name.
pub(crate) fn copy_tree(src: &Path, dst: &Path, skip: &dyn Fn(&str) -> bool) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if skip(&name.to_string_lossy()) {
            continue;
        }
        let from = entry.path();
        let to = dst.join(&name);
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            copy_tree(&from, &to, skip)?;
        } else if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> std::io::Result<()> {
    let target = std::fs::read_link(from)?;
    if to.symlink_metadata().is_ok() {
        std::fs::remove_file(to)?;
    }
    std::os::unix::fs::symlink(target, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::copy(from, to).map(|_| ())
}

/// Copy the install home to a new timestamped backup beside it.
///
/// Other backups and the configured transient artifacts are left out.
///
/// # Errors
///
/// Returns [`AidoError::Fatal`] when the disk is full and
/// [`AidoError::Filesystem`] for any other copy failure. A partial backup is
/// removed before returning.
pub fn create_backup(layout: &InstallLayout, now: DateTime<Utc>) -> Result<PathBuf> {
    let prefix = layout.backup_prefix();
    let base = layout
        .parent()
        .join(format!("{prefix}{}", now.format(TIMESTAMP_FORMAT)));
    let backup = first_unused(base.display().to_string());
    let skip = not_backed_up(layout);

    if let Err(e) = copy_tree(layout.home(), &backup, &skip) {
        let _ = std::fs::remove_dir_all(&backup);
        let message = format!(
            "cannot back up {} to {}: {e}",
            layout.home().display(),
            backup.display()
        );
        return Err(if e.kind() == std::io::ErrorKind::StorageFull {
            AidoError::Fatal(message)
        } else {
            AidoError::Filesystem(message)
        });
    }

    tracing::info!(backup = %backup.display(), "installation backed up");
    Ok(backup)
}

/// All backup directories beside the install home, oldest first.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be read.
pub fn list_backups(layout: &InstallLayout) -> Result<Vec<PathBuf>> {
    let parent = layout.parent();
    let prefix = layout.backup_prefix();

    let mut backups: Vec<PathBuf> = std::fs::read_dir(&parent)
        .map_err(|e| AidoError::Filesystem(format!("cannot read {}: {e}", parent.display())))?
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().ok()?.is_dir();
            (is_dir && name.starts_with(&prefix)).then(|| entry.path())
        })
        .collect();

    // Timestamped names sort chronologically.
    backups.sort();
    Ok(backups)
}

/// Remove every backup directory beside the install home.
///
/// Returns the number removed. Individual failures are logged and skipped.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be read.
pub fn prune_backups(layout: &InstallLayout) -> Result<usize> {
    let mut removed = 0;
    for backup in list_backups(layout)? {
        match std::fs::remove_dir_all(&backup) {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::warn!(path = %backup.display(), error = %e, "failed to delete backup");
            }
        }
    }
    tracing::info!(removed, "backups pruned");
    Ok(removed)
}

/// Delete everything under `dir` except entries `keep` matches, and the
/// directories that still hold them.
fn clear_tree(dir: &Path, keep: &dyn Fn(&str) -> bool) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if keep(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            clear_tree(&path, keep)?;
            if std::fs::read_dir(&path)?.next().is_none() {
                std::fs::remove_dir(&path)?;
            }
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Return the install home to exactly the state captured in `backup`.
///
/// Everything a backup would have captured is removed first, so files the
/// failed update added do not survive. Excluded artifacts stay in place.
///
/// # Errors
///
/// Returns an error if the backup is missing, or the home cannot be cleared
/// or repopulated.
pub fn restore_backup(backup: &Path, layout: &InstallLayout) -> Result<()> {
    if !backup.is_dir() {
        return Err(AidoError::Filesystem(format!(
            "backup {} does not exist",
            backup.display()
        )));
    }

    let home = layout.home();
    let keep = not_backed_up(layout);
    if home.exists() {
        clear_tree(home, &keep).map_err(|e| {
            AidoError::Filesystem(format!("cannot clear {}: {e}", home.display()))
        })?;
    }

    copy_tree(backup, home, &|_| false).map_err(|e| {
        AidoError::Filesystem(format!(
            "cannot restore {} from {}: {e}",
            home.display(),
            backup.display()
        ))
    })?;

    tracing::info!(backup = %backup.display(), home = %home.display(), "installation restored");
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::InstallConfig;

    fn install(root: &Path) -> InstallLayout {
        let home = root.join("aido");
        std::fs::create_dir_all(home.join("lib")).unwrap();
        std::fs::create_dir_all(home.join(".git")).unwrap();
        std::fs::create_dir_all(home.join("__pycache__")).unwrap();
        std::fs::write(home.join("VERSION"), "v1.0.0").unwrap();
        std::fs::write(home.join("lib").join("core.py"), "print('v1')").unwrap();
        std::fs::write(home.join("lib").join("core.pyc"), [0u8, 1, 2]).unwrap();
        std::fs::write(home.join(".git").join("HEAD"), "ref").unwrap();
        InstallLayout::new(home, InstallConfig::default())
    }

    fn noon() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn backup_copies_tree_without_transient_artifacts() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let layout = install(dir.path());

        let backup = create_backup(&layout, noon()).unwrap();
        assert_eq!(
            backup.file_name().unwrap().to_string_lossy(),
            "aido.bak_20261019_120000"
        );
        assert_eq!(
            std::fs::read_to_string(backup.join("lib").join("core.py")).unwrap(),
            "print('v1')"
        );
        assert!(backup.join("VERSION").exists());
        assert!(!backup.join(".git").exists());
        assert!(!backup.join("__pycache__").exists());
        assert!(!backup.join("lib").join("core.pyc").exists());
    }

    #[test]
    fn same_second_backups_get_distinct_names() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let layout = install(dir.path());

        let first = create_backup(&layout, noon()).unwrap();
        let second = create_backup(&layout, noon()).unwrap();
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("aido.bak_20261019_120000_1"));
        assert_eq!(list_backups(&layout).unwrap(), vec![first, second]);
    }

    #[test]
    fn prune_removes_every_backup_and_nothing_else() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let layout = install(dir.path());
        std::fs::create_dir_all(dir.path().join("aido.bak_20200101_000000")).unwrap();
        create_backup(&layout, noon()).unwrap();
        create_backup(&layout, noon()).unwrap();
        std::fs::create_dir_all(dir.path().join("unrelated")).unwrap();

        assert_eq!(prune_backups(&layout).unwrap(), 3);
        assert!(list_backups(&layout).unwrap().is_empty());
        assert!(dir.path().join("unrelated").exists());
        assert!(layout.home().join("VERSION").exists());
    }

    #[test]
    fn restore_returns_home_to_backed_up_state() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let layout = install(dir.path());
        let backup = create_backup(&layout, noon()).unwrap();

        std::fs::write(layout.home().join("VERSION"), "v2.0.0").unwrap();
        std::fs::write(layout.home().join("stray.txt"), "new file").unwrap();
        std::fs::create_dir_all(layout.home().join("plugins")).unwrap();
        std::fs::write(layout.home().join("plugins").join("p.py"), "new").unwrap();

        restore_backup(&backup, &layout).unwrap();
        assert_eq!(
            std::fs::read_to_string(layout.home().join("VERSION")).unwrap(),
            "v1.0.0"
        );
        assert!(!layout.home().join("stray.txt").exists());
        assert!(!layout.home().join("plugins").exists());
        assert!(backup.exists());

        // Excluded artifacts were never in the backup and are left alone.
        assert!(layout.home().join(".git").join("HEAD").exists());
        assert!(layout.home().join("lib").join("core.pyc").exists());
    }

    #[test]
    fn last_check_record_survives_restore() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let layout = install(dir.path());
        std::fs::write(layout.check_file(), "1700000000.000000").unwrap();

        let backup = create_backup(&layout, noon()).unwrap();
        assert!(!backup.join(".last_check").exists());

        std::fs::write(layout.check_file(), "1800000000.000000").unwrap();
        restore_backup(&backup, &layout).unwrap();
        assert_eq!(
            std::fs::read_to_string(layout.check_file()).unwrap(),
            "1800000000.000000"
        );
    }

    #[test]
    fn restore_from_missing_backup_leaves_home_alone() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let layout = install(dir.path());

        let result = restore_backup(&dir.path().join("aido.bak_missing"), &layout);
        assert!(result.is_err());
        assert!(layout.home().join("VERSION").exists());
    }

    #[test]
    fn config_backup_names_are_disambiguated() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let local = dir.path().join(".env.local");

        let first = timestamped_sibling(&local, noon());
        assert!(first.to_string_lossy().ends_with(".env.local.bak_20261019_120000"));
        std::fs::write(&first, "x").unwrap();

        let second = timestamped_sibling(&local, noon());
        assert!(second.to_string_lossy().ends_with(".env.local.bak_20261019_120000_1"));
    }

    #[test]
    fn exclusion_patterns() {
        let exclude = vec![".git".to_owned(), "*.pyc".to_owned()];
        assert!(is_excluded(".git", &exclude));
        assert!(is_excluded("mod.pyc", &exclude));
        assert!(!is_excluded("mod.py", &exclude));
        assert!(!is_excluded(".github", &exclude));
    }
}
