//! Filesystem locations for the tool and its installation.
//!
//! # Environment Overrides
//!
//! - `AIDO_HOME`: overrides [`install_home`]
//! - `AIDO_CONFIG_DIR`: overrides [`config_dir`]

use crate::config::InstallConfig;
use std::path::{Path, PathBuf};

/// Version reported when the installation carries no version marker.
pub const UNKNOWN_VERSION: &str = "v0.0.0";

/// Settings directory, `dirs::config_dir()/aido/` by default.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("AIDO_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("aido"))
        .unwrap_or_else(|| PathBuf::from("/tmp/aido-config"))
}

/// Installation directory.
///
/// `AIDO_HOME` when set, otherwise the directory holding the running
/// executable.
///
/// # Errors
///
/// Returns an error if the executable path cannot be determined.
pub fn install_home() -> crate::error::Result<PathBuf> {
    if let Some(home) = std::env::var_os("AIDO_HOME") {
        return Ok(PathBuf::from(home));
    }
    let exe = std::env::current_exe().map_err(|e| {
        crate::error::AidoError::Filesystem(format!("cannot determine executable path: {e}"))
    })?;
    exe.parent().map(Path::to_path_buf).ok_or_else(|| {
        crate::error::AidoError::Filesystem(format!("{} has no parent directory", exe.display()))
    })
}

/// Resolved paths of one installation.
#[derive(Debug, Clone)]
pub struct InstallLayout {
    home: PathBuf,
    names: InstallConfig,
}

impl InstallLayout {
    pub fn new(home: impl Into<PathBuf>, names: InstallConfig) -> Self {
        Self {
            home: home.into(),
            names,
        }
    }

    /// The installation directory itself.
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Directory that holds the installation, its backups and the journal.
    pub fn parent(&self) -> PathBuf {
        match self.home.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn tool_name(&self) -> &str {
        &self.names.tool_name
    }

    pub fn version_file(&self) -> PathBuf {
        self.home.join(&self.names.version_file)
    }

    pub fn check_file(&self) -> PathBuf {
        self.home.join(&self.names.check_file)
    }

    /// File name of the last-check record.
    pub fn check_file_name(&self) -> &str {
        &self.names.check_file
    }

    pub fn local_config(&self) -> PathBuf {
        self.home.join(&self.names.local_config)
    }

    /// File name of the example settings inside a release.
    pub fn example_config_name(&self) -> &str {
        &self.names.example_config
    }

    /// Prefix shared by every backup directory name.
    pub fn backup_prefix(&self) -> String {
        format!("{}.bak_", self.names.tool_name)
    }

    /// Update journal, kept beside (not inside) the installation so that a
    /// wholesale restore does not erase it.
    pub fn journal_file(&self) -> PathBuf {
        self.parent()
            .join(format!(".{}.update.json", self.names.tool_name))
    }

    pub fn backup_exclude(&self) -> &[String] {
        &self.names.backup_exclude
    }

    /// Installed version from the marker file, or [`UNKNOWN_VERSION`].
    pub fn installed_version(&self) -> String {
        match std::fs::read_to_string(self.version_file()) {
            Ok(s) if !s.trim().is_empty() => s.trim().to_owned(),
            _ => UNKNOWN_VERSION.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn layout_paths_follow_install_config() {
        let layout = InstallLayout::new("/opt/tools/aido", InstallConfig::default());
        assert_eq!(layout.parent(), PathBuf::from("/opt/tools"));
        assert_eq!(layout.version_file(), PathBuf::from("/opt/tools/aido/VERSION"));
        assert_eq!(layout.local_config(), PathBuf::from("/opt/tools/aido/.env.local"));
        assert_eq!(layout.backup_prefix(), "aido.bak_");
        assert_eq!(
            layout.journal_file(),
            PathBuf::from("/opt/tools/.aido.update.json")
        );
    }

    #[test]
    fn relative_home_uses_current_dir_as_parent() {
        let layout = InstallLayout::new("aido", InstallConfig::default());
        assert_eq!(layout.parent(), PathBuf::from("."));
    }

    #[test]
    fn installed_version_reads_trimmed_marker() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let layout = InstallLayout::new(dir.path(), InstallConfig::default());
        assert_eq!(layout.installed_version(), UNKNOWN_VERSION);

        std::fs::write(layout.version_file(), "v1.2.0\n").unwrap();
        assert_eq!(layout.installed_version(), "v1.2.0");
    }
}
