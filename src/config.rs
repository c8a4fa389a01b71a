//! Configuration types for the updater.
//!
//! Settings live in an optional TOML file; every field has a default so an
//! absent or partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AidoConfig {
    /// Release feed and scheduling settings.
    pub update: UpdateConfig,
    /// Names of the files that make up an installation.
    pub install: InstallConfig,
}

/// Release feed and scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Endpoint returning the latest release descriptor as JSON.
    pub feed_url: String,
    /// Minimum number of hours between two remote checks.
    pub check_interval_hours: u64,
    /// Timeout for the release feed request, in seconds.
    pub check_timeout_secs: u64,
    /// Ceiling for a whole archive download, in seconds.
    pub download_timeout_secs: u64,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            feed_url: "https://api.github.com/repos/zyjarge/aido/releases/latest".to_owned(),
            check_interval_hours: 24,
            check_timeout_secs: 5,
            download_timeout_secs: 600,
        }
    }
}

/// Names of the files that make up an installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Tool name; prefixes backup directories and the update journal.
    pub tool_name: String,
    /// User's live settings, relative to the install home.
    pub local_config: String,
    /// Example settings shipped with each release.
    pub example_config: String,
    /// Single-line installed version marker.
    pub version_file: String,
    /// Last remote check timestamp.
    pub check_file: String,
    /// Names or `*.ext` patterns left out of backups.
    pub backup_exclude: Vec<String>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            tool_name: "aido".to_owned(),
            local_config: ".env.local".to_owned(),
            example_config: ".env.local.example".to_owned(),
            version_file: "VERSION".to_owned(),
            check_file: ".last_check".to_owned(),
            backup_exclude: vec![
                ".git".to_owned(),
                "__pycache__".to_owned(),
                "*.pyc".to_owned(),
                "target".to_owned(),
            ],
        }
    }
}

impl AidoConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::AidoError::Config(e.to_string()))
    }

    /// Load from an explicit path, `$AIDO_CONFIG`, or the default location.
    ///
    /// An explicit or environment path must exist; the default location is
    /// optional and falls back to built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a selected file cannot be read or parsed.
    pub fn load(explicit: Option<&Path>) -> crate::error::Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = std::env::var_os("AIDO_CONFIG") {
            return Self::from_file(Path::new(&path));
        }
        let path = Self::default_config_path();
        if path.is_file() {
            tracing::debug!(path = %path.display(), "loading config");
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Returns the default config file path: `<config dir>/aido/config.toml`.
    pub fn default_config_path() -> PathBuf {
        crate::aido_dirs::config_dir().join("config.toml")
    }
}

/// Map a `LOG_LEVEL` setting (`DEBUG`, `INFO`, `WARNING`, `ERROR`,
/// `CRITICAL`, any case) to a tracing level name.
pub fn log_level_directive(value: &str) -> Option<&'static str> {
    match value.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Some("trace"),
        "DEBUG" => Some("debug"),
        "INFO" => Some("info"),
        "WARN" | "WARNING" => Some("warn"),
        "ERROR" | "CRITICAL" => Some("error"),
        _ => None,
    }
}
