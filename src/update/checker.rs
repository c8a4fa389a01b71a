//! Release feed checker.
//!
//! Polls the release feed at most once per check interval, compares the
//! latest tag against the installed version as plain strings, and never
//! turns a feed failure into an error for the caller.

use super::release::{self, FeedResult, ReleaseDescriptor};
use super::state::{CheckStore, Clock};
use crate::config::UpdateConfig;
use crate::error::AidoError;
use std::sync::Arc;
use std::time::Duration;

/// Answer to "is there something to install?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub has_update: bool,
    /// Empty when no check was due.
    pub message: String,
    /// The fetched release, when the feed answered.
    pub release: Option<ReleaseDescriptor>,
}

impl CheckResult {
    fn nothing(message: impl Into<String>) -> Self {
        Self {
            has_update: false,
            message: message.into(),
            release: None,
        }
    }
}

pub struct ReleaseChecker {
    feed_url: String,
    timeout: Duration,
    interval: chrono::Duration,
    installed_version: String,
    store: Box<dyn CheckStore>,
    clock: Arc<dyn Clock>,
}

impl ReleaseChecker {
    pub fn new(
        config: &UpdateConfig,
        installed_version: impl Into<String>,
        store: Box<dyn CheckStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            feed_url: config.feed_url.clone(),
            timeout: Duration::from_secs(config.check_timeout_secs),
            interval: i64::try_from(config.check_interval_hours)
                .ok()
                .and_then(chrono::Duration::try_hours)
                .unwrap_or(chrono::Duration::MAX),
            installed_version: installed_version.into(),
            store,
            clock,
        }
    }

    pub fn installed_version(&self) -> &str {
        &self.installed_version
    }

    /// Version that later checks compare against.
    pub fn set_installed_version(&mut self, version: impl Into<String>) {
        self.installed_version = version.into();
    }

    /// When the last check was recorded, if it can be read.
    pub fn last_check(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.store.read()
    }

    /// `true` if no check is on record or the interval has elapsed.
    pub fn is_check_due(&self) -> bool {
        match self.store.read() {
            Some(last) => self.clock.now() - last > self.interval,
            None => true,
        }
    }

    /// Record that a check happened now. Failures are logged only.
    pub fn record_check_now(&self) {
        if let Err(e) = self.store.write(self.clock.now()) {
            tracing::warn!(error = %e, "failed to record update check time");
        }
    }

    /// One request to the release feed.
    pub fn fetch_latest(&self) -> FeedResult {
        match self.request_feed() {
            Ok(release) => {
                tracing::debug!(version = %release.version, "release feed answered");
                FeedResult::Parsed(release)
            }
            Err(e) => {
                tracing::warn!(url = %self.feed_url, error = %e, "failed to fetch latest release");
                FeedResult::Unavailable(e)
            }
        }
    }

    fn request_feed(&self) -> crate::error::Result<ReleaseDescriptor> {
        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();

        let resp = agent
            .get(&self.feed_url)
            .set("User-Agent", concat!("aido/", env!("CARGO_PKG_VERSION"), " (update check)"))
            .set("Accept", "application/json")
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => {
                    AidoError::NetworkUnavailable(format!("release feed returned HTTP {code}"))
                }
                ureq::Error::Transport(t) => AidoError::NetworkUnavailable(t.to_string()),
            })?;

        if resp.status() != 200 {
            return Err(AidoError::MalformedRemoteData(format!(
                "release feed returned HTTP {}",
                resp.status()
            )));
        }

        let body = resp
            .into_string()
            .map_err(|e| AidoError::NetworkUnavailable(format!("release feed read: {e}")))?;
        release::parse_release(&body)
    }

    /// Rate-limited check: does nothing unless [`is_check_due`](Self::is_check_due).
    pub fn check_for_update(&self) -> CheckResult {
        if !self.is_check_due() {
            tracing::debug!("update check not due");
            return CheckResult::nothing("");
        }
        self.check_now()
    }

    /// Check regardless of the interval. The check time is still recorded.
    pub fn check_now(&self) -> CheckResult {
        let fetched = self.fetch_latest();
        self.record_check_now();

        match fetched {
            FeedResult::Unavailable(_) => CheckResult::nothing("update check failed"),
            FeedResult::Parsed(release) if !release.is_newer_than(&self.installed_version) => {
                CheckResult {
                    has_update: false,
                    message: format!(
                        "current version {} is already the latest",
                        self.installed_version
                    ),
                    release: Some(release),
                }
            }
            FeedResult::Parsed(release) => CheckResult {
                has_update: true,
                message: release.changelog_message(&self.installed_version),
                release: Some(release),
            },
        }
    }
}
