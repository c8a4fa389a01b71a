//! Release descriptors as published by the release feed.

use crate::error::{AidoError, Result};
use serde::Deserialize;

/// Metadata for one published version. Fetched fresh on every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    /// Release tag, compared as a plain string.
    pub version: String,
    /// Changelog text.
    pub description: String,
    /// Location of the release archive.
    pub download_url: String,
}

impl ReleaseDescriptor {
    /// Plain lexical comparison; tags are not parsed as semantic versions.
    pub fn is_newer_than(&self, installed: &str) -> bool {
        self.version.as_str() > installed
    }

    /// Announcement shown when this release is newer than `current`.
    pub fn changelog_message(&self, current: &str) -> String {
        format!(
            "New version available!\nCurrent version: {current}\nLatest version: {}\n\nChanges:\n{}",
            self.version, self.description
        )
    }
}

/// Outcome of one release feed request.
#[derive(Debug)]
pub enum FeedResult {
    Parsed(ReleaseDescriptor),
    /// No release information; the error says why.
    Unavailable(AidoError),
}

#[derive(Debug, Deserialize)]
struct ReleaseWire {
    tag_name: String,
    body: Option<String>,
    zipball_url: Option<String>,
    tarball_url: Option<String>,
}

/// Parse a release feed response body.
///
/// The archive location is the feed's zipball, falling back to its tarball.
///
/// # Errors
///
/// Returns [`AidoError::MalformedRemoteData`] if the body is not a release
/// object, the tag is empty, or no archive location is present.
pub fn parse_release(body: &str) -> Result<ReleaseDescriptor> {
    let wire: ReleaseWire = serde_json::from_str(body)
        .map_err(|e| AidoError::MalformedRemoteData(format!("release feed: {e}")))?;

    let version = wire.tag_name.trim().to_owned();
    if version.is_empty() {
        return Err(AidoError::MalformedRemoteData(
            "release feed: empty tag_name".to_owned(),
        ));
    }

    let download_url = wire
        .zipball_url
        .or(wire.tarball_url)
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| {
            AidoError::MalformedRemoteData(format!(
                "release feed: {version} has no archive location"
            ))
        })?;

    Ok(ReleaseDescriptor {
        version,
        description: wire.body.unwrap_or_default(),
        download_url,
    })
}
