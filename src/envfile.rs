//! `key=value` settings files with attached comments.
//!
//! A comment block directly above a key documents that key and travels with
//! it through a merge. A blank line ends a comment block without attaching
//! it to anything. A comment block at the very end of a file belongs to the
//! file itself and is kept as its trailer.

use crate::error::Result;
use std::path::Path;

/// Marker prefixed to the line that records a newly shipped default which
/// was not applied because the user has their own value.
pub const NEW_VALUE_MARKER: &str = "# 新版本值:";

/// One recognized key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub value: String,
    /// Comment lines directly above the key, in file order.
    pub comments: Vec<String>,
}

/// Keys of one file in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    entries: Vec<(String, ConfigEntry)>,
    trailer: Vec<String>,
}

impl ConfigFile {
    /// Parse file contents.
    ///
    /// A repeated key keeps its first position but takes the later value
    /// and comments. Lines that are neither blank, comments nor `key=value`
    /// are ignored.
    pub fn parse_str(content: &str) -> Self {
        let mut file = Self::default();
        let mut pending: Vec<String> = Vec::new();

        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() {
                pending.clear();
                continue;
            }
            if line.starts_with('#') {
                pending.push(line.to_owned());
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                file.insert(
                    key.trim().to_owned(),
                    ConfigEntry {
                        value: value.trim().to_owned(),
                        comments: std::mem::take(&mut pending),
                    },
                );
            }
        }

        file.trailer = pending;
        file
    }

    /// Read and parse a file. A missing file is an empty `ConfigFile`.
    ///
    /// # Errors
    ///
    /// Returns an error for any read failure other than "not found".
    pub fn parse(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse_str(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn insert(&mut self, key: String, entry: ConfigEntry) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = entry,
            None => self.entries.push((key, entry)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ConfigEntry> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, entry)| entry)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigEntry)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }

    /// Comment lines at the end of the file that precede no key.
    pub fn trailer(&self) -> &[String] {
        &self.trailer
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Output of [`merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeResult {
    pub lines: Vec<String>,
    /// Keys present in both files with different values, in example order.
    pub conflicts: Vec<String>,
}

impl MergeResult {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// File contents for the merged lines.
    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

/// Merge the user's `local` settings into the layout of a newer `example`.
///
/// Example keys come first, in example order, with the example's comments.
/// A differing local value wins and the example's value is kept in a
/// [`NEW_VALUE_MARKER`] comment. The example's trailer comes next, then keys
/// only the user has, each with its own comments.
pub fn merge(local: &ConfigFile, example: &ConfigFile) -> MergeResult {
    let mut result = MergeResult::default();

    for (key, shipped) in example.iter() {
        result.lines.extend(shipped.comments.iter().cloned());

        match local.get(key) {
            Some(mine) if mine.value != shipped.value => {
                result.conflicts.push(key.to_owned());
                result
                    .lines
                    .push(format!("{NEW_VALUE_MARKER} {key}={}", shipped.value));
                result.lines.push(format!("{key}={}", mine.value));
            }
            Some(mine) => result.lines.push(format!("{key}={}", mine.value)),
            None => result.lines.push(format!("{key}={}", shipped.value)),
        }

        result.lines.push(String::new());
    }

    let mut local_only = local
        .iter()
        .filter(|(k, _)| !example.contains_key(k))
        .peekable();

    if !example.trailer.is_empty() {
        result.lines.extend(example.trailer.iter().cloned());
        if local_only.peek().is_some() {
            result.lines.push(String::new());
        }
    }

    for (key, mine) in local_only {
        result.lines.extend(mine.comments.iter().cloned());
        result.lines.push(format!("{key}={}", mine.value));
        result.lines.push(String::new());
    }

    result
}
