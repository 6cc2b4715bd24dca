//! File sets: validated mappings of relative path to text content.
//!
//! Every key that enters a [`FileSet`] is checked for absolute paths and
//! `..` components. Keys ending in a separator are kept (they are directory
//! markers a generator may hallucinate) and skipped when materialized.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Synthetic log holding the sandbox output of the latest verification.
pub const TEST_RESULTS_FILE: &str = "TEST_RESULTS.log";

/// Reserved key for parser and generation diagnostics.
pub const ERROR_LOG_FILE: &str = "error_log.txt";

/// Reasons a path is refused as a file set key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("absolute path '{0}' is not allowed")]
    Absolute(String),

    #[error("path '{0}' escapes the workspace via '..'")]
    Traversal(String),
}

/// Validates a generated path and returns its normalized form.
///
/// Leading `./` segments are removed. Absolute paths (including Windows drive
/// prefixes) and any `..` component are rejected.
pub fn validate_relative_path(path: &str) -> Result<String, PathError> {
    let mut normalized = path.trim();
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest;
    }

    if normalized.is_empty() {
        return Err(PathError::Empty);
    }

    if normalized.starts_with('/') || normalized.starts_with('\\') || has_drive_prefix(normalized)
    {
        return Err(PathError::Absolute(path.to_string()));
    }

    if normalized.split(['/', '\\']).any(|part| part == "..") {
        return Err(PathError::Traversal(path.to_string()));
    }

    Ok(normalized.to_string())
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Returns true for keys that name a directory rather than a file.
pub fn is_directory_marker(path: &str) -> bool {
    path.ends_with('/') || path.ends_with('\\')
}

/// Returns true for the two synthetic entries the workflow writes itself.
pub fn is_log_path(path: &str) -> bool {
    path == TEST_RESULTS_FILE || path == ERROR_LOG_FILE
}

/// A mapping of relative path to full text content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct FileSet {
    entries: BTreeMap<String, String>,
}

impl FileSet {
    /// Creates an empty file set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a file set from `(path, content)` pairs, validating every path.
    pub fn from_pairs<I, P, C>(pairs: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<String>,
    {
        let mut files = Self::new();
        for (path, content) in pairs {
            files.insert(path.as_ref(), content)?;
        }
        Ok(files)
    }

    /// Inserts a file, replacing any previous content under the same path.
    pub fn insert(
        &mut self,
        path: &str,
        content: impl Into<String>,
    ) -> Result<Option<String>, PathError> {
        let key = validate_relative_path(path)?;
        Ok(self.entries.insert(key, content.into()))
    }

    /// Returns the content stored under `path`.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    /// Returns true if `path` is present.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterates paths in order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Key-wise overwrite: every key of `delta` replaces the same key here.
    pub fn merge(&mut self, delta: &FileSet) {
        for (path, content) in &delta.entries {
            self.entries.insert(path.clone(), content.clone());
        }
    }

    /// Returns a copy of this set with `delta` merged on top.
    pub fn merged(&self, delta: &FileSet) -> FileSet {
        let mut out = self.clone();
        out.merge(delta);
        out
    }

    /// Keeps only the entries whose path satisfies `keep`.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.entries.retain(|path, _| keep(path));
    }

    /// Returns every entry that is not a synthetic log.
    pub fn non_log_files(&self) -> FileSet {
        FileSet {
            entries: self
                .entries
                .iter()
                .filter(|(path, _)| !is_log_path(path))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// SHA-256 fingerprint over the sorted entries, hex encoded.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, content) in &self.entries {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(content.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Renders every entry as a labelled section for inclusion in a prompt.
    pub fn render_for_prompt(&self) -> String {
        self.entries
            .iter()
            .map(|(path, content)| format!("--- FILE: {} ---\n{}\n", path, content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl TryFrom<BTreeMap<String, String>> for FileSet {
    type Error = PathError;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        FileSet::from_pairs(map)
    }
}

impl From<FileSet> for BTreeMap<String, String> {
    fn from(files: FileSet) -> Self {
        files.entries
    }
}

impl<'a> IntoIterator for &'a FileSet {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
