//! Deployment snapshot
//!
//! An immutable capture of the project's files taken once at the start of an
//! attempt. The attempt that created it is its only owner.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::utils::hex_encode;

/// Directories never captured from disk
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "dist", "target", ".shipyard"];

/// File content, kept as text when it is valid UTF-8
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

impl FileContent {
    /// Classify raw bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => FileContent::Text(text),
            Err(e) => FileContent::Binary(e.into_bytes()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileContent::Text(text) => text.as_bytes(),
            FileContent::Binary(bytes) => bytes,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FileContent::Text(text) => Some(text),
            FileContent::Binary(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for FileContent {
    fn from(text: &str) -> Self {
        FileContent::Text(text.to_string())
    }
}

impl From<String> for FileContent {
    fn from(text: String) -> Self {
        FileContent::Text(text)
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(bytes: Vec<u8>) -> Self {
        FileContent::Binary(bytes)
    }
}

/// Immutable path -> content mapping for one attempt
#[derive(Debug, Clone)]
pub struct DeploymentSnapshot {
    files: BTreeMap<String, FileContent>,
    captured_at: DateTime<Utc>,
}

impl DeploymentSnapshot {
    /// Capture a snapshot from in-memory files.
    ///
    /// Paths are normalized to forward slashes without a leading `./` or `/`.
    pub fn new<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<FileContent>,
    {
        let files = files
            .into_iter()
            .map(|(path, content)| (normalize_path(path.as_ref()), content.into()))
            .collect();

        Self {
            files,
            captured_at: Utc::now(),
        }
    }

    /// Capture a snapshot of every file below `dir`
    pub async fn from_dir(dir: &Dir) -> Result<Self, DeployError> {
        let paths = dir.walk_files(SKIPPED_DIRS).await?;
        let mut files = Vec::with_capacity(paths.len());

        for relative in paths {
            let bytes = dir.file_at(&relative).read_bytes().await?;
            let path = relative.to_string_lossy().replace('\\', "/");
            files.push((path, FileContent::from_bytes(bytes)));
        }

        Ok(Self::new(files))
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn get(&self, path: &str) -> Option<&FileContent> {
        self.files.get(&normalize_path(path))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// All files, ordered by path
    pub fn files(&self) -> impl Iterator<Item = (&str, &FileContent)> {
        self.files.iter().map(|(path, content)| (path.as_str(), content))
    }

    /// Files below `dir`, with paths relative to it
    pub fn files_under<'a>(&'a self, dir: &str) -> impl Iterator<Item = (&'a str, &'a FileContent)> + 'a {
        let prefix = format!("{}/", normalize_path(dir).trim_end_matches('/'));
        self.files.iter().filter_map(move |(path, content)| {
            path.strip_prefix(prefix.as_str())
                .map(|relative| (relative, content))
        })
    }

    /// SHA-256 digest over the paths and contents below `dir`
    pub fn digest_under(&self, dir: &str) -> String {
        let mut hasher = Sha256::new();
        for (path, content) in self.files_under(dir) {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(content.as_bytes());
            hasher.update([0u8]);
        }
        hex_encode(hasher.finalize())
    }
}

/// Normalize a snapshot path
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut trimmed = path.as_str();
    loop {
        if let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest;
        } else if let Some(rest) = trimmed.strip_prefix('/') {
            trimmed = rest;
        } else {
            break;
        }
    }
    trimmed.to_string()
}
