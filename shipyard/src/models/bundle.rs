//! Bundled frontend output

use std::collections::BTreeMap;

/// One packaged output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    /// Absolute asset path, always with a leading `/`
    pub path: String,

    pub content: Vec<u8>,

    /// Kind declared by the bundler (a MIME type or a short tag such as `js`)
    pub kind: String,
}

impl AssetEntry {
    pub fn new(path: &str, content: Vec<u8>, kind: impl Into<String>) -> Self {
        Self {
            path: asset_path(path),
            content,
            kind: kind.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// File name component of the path
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Packaged frontend output, keyed by asset path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetBundle {
    entries: BTreeMap<String, AssetEntry>,
}

impl AssetBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, entry: AssetEntry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    pub fn get(&self, path: &str) -> Option<&AssetEntry> {
        self.entries.get(&asset_path(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(&asset_path(path))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.entries.values().map(AssetEntry::size).sum()
    }

    pub fn entries(&self) -> impl Iterator<Item = &AssetEntry> {
        self.entries.values()
    }

    pub fn into_entries(self) -> impl Iterator<Item = AssetEntry> {
        self.entries.into_values()
    }
}

impl FromIterator<AssetEntry> for AssetBundle {
    fn from_iter<I: IntoIterator<Item = AssetEntry>>(iter: I) -> Self {
        let mut bundle = AssetBundle::new();
        for entry in iter {
            bundle.insert(entry);
        }
        bundle
    }
}

/// Normalize an output path to an absolute asset path
pub fn asset_path(path: &str) -> String {
    let trimmed = path.trim_start_matches("./").trim_start_matches('/');
    format!("/{}", trimmed)
}
