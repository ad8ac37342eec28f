//! Compiled backend artifact

use serde::{Deserialize, Serialize};

/// Interface descriptors emitted next to the compiled module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSet {
    /// Interface definition text
    pub candid: String,

    /// TypeScript declarations
    #[serde(default)]
    pub typescript: Option<String>,

    /// JavaScript IDL factory
    #[serde(default)]
    pub did_js: Option<String>,

    /// Optional JSON schema
    #[serde(default)]
    pub json_schema: Option<String>,
}

impl InterfaceSet {
    /// Files to inject into a frontend source set, keyed by relative path
    pub fn declaration_files(&self, dir: &str) -> Vec<(String, String)> {
        let dir = dir.trim_end_matches('/');
        let mut files = vec![(format!("{}/backend.did", dir), self.candid.clone())];
        if let Some(ts) = &self.typescript {
            files.push((format!("{}/backend.did.d.ts", dir), ts.clone()));
        }
        if let Some(js) = &self.did_js {
            files.push((format!("{}/backend.did.js", dir), js.clone()));
        }
        if let Some(schema) = &self.json_schema {
            files.push((format!("{}/backend.schema.json", dir), schema.clone()));
        }
        files
    }
}

/// Compiled binary plus its interface descriptors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledArtifact {
    /// Binary module bytes
    pub wasm: Vec<u8>,

    /// Interface descriptors
    pub interfaces: InterfaceSet,

    /// Digest of the backend source set this artifact was built from
    pub source_digest: String,
}

impl CompiledArtifact {
    pub fn size(&self) -> usize {
        self.wasm.len()
    }
}
