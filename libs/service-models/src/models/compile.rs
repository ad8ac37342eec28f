//! Compile endpoint models

use serde::{Deserialize, Serialize};

use super::SourceFile;

/// Package dependency passed to the compiler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    pub repo: String,
    pub version: String,
    #[serde(default)]
    pub dir: String,
}

/// Compile request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    pub files: Vec<SourceFile>,
    pub packages: Vec<PackageSpec>,
    pub mode: String,
    pub main_file: String,
}

/// Compile response
///
/// A `success: true` body can still carry a non-empty `error`; callers must
/// check both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResponse {
    #[serde(default)]
    pub success: bool,

    /// Base64-encoded binary module
    #[serde(default)]
    pub wasm: Option<String>,

    #[serde(default)]
    pub candid: Option<String>,

    #[serde(default)]
    pub typescript: Option<String>,

    #[serde(default)]
    pub did_js: Option<String>,

    #[serde(default)]
    pub json_schema: Option<String>,

    #[serde(default)]
    pub error: Option<String>,
}
