//! API models

pub mod bundle;
pub mod compile;
pub mod flags;
pub mod host;

use serde::{Deserialize, Serialize};

/// A named source file sent to the compiler or the bundler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub content: String,

    /// Set to `base64` when `content` carries binary data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl SourceFile {
    pub fn text(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            encoding: None,
        }
    }
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub message: Option<String>,
}
