//! Execution-host RPC models

use serde::{Deserialize, Serialize};

/// Tagged RPC result: `{"ok": ...}` or `{"err": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcResult<T> {
    Ok(T),
    Err(String),
}

impl<T> RpcResult<T> {
    pub fn into_result(self) -> Result<T, String> {
        match self {
            RpcResult::Ok(value) => Ok(value),
            RpcResult::Err(message) => Err(message),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionRequest {
    pub total_chunks: u32,
    pub total_bytes: u64,
    pub target: String,
    pub kind: String,
    pub env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkRequest {
    pub session_id: String,
    pub index: u32,
    /// Base64-encoded chunk bytes
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkAck {
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeAck {
    pub session_id: String,
    pub total_bytes: u64,
}

/// Metadata recorded alongside an installed module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candid: Option<String>,
    pub source_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallFromSessionRequest {
    pub session_id: String,
    pub target: String,
    pub kind: String,
    pub env: String,
    pub metadata: InstallMetadata,
    pub reinstall: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallDirectRequest {
    pub target: String,
    /// Base64-encoded module bytes
    pub wasm: String,
    pub kind: String,
    pub metadata: InstallMetadata,
    pub reinstall: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallResult {
    pub target: String,
    #[serde(default)]
    pub module_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreAssetRequest {
    pub target: String,
    pub path: String,
    pub content_type: String,
    /// Base64-encoded asset bytes
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreAssetAck {
    pub path: String,
}
