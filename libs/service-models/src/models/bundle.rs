//! Bundle endpoint models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::SourceFile;

/// Bundle job submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleRequest {
    pub files: Vec<SourceFile>,
    pub package_json: serde_json::Value,
    pub project_type: String,
}

/// Bundle job creation response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleJobResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub status_url: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub estimated_time: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Bundle job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleJobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

/// Polled status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleStatusResponse {
    pub status: BundleJobStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One packaged output file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleOutputFile {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub data: Vec<u8>,
}

/// Download response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleDownloadResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub output: BTreeMap<String, BundleOutputFile>,
    #[serde(default)]
    pub error: Option<String>,
}
