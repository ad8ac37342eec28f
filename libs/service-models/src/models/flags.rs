//! Change-flag persistence models

use serde::{Deserialize, Serialize};

/// Persisted "component changed" flags for a project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeFlagsResponse {
    pub backend_changed: bool,
    pub frontend_changed: bool,
}

/// Clear request; only flags set to `true` are cleared
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearChangeFlagsRequest {
    pub clear_backend: bool,
    pub clear_frontend: bool,
}
