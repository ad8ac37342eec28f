//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use service_models::{ErrorResponse, SourceFile};
use tracing::{error, info};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::models::deployment::{DeploymentRequest, ServerPair};
use crate::models::snapshot::{DeploymentSnapshot, FileContent};
use crate::server::state::ServerState;
use crate::utils::version_info;

type ErrorReply = (StatusCode, Json<ErrorResponse>);

fn reply(status: StatusCode, error: &str, message: impl Into<String>) -> ErrorReply {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: Some(message.into()),
        }),
    )
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "shipyard".to_string(),
        version: version.version,
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Deployment request body.
///
/// Sources come either inline in `files` or from `source_dir` on the daemon's
/// filesystem.
#[derive(Debug, Deserialize)]
pub struct StartDeploymentBody {
    pub backend_target: String,
    pub frontend_target: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default = "default_retry")]
    pub retry: bool,
    #[serde(default)]
    pub files: Vec<SourceFile>,
    #[serde(default)]
    pub source_dir: Option<String>,
}

fn default_retry() -> bool {
    true
}

/// Accepted deployment
#[derive(Debug, Serialize)]
pub struct StartDeploymentResponse {
    pub project_id: String,
    pub accepted: bool,
    pub retry: bool,
}

async fn load_snapshot(body: &StartDeploymentBody) -> Result<DeploymentSnapshot, DeployError> {
    if let Some(dir) = &body.source_dir {
        return DeploymentSnapshot::from_dir(&Dir::new(dir)).await;
    }

    let mut files = Vec::with_capacity(body.files.len());
    for file in &body.files {
        let content = match file.encoding.as_deref() {
            Some("base64") => FileContent::from_bytes(BASE64.decode(&file.content).map_err(|e| {
                DeployError::ProtocolError(format!("{} is not valid base64: {}", file.name, e))
            })?),
            _ => FileContent::Text(file.content.clone()),
        };
        files.push((file.name.clone(), content));
    }
    Ok(DeploymentSnapshot::new(files))
}

/// Start a deployment in the background.
///
/// The project's execution slot is claimed before replying, so a conflicting
/// request gets 409 rather than a background rejection.
pub async fn start_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Json(body): Json<StartDeploymentBody>,
) -> Result<(StatusCode, Json<StartDeploymentResponse>), ErrorReply> {
    let guard = state.orchestrator.try_reserve(&project_id).map_err(|_| {
        reply(
            StatusCode::CONFLICT,
            "already_running",
            format!("a deployment of {} is already in flight", project_id),
        )
    })?;

    let snapshot = load_snapshot(&body)
        .await
        .map_err(|e| reply(StatusCode::BAD_REQUEST, e.kind(), e.to_string()))?;
    if snapshot.is_empty() {
        return Err(reply(StatusCode::BAD_REQUEST, "empty_snapshot", "no source files"));
    }

    let mut request = DeploymentRequest::new(
        project_id.clone(),
        snapshot,
        ServerPair::new(body.backend_target, body.frontend_target),
    );
    request.force = body.force;

    let retry = body.retry;
    let task_state = state.clone();
    tokio::spawn(async move {
        let project_id = request.project_id.clone();
        let result = if retry {
            task_state
                .coordinator
                .run_reserved(&task_state.orchestrator, &task_state.services, request, guard)
                .await
        } else {
            task_state
                .orchestrator
                .execute_reserved(&task_state.services, request, &guard)
                .await
        };
        match result {
            Ok(outcome) => info!(
                "Deployment of {} finished (plan {:?}, skipped {})",
                project_id, outcome.plan, outcome.skipped
            ),
            Err(e) => error!("Deployment of {} failed: {}", project_id, e),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(StartDeploymentResponse {
            project_id,
            accepted: true,
            retry,
        }),
    ))
}

/// Latest attempt of a project
pub async fn attempt_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> Result<impl IntoResponse, ErrorReply> {
    state
        .orchestrator
        .attempt(&project_id)
        .map(Json)
        .ok_or_else(|| reply(StatusCode::NOT_FOUND, "not_found", "no attempt recorded"))
}

/// Retry workflow of a project
pub async fn workflow_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> Result<impl IntoResponse, ErrorReply> {
    state
        .coordinator
        .workflow(&project_id)
        .map(Json)
        .ok_or_else(|| reply(StatusCode::NOT_FOUND, "not_found", "no retry workflow"))
}
