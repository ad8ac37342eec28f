//! Deployment request models

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::snapshot::DeploymentSnapshot;

/// Stable host identifiers an attempt is bound to for its lifetime
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerPair {
    /// Backend execution target
    pub backend: String,

    /// Frontend asset target
    pub frontend: String,
}

impl ServerPair {
    pub fn new(backend: impl Into<String>, frontend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            frontend: frontend.into(),
        }
    }

    /// Public URL of the frontend, rendered from a `{target}` template
    pub fn frontend_url(&self, template: &str) -> String {
        template.replace("{target}", &self.frontend)
    }
}

/// Which half of the application a module install targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Backend,
    Frontend,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Backend => "backend",
            ModuleKind::Frontend => "frontend",
        }
    }
}

/// Stages selected for one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployPlan {
    /// Nothing changed; no stage runs
    Skip,
    BackendOnly,
    FrontendOnly,
    Full,
}

impl DeployPlan {
    pub fn runs_backend(&self) -> bool {
        matches!(self, DeployPlan::BackendOnly | DeployPlan::Full)
    }

    pub fn runs_frontend(&self) -> bool {
        matches!(self, DeployPlan::FrontendOnly | DeployPlan::Full)
    }
}

/// A request to deploy one project snapshot
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub project_id: String,

    /// Captured once per attempt and shared read-only
    pub snapshot: Arc<DeploymentSnapshot>,

    pub servers: ServerPair,

    /// Ignore change flags and run both stages
    pub force: bool,
}

impl DeploymentRequest {
    pub fn new(project_id: impl Into<String>, snapshot: DeploymentSnapshot, servers: ServerPair) -> Self {
        Self {
            project_id: project_id.into(),
            snapshot: Arc::new(snapshot),
            servers,
            force: false,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}
