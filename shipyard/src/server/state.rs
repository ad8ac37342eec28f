//! Server state

use std::sync::Arc;

use crate::deploy::orchestrator::DeploymentOrchestrator;
use crate::retry::coordinator::RetryCoordinator;
use crate::services::DeployServices;

/// Server state shared across handlers
pub struct ServerState {
    pub services: DeployServices,
    pub orchestrator: Arc<DeploymentOrchestrator>,
    pub coordinator: Arc<RetryCoordinator>,
}

impl ServerState {
    pub fn new(
        services: DeployServices,
        orchestrator: Arc<DeploymentOrchestrator>,
        coordinator: Arc<RetryCoordinator>,
    ) -> Self {
        Self {
            services,
            orchestrator,
            coordinator,
        }
    }
}
