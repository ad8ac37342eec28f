//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::orchestrator::DeploymentOrchestrator;
use crate::errors::DeployError;
use crate::retry::coordinator::{ObserverRegistration, RetryCoordinator};
use crate::services::DeployServices;

/// Main application state
pub struct AppState {
    /// Collaborators passed to every execution
    pub services: DeployServices,

    /// Pipeline driver
    pub orchestrator: Arc<DeploymentOrchestrator>,

    /// Retry workflows
    pub coordinator: Arc<RetryCoordinator>,

    /// Keeps the orchestrator subscribed to workflow changes
    _workflow_registration: ObserverRegistration,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, DeployError> {
        info!("Initializing application state...");

        options.layout.setup().await?;
        let services = options.build_services()?;

        Ok(Self::with_services(options, services))
    }

    /// Assemble state around existing collaborators
    pub fn with_services(options: &AppOptions, services: DeployServices) -> Self {
        let orchestrator = Arc::new(DeploymentOrchestrator::new(options.orchestrator.clone()));
        let coordinator = Arc::new(RetryCoordinator::new(options.retry.clone()));
        let registration = coordinator.register_observer(orchestrator.workflow_observer());

        Self {
            services,
            orchestrator,
            coordinator,
            _workflow_registration: registration,
        }
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), DeployError> {
        info!("Shutting down application state...");
        Ok(())
    }
}
