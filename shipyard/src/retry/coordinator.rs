//! Auto-retry coordinator
//!
//! Re-invokes the deployment pipeline after retryable failures, up to a fixed
//! execution budget per workflow, with exponential backoff between
//! executions. Workflow state is owned here and published to observers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tracing::{debug, error, info, warn};

use crate::deploy::guard::InFlightGuard;
use crate::deploy::orchestrator::{DeploymentOrchestrator, DeploymentOutcome};
use crate::errors::DeployError;
use crate::models::deployment::DeploymentRequest;
use crate::models::workflow::RetryWorkflow;
use crate::retry::classifier::classify;
use crate::services::DeployServices;
use crate::storage::settings::RetryConfig;
use crate::utils::BackoffOptions;

/// Receives every retry workflow state change
pub trait WorkflowObserver: Send + Sync {
    fn on_workflow_state_changed(&self, workflow: &RetryWorkflow);
}

type ObserverList = RwLock<Vec<(u64, Arc<dyn WorkflowObserver>)>>;

/// Unregisters its observer when dropped
pub struct ObserverRegistration {
    id: u64,
    observers: Weak<ObserverList>,
}

impl Drop for ObserverRegistration {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            let mut observers = observers.write().unwrap_or_else(|e| e.into_inner());
            observers.retain(|(id, _)| *id != self.id);
            debug!("Workflow observer {} unregistered", self.id);
        }
    }
}

/// Retry budget and backoff
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Re-executions allowed per workflow, not counting the first attempt
    pub max_executions: u32,
    pub backoff: BackoffOptions,
}

impl From<&RetryConfig> for RetrySettings {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_executions: config.max_executions,
            backoff: BackoffOptions {
                base_delay: std::time::Duration::from_millis(config.base_delay_ms),
                max_delay: std::time::Duration::from_millis(config.max_delay_ms),
                multiplier: config.multiplier,
            },
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Owns retry workflows, one per project
pub struct RetryCoordinator {
    settings: RetrySettings,
    workflows: RwLock<HashMap<String, RetryWorkflow>>,
    observers: Arc<ObserverList>,
    next_observer_id: AtomicU64,
}

impl RetryCoordinator {
    pub fn new(settings: RetrySettings) -> Self {
        Self {
            settings,
            workflows: RwLock::new(HashMap::new()),
            observers: Arc::new(RwLock::new(Vec::new())),
            next_observer_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to workflow state changes until the registration is dropped
    pub fn register_observer(&self, observer: Arc<dyn WorkflowObserver>) -> ObserverRegistration {
        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut observers = self.observers.write().unwrap_or_else(|e| e.into_inner());
            observers.push((id, observer));
        }
        ObserverRegistration {
            id,
            observers: Arc::downgrade(&self.observers),
        }
    }

    pub fn observer_count(&self) -> usize {
        let observers = self.observers.read().unwrap_or_else(|e| e.into_inner());
        observers.len()
    }

    /// Current workflow of a project
    pub fn workflow(&self, project_id: &str) -> Option<RetryWorkflow> {
        let workflows = self.workflows.read().unwrap_or_else(|e| e.into_inner());
        workflows.get(project_id).cloned()
    }

    fn publish(&self, workflow: &RetryWorkflow) {
        let observers: Vec<Arc<dyn WorkflowObserver>> = {
            let observers = self.observers.read().unwrap_or_else(|e| e.into_inner());
            observers.iter().map(|(_, o)| o.clone()).collect()
        };
        for observer in observers {
            observer.on_workflow_state_changed(workflow);
        }
    }

    /// Apply `f` to the project's workflow and publish the result
    fn update<R>(&self, project_id: &str, f: impl FnOnce(&mut RetryWorkflow) -> R) -> Option<(R, RetryWorkflow)> {
        let updated = {
            let mut workflows = self.workflows.write().unwrap_or_else(|e| e.into_inner());
            workflows.get_mut(project_id).map(|workflow| {
                let result = f(workflow);
                (result, workflow.clone())
            })
        };
        if let Some((_, workflow)) = &updated {
            self.publish(workflow);
        }
        updated
    }

    /// Start a workflow for the failure, or record it on the active one
    fn record_failure(&self, project_id: &str, error: &DeployError) -> RetryWorkflow {
        let message = error.to_string();
        let workflow = {
            let mut workflows = self.workflows.write().unwrap_or_else(|e| e.into_inner());
            match workflows.get_mut(project_id) {
                Some(workflow) if workflow.is_active() => {
                    workflow.record_failure(&message);
                    workflow.clone()
                }
                _ => {
                    let workflow = RetryWorkflow::new(project_id, self.settings.max_executions, &message);
                    info!(
                        "Starting retry workflow {} for {} ({} executions allowed)",
                        workflow.id, project_id, workflow.max_executions
                    );
                    workflows.insert(project_id.to_string(), workflow.clone());
                    workflow
                }
            }
        };
        self.publish(&workflow);
        workflow
    }

    fn finish_success(&self, project_id: &str) {
        self.update(project_id, |workflow| {
            if workflow.is_active() {
                workflow.record_success();
                info!("Retry workflow {} succeeded", workflow.id);
            }
        });
    }

    fn abandon(&self, project_id: &str, error: &DeployError) {
        self.update(project_id, |workflow| {
            if workflow.is_active() {
                workflow.abandon(&error.to_string());
                warn!("Retry workflow {} abandoned: {}", workflow.id, error);
            }
        });
    }

    /// Execute a deployment, re-executing after retryable failures.
    ///
    /// The project's execution slot is claimed up front and held across every
    /// execution and backoff, so nothing else deploys the project while its
    /// workflow is active. The error returned after the budget is spent is the
    /// last pipeline failure, not the budget error.
    pub async fn run(
        &self,
        orchestrator: &DeploymentOrchestrator,
        services: &DeployServices,
        request: DeploymentRequest,
    ) -> Result<DeploymentOutcome, DeployError> {
        let guard = orchestrator.try_reserve(&request.project_id)?;
        self.run_reserved(orchestrator, services, request, guard).await
    }

    /// [`Self::run`] with a slot already claimed through
    /// [`DeploymentOrchestrator::try_reserve`]
    pub async fn run_reserved(
        &self,
        orchestrator: &DeploymentOrchestrator,
        services: &DeployServices,
        request: DeploymentRequest,
        guard: InFlightGuard,
    ) -> Result<DeploymentOutcome, DeployError> {
        let project_id = request.project_id.clone();
        let mut result = orchestrator
            .execute_reserved(services, request.clone(), &guard)
            .await;

        loop {
            let error = match result {
                Ok(outcome) => {
                    self.finish_success(&project_id);
                    return Ok(outcome);
                }
                Err(error) => error,
            };

            if !classify(&error).retryable {
                self.abandon(&project_id, &error);
                return Err(error);
            }

            let workflow = self.record_failure(&project_id, &error);
            if !workflow.is_active() {
                error!(
                    "Retry workflow {} exhausted after {} executions: {}",
                    workflow.id, workflow.execution_count, error
                );
                return Err(error);
            }

            let delay = self.settings.backoff.delay_after(workflow.execution_count);
            info!(
                "Retrying deployment of {} in {:?} ({} of {} executions used)",
                project_id, delay, workflow.execution_count, workflow.max_executions
            );
            tokio::time::sleep(delay).await;

            match self.update(&project_id, RetryWorkflow::begin_execution) {
                Some((Ok(execution), _)) => {
                    debug!("Retry execution {} for {}", execution, project_id);
                }
                Some((Err(budget_error), _)) => {
                    warn!("{}", budget_error);
                    return Err(error);
                }
                None => return Err(error),
            }

            if let Err(reset_error) = orchestrator.reset_attempt(&guard) {
                self.abandon(&project_id, &reset_error);
                return Err(reset_error);
            }
            result = orchestrator
                .execute_reserved(services, request.clone(), &guard)
                .await;
        }
    }
}
