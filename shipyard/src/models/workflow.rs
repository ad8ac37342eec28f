//! Retry workflow models
//!
//! A retry workflow spans several deployment attempts for one project and is
//! owned by the retry coordinator. Everything else sees read-only copies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Retry workflow phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    /// Waiting out the backoff before the next execution
    Waiting,

    /// A re-execution is running
    Executing,

    /// The last execution succeeded
    Succeeded,

    /// The execution budget is spent
    Exhausted,

    /// Stopped on a failure that retrying cannot fix
    Abandoned,
}

impl WorkflowPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowPhase::Succeeded | WorkflowPhase::Exhausted | WorkflowPhase::Abandoned
        )
    }
}

/// Bounded-attempt retry workflow state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryWorkflow {
    pub id: String,
    pub project_id: String,
    pub phase: WorkflowPhase,

    /// Executions started by this workflow; never exceeds `max_executions`
    pub execution_count: u32,
    pub max_executions: u32,

    /// Consecutive failures since the last success
    pub sequential_failures: u32,

    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetryWorkflow {
    /// Start a workflow after the failure that triggered it
    pub fn new(project_id: impl Into<String>, max_executions: u32, trigger: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            phase: if max_executions == 0 {
                WorkflowPhase::Exhausted
            } else {
                WorkflowPhase::Waiting
            },
            execution_count: 0,
            max_executions,
            sequential_failures: 1,
            last_error: Some(trigger.to_string()),
            started_at: now,
            updated_at: now,
        }
    }

    /// True while the workflow may still re-invoke the pipeline
    pub fn is_active(&self) -> bool {
        !self.phase.is_terminal()
    }

    pub fn remaining_executions(&self) -> u32 {
        self.max_executions.saturating_sub(self.execution_count)
    }

    /// Claim the next execution slot.
    ///
    /// Fails without changing the count once the budget is spent.
    pub fn begin_execution(&mut self) -> Result<u32, DeployError> {
        if self.phase.is_terminal() && self.phase != WorkflowPhase::Exhausted {
            return Err(DeployError::InvalidTransition(format!(
                "workflow {} is {:?}",
                self.id, self.phase
            )));
        }
        if self.execution_count >= self.max_executions {
            self.phase = WorkflowPhase::Exhausted;
            self.updated_at = Utc::now();
            return Err(DeployError::RetryBudgetExhausted {
                workflow_id: self.id.clone(),
                max: self.max_executions,
            });
        }

        self.execution_count += 1;
        self.phase = WorkflowPhase::Executing;
        self.updated_at = Utc::now();
        Ok(self.execution_count)
    }

    /// Record a failed execution; moves to `Exhausted` when no budget is left
    pub fn record_failure(&mut self, error: &str) {
        self.sequential_failures += 1;
        self.last_error = Some(error.to_string());
        self.phase = if self.execution_count >= self.max_executions {
            WorkflowPhase::Exhausted
        } else {
            WorkflowPhase::Waiting
        };
        self.updated_at = Utc::now();
    }

    pub fn record_success(&mut self) {
        self.sequential_failures = 0;
        self.last_error = None;
        self.phase = WorkflowPhase::Succeeded;
        self.updated_at = Utc::now();
    }

    pub fn abandon(&mut self, error: &str) {
        self.last_error = Some(error.to_string());
        self.phase = WorkflowPhase::Abandoned;
        self.updated_at = Utc::now();
    }
}
