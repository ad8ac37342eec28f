//! Workflow state cache
//!
//! Read-only mirror of the retry workflows published by the coordinator,
//! keyed by project.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::workflow::RetryWorkflow;
use crate::retry::coordinator::WorkflowObserver;

/// In-memory workflow mirror
#[derive(Debug, Default)]
pub struct WorkflowStateCache {
    entries: RwLock<HashMap<String, RetryWorkflow>>,
}

impl WorkflowStateCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest published workflow for a project
    pub fn get(&self, project_id: &str) -> Option<RetryWorkflow> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(project_id).cloned()
    }

    /// True while a retry workflow owns the project
    pub fn is_active(&self, project_id: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(project_id)
            .is_some_and(RetryWorkflow::is_active)
    }

    /// Remove a project's entry
    pub fn remove(&self, project_id: &str) -> Option<RetryWorkflow> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(project_id)
    }

    /// Get cache size
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WorkflowObserver for WorkflowStateCache {
    fn on_workflow_state_changed(&self, workflow: &RetryWorkflow) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(workflow.project_id.clone(), workflow.clone());
    }
}
