//! Deployment attempts
//!
//! The board keeps the latest attempt of every project and broadcasts every
//! stage change, progress update and log line. The running pipeline writes
//! through an [`AttemptHandle`]; everyone else reads cloned views.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentStage};
use crate::errors::DeployError;
use crate::models::deployment::{DeployPlan, ServerPair};
use crate::retry::classifier::{ErrorCategory, ErrorClassification};
use crate::utils::generate_uuid;

/// Attempt log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptLogLevel {
    Info,
    Warn,
    Error,
}

/// One line of the attempt log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: AttemptLogLevel,
    pub message: String,
}

/// Classified failure attached to a failed attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSummary {
    /// Error kind, see [`DeployError::kind`]
    pub kind: String,
    pub category: ErrorCategory,
    pub message: String,
    pub summary: String,
    pub retryable: bool,

    /// Withheld while a retry workflow owns the project
    pub suggested_fix: Option<String>,

    #[serde(default, skip_serializing)]
    withheld_fix: Option<String>,
}

impl FailureSummary {
    pub fn new(error: &DeployError, classification: ErrorClassification, show_fix: bool) -> Self {
        let (suggested_fix, withheld_fix) = if show_fix {
            (classification.suggested_fix, None)
        } else {
            (None, classification.suggested_fix)
        };
        Self {
            kind: error.kind().to_string(),
            category: classification.category,
            message: error.to_string(),
            summary: classification.summary,
            retryable: classification.retryable,
            suggested_fix,
            withheld_fix,
        }
    }

    /// Surface a fix withheld at failure time. Returns true if one was attached.
    pub fn reveal_fix(&mut self) -> bool {
        match self.withheld_fix.take() {
            Some(fix) => {
                self.suggested_fix = Some(fix);
                true
            }
            None => false,
        }
    }
}

/// Observable state of one deployment attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentAttempt {
    pub id: String,
    pub project_id: String,
    pub servers: ServerPair,
    pub plan: Option<DeployPlan>,
    #[serde(flatten)]
    pub fsm: DeploymentFsm,
    pub logs: Vec<LogEntry>,
    pub failure: Option<FailureSummary>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DeploymentAttempt {
    pub fn new(project_id: impl Into<String>, servers: ServerPair) -> Self {
        Self {
            id: generate_uuid(),
            project_id: project_id.into(),
            servers,
            plan: None,
            fsm: DeploymentFsm::new(),
            logs: Vec::new(),
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn stage(&self) -> DeploymentStage {
        self.fsm.stage()
    }

    pub fn progress(&self) -> u8 {
        self.fsm.progress()
    }
}

/// Broadcast payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeployEventKind {
    Stage { stage: DeploymentStage, progress: u8 },
    Progress { progress: u8 },
    Log(LogEntry),
}

/// Event published for every attempt update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployEvent {
    pub project_id: String,
    pub attempt_id: String,
    #[serde(flatten)]
    pub kind: DeployEventKind,
}

/// Latest attempt per project
#[derive(Debug, Clone)]
pub struct AttemptBoard {
    attempts: Arc<RwLock<HashMap<String, DeploymentAttempt>>>,
    events: broadcast::Sender<DeployEvent>,
    max_retained: usize,
}

impl AttemptBoard {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            attempts: Arc::new(RwLock::new(HashMap::new())),
            events,
            max_retained: usize::MAX,
        }
    }

    /// Cap the number of attempts kept. Running attempts are never dropped.
    pub fn with_retention(mut self, max_retained: usize) -> Self {
        self.max_retained = max_retained.max(1);
        self
    }

    pub fn len(&self) -> usize {
        let attempts = self.attempts.read().unwrap_or_else(|e| e.into_inner());
        attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeployEvent> {
        self.events.subscribe()
    }

    /// Latest attempt of `project_id`
    pub fn get(&self, project_id: &str) -> Option<DeploymentAttempt> {
        let attempts = self.attempts.read().unwrap_or_else(|e| e.into_inner());
        attempts.get(project_id).cloned()
    }

    /// Replace the project's attempt with a fresh one and start it
    pub fn begin(&self, project_id: &str, servers: ServerPair) -> Result<AttemptHandle, DeployError> {
        let mut attempt = DeploymentAttempt::new(project_id, servers);
        let stage = attempt
            .fsm
            .process(DeploymentEvent::Start)
            .map_err(DeployError::InvalidTransition)?;

        let handle = AttemptHandle {
            board: self.clone(),
            project_id: project_id.to_string(),
            attempt_id: attempt.id.clone(),
        };

        {
            let mut attempts = self.attempts.write().unwrap_or_else(|e| e.into_inner());
            attempts.insert(project_id.to_string(), attempt);
            Self::prune(&mut attempts, self.max_retained);
        }

        handle.publish(DeployEventKind::Stage { stage, progress: 0 });
        Ok(handle)
    }

    /// Drop the oldest finished attempts beyond `max_retained`
    fn prune(attempts: &mut HashMap<String, DeploymentAttempt>, max_retained: usize) {
        if attempts.len() <= max_retained {
            return;
        }

        let mut finished: Vec<(DateTime<Utc>, String)> = attempts
            .iter()
            .filter(|(_, attempt)| {
                let stage = attempt.stage();
                stage == DeploymentStage::Idle || stage.is_terminal()
            })
            .map(|(project_id, attempt)| {
                (attempt.finished_at.unwrap_or(attempt.started_at), project_id.clone())
            })
            .collect();
        finished.sort();

        let excess = attempts.len() - max_retained;
        for (_, project_id) in finished.into_iter().take(excess) {
            debug!("Dropping retained attempt of {}", project_id);
            attempts.remove(&project_id);
        }
    }

    /// Attach the fix withheld from the project's latest failure
    pub fn reveal_fix(&self, project_id: &str) -> bool {
        let mut attempts = self.attempts.write().unwrap_or_else(|e| e.into_inner());
        attempts
            .get_mut(project_id)
            .and_then(|attempt| attempt.failure.as_mut())
            .is_some_and(FailureSummary::reveal_fix)
    }

    /// Wipe the project's attempt back to an idle record with no history
    pub fn reset(&self, project_id: &str) {
        let mut attempts = self.attempts.write().unwrap_or_else(|e| e.into_inner());
        if let Some(attempt) = attempts.get_mut(project_id) {
            debug!("Resetting attempt {} of {}", attempt.id, project_id);
            attempt.fsm = DeploymentFsm::new();
            attempt.plan = None;
            attempt.logs.clear();
            attempt.failure = None;
            attempt.finished_at = None;
        }
    }

    /// Return a finished attempt to idle, keeping its log and failure.
    ///
    /// Does nothing if `attempt_id` has been superseded or is still running.
    pub fn cool_down(&self, project_id: &str, attempt_id: &str) -> bool {
        let mut attempts = self.attempts.write().unwrap_or_else(|e| e.into_inner());
        match attempts.get_mut(project_id) {
            Some(attempt) if attempt.id == attempt_id && attempt.stage().is_terminal() => {
                attempt.fsm.process(DeploymentEvent::Reset).is_ok()
            }
            _ => false,
        }
    }

    fn update<R>(&self, project_id: &str, attempt_id: &str, f: impl FnOnce(&mut DeploymentAttempt) -> R) -> Option<R> {
        let mut attempts = self.attempts.write().unwrap_or_else(|e| e.into_inner());
        attempts
            .get_mut(project_id)
            .filter(|attempt| attempt.id == attempt_id)
            .map(f)
    }
}

impl Default for AttemptBoard {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Write access to one running attempt
#[derive(Debug, Clone)]
pub struct AttemptHandle {
    board: AttemptBoard,
    project_id: String,
    attempt_id: String,
}

impl AttemptHandle {
    pub fn id(&self) -> &str {
        &self.attempt_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn publish(&self, kind: DeployEventKind) {
        // No subscribers is fine.
        let _ = self.board.events.send(DeployEvent {
            project_id: self.project_id.clone(),
            attempt_id: self.attempt_id.clone(),
            kind,
        });
    }

    /// Apply a stage event
    pub fn transition(&self, event: DeploymentEvent) -> Result<DeploymentStage, DeployError> {
        let result = self
            .board
            .update(&self.project_id, &self.attempt_id, |attempt| {
                let stage = attempt.fsm.process(event)?;
                if stage.is_terminal() {
                    attempt.finished_at = Some(Utc::now());
                }
                Ok((stage, attempt.fsm.progress()))
            })
            .unwrap_or_else(|| {
                Err(format!(
                    "attempt {} of {} is no longer current",
                    self.attempt_id, self.project_id
                ))
            });

        let (stage, progress) = result.map_err(DeployError::InvalidTransition)?;
        info!("Project {} entered {:?} ({}%)", self.project_id, stage, progress);
        self.publish(DeployEventKind::Stage { stage, progress });
        Ok(stage)
    }

    /// Report progress within the current stage (0.0 ..= 1.0)
    pub fn progress(&self, fraction: f64) {
        let change = self
            .board
            .update(&self.project_id, &self.attempt_id, |attempt| {
                let before = attempt.fsm.progress();
                let after = attempt.fsm.report(fraction);
                (before, after)
            });

        if let Some((before, after)) = change {
            if after > before {
                self.publish(DeployEventKind::Progress { progress: after });
            }
        }
    }

    /// Append to the attempt log and mirror it to tracing
    pub fn log(&self, level: AttemptLogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            AttemptLogLevel::Info => info!("[{}] {}", self.project_id, message),
            AttemptLogLevel::Warn => warn!("[{}] {}", self.project_id, message),
            AttemptLogLevel::Error => error!("[{}] {}", self.project_id, message),
        }

        let entry = LogEntry {
            at: Utc::now(),
            level,
            message,
        };
        let stored = self
            .board
            .update(&self.project_id, &self.attempt_id, |attempt| {
                attempt.logs.push(entry.clone());
            });
        if stored.is_some() {
            self.publish(DeployEventKind::Log(entry));
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(AttemptLogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(AttemptLogLevel::Warn, message);
    }

    pub fn set_plan(&self, plan: DeployPlan) {
        self.board
            .update(&self.project_id, &self.attempt_id, |attempt| attempt.plan = Some(plan));
    }

    /// Move to `failed` and attach the classified failure
    pub fn fail(&self, failure: FailureSummary) -> Result<DeploymentStage, DeployError> {
        let message = failure.message.clone();
        self.log(AttemptLogLevel::Error, failure.summary.clone());
        self.board
            .update(&self.project_id, &self.attempt_id, |attempt| {
                attempt.failure = Some(failure);
            });
        self.transition(DeploymentEvent::Fail(message))
    }

    /// Current view of the attempt
    pub fn view(&self) -> Option<DeploymentAttempt> {
        self.board
            .get(&self.project_id)
            .filter(|attempt| attempt.id == self.attempt_id)
    }
}
