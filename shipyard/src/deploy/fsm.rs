//! Finite State Machine for a deployment attempt
//!
//! ```text
//! idle -> analyzing -> compiling-backend -> deploying-backend
//!                   \                     \
//!                    -> bundling-frontend -> deploying-frontend -> completed
//! ```
//!
//! `failed` is reachable from every active stage. `completed` and `failed`
//! return to `idle` on reset. Each stage owns a fixed slice of the 0-100
//! progress range and progress never decreases within one attempt.

use serde::{Deserialize, Serialize};

/// Attempt stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStage {
    Idle,
    Analyzing,
    CompilingBackend,
    DeployingBackend,
    BundlingFrontend,
    DeployingFrontend,
    Completed,
    Failed,
}

impl DeploymentStage {
    /// Progress sub-range owned by the stage
    pub fn progress_range(&self) -> (u8, u8) {
        match self {
            DeploymentStage::Idle => (0, 0),
            DeploymentStage::Analyzing => (0, 10),
            DeploymentStage::CompilingBackend => (10, 30),
            DeploymentStage::DeployingBackend => (30, 50),
            DeploymentStage::BundlingFrontend => (50, 70),
            DeploymentStage::DeployingFrontend => (70, 95),
            DeploymentStage::Completed => (100, 100),
            DeploymentStage::Failed => (0, 100),
        }
    }

    /// True for stages between start and a terminal outcome
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            DeploymentStage::Idle | DeploymentStage::Completed | DeploymentStage::Failed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStage::Completed | DeploymentStage::Failed)
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Begin analyzing what to deploy
    Start,

    /// Compile the backend
    CompileBackend,

    /// Install the compiled backend
    InstallBackend,

    /// Bundle the frontend
    BundleFrontend,

    /// Install the bundled assets
    DeployFrontend,

    /// Everything selected has been deployed
    Complete,

    /// The attempt failed
    Fail(String),

    /// Back to idle
    Reset,
}

/// Attempt FSM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentFsm {
    stage: DeploymentStage,
    progress: u8,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self {
            stage: DeploymentStage::Idle,
            progress: 0,
            error: None,
        }
    }

    /// Get current stage
    pub fn stage(&self) -> DeploymentStage {
        self.stage
    }

    /// Get overall progress (0-100)
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeploymentStage, String> {
        use DeploymentStage as S;

        let new_stage = match (self.stage, &event) {
            (S::Idle, DeploymentEvent::Start) => {
                self.error = None;
                self.progress = 0;
                S::Analyzing
            }

            (S::Analyzing, DeploymentEvent::CompileBackend) => S::CompilingBackend,
            (S::Analyzing, DeploymentEvent::BundleFrontend) => S::BundlingFrontend,
            (S::Analyzing, DeploymentEvent::Complete) => S::Completed,

            (S::CompilingBackend, DeploymentEvent::InstallBackend) => S::DeployingBackend,

            (S::DeployingBackend, DeploymentEvent::BundleFrontend) => S::BundlingFrontend,
            (S::DeployingBackend, DeploymentEvent::Complete) => S::Completed,

            (S::BundlingFrontend, DeploymentEvent::DeployFrontend) => S::DeployingFrontend,

            (S::DeployingFrontend, DeploymentEvent::Complete) => S::Completed,

            (stage, DeploymentEvent::Fail(err)) if stage.is_active() => {
                self.error = Some(err.clone());
                S::Failed
            }

            (S::Completed | S::Failed, DeploymentEvent::Reset) => {
                self.progress = 0;
                S::Idle
            }

            // Invalid transitions
            (stage, event) => {
                return Err(format!("{:?} -> {:?}", stage, event));
            }
        };

        self.stage = new_stage;
        if new_stage != S::Failed {
            self.progress = self.progress.max(new_stage.progress_range().0);
        }
        Ok(new_stage)
    }

    /// Report progress within the current stage.
    ///
    /// `fraction` is clamped to 0..=1 and mapped into the stage's range. The
    /// overall value never moves backwards.
    pub fn report(&mut self, fraction: f64) -> u8 {
        if !self.stage.is_active() {
            return self.progress;
        }

        let (start, end) = self.stage.progress_range();
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let value = start as f64 + fraction * (end - start) as f64;
        self.progress = self.progress.max(value.floor() as u8);
        self.progress
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
