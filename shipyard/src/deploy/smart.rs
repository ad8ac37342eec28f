//! Smart deploy decisions
//!
//! Chooses which stages run from the persisted change flags, and clears a
//! component's flag once that component is deployed.

use tracing::{info, warn};

use crate::models::deployment::{DeployPlan, ModuleKind};
use crate::services::{ChangeFlagStore, ChangeFlags};

/// Map change flags to a plan
pub fn decide(flags: ChangeFlags) -> DeployPlan {
    match (flags.backend_changed, flags.frontend_changed) {
        (true, true) => DeployPlan::Full,
        (true, false) => DeployPlan::BackendOnly,
        (false, true) => DeployPlan::FrontendOnly,
        (false, false) => DeployPlan::Skip,
    }
}

/// Decision engine over a change-flag store
pub struct SmartDeploy<'a> {
    store: &'a dyn ChangeFlagStore,
}

impl<'a> SmartDeploy<'a> {
    pub fn new(store: &'a dyn ChangeFlagStore) -> Self {
        Self { store }
    }

    /// Read the flags for `project_id`.
    ///
    /// A forced run or an unreadable flag store counts every component as changed.
    pub async fn flags(&self, project_id: &str, force: bool) -> ChangeFlags {
        if force {
            info!("Forced deployment of {}, ignoring change flags", project_id);
            return ChangeFlags::all();
        }

        match self.store.get_change_flags(project_id).await {
            Ok(flags) => flags,
            Err(e) => {
                warn!(
                    "Could not read change flags for {}, deploying everything: {}",
                    project_id, e
                );
                ChangeFlags::all()
            }
        }
    }

    /// Decide the plan for `project_id`
    pub async fn plan(&self, project_id: &str, force: bool) -> DeployPlan {
        let flags = self.flags(project_id, force).await;
        let plan = decide(flags);
        info!(
            "Deploy plan for {}: {:?} (backend changed: {}, frontend changed: {})",
            project_id, plan, flags.backend_changed, flags.frontend_changed
        );
        plan
    }

    /// Clear the flag of a component that just deployed.
    ///
    /// Failures are logged and reported as `false`; they never fail the deployment.
    pub async fn mark_deployed(&self, project_id: &str, kind: ModuleKind) -> bool {
        let (clear_backend, clear_frontend) = match kind {
            ModuleKind::Backend => (true, false),
            ModuleKind::Frontend => (false, true),
        };

        match self
            .store
            .clear_change_flags(project_id, clear_backend, clear_frontend)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Failed to clear {} change flag for {}: {}",
                    kind.as_str(),
                    project_id,
                    e
                );
                false
            }
        }
    }
}
