//! Per-project re-entrancy guard
//!
//! At most one execution per project may be in flight. The flag is claimed
//! with a compare-exchange and released when the guard drops, so an early
//! return, an error or a cancelled future all free the project. A released
//! flag nobody else references is removed from the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

type FlagMap = Mutex<HashMap<String, Arc<AtomicBool>>>;

/// In-flight flags, one per project
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    flags: Arc<FlagMap>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, project_id: &str) -> Arc<AtomicBool> {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags.entry(project_id.to_string()).or_default().clone()
    }

    /// Claim the project, or `None` if an execution already holds it
    pub fn try_acquire(&self, project_id: &str) -> Option<InFlightGuard> {
        let flag = self.flag(project_id);
        let claimed = flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !claimed {
            return None;
        }

        debug!("Acquired deployment slot for {}", project_id);
        Some(InFlightGuard {
            project_id: project_id.to_string(),
            flag,
            flags: Arc::clone(&self.flags),
        })
    }

    pub fn is_running(&self, project_id: &str) -> bool {
        let flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags
            .get(project_id)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Whether `guard` is the live claim issued by this registry
    pub fn owns(&self, guard: &InFlightGuard) -> bool {
        let flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags
            .get(&guard.project_id)
            .is_some_and(|flag| Arc::ptr_eq(flag, &guard.flag))
    }

    /// Number of projects currently tracked
    pub fn len(&self) -> usize {
        let flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held for the whole execution
#[derive(Debug)]
pub struct InFlightGuard {
    project_id: String,
    flag: Arc<AtomicBool>,
    flags: Arc<FlagMap>,
}

impl InFlightGuard {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        self.flag.store(false, Ordering::Release);

        // Only the map and this guard hold the flag: nobody is racing for it.
        let unshared = flags
            .get(&self.project_id)
            .is_some_and(|flag| Arc::ptr_eq(flag, &self.flag) && Arc::strong_count(flag) == 2);
        if unshared {
            flags.remove(&self.project_id);
        }
        debug!("Released deployment slot for {}", self.project_id);
    }
}
