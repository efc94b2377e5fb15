//! Worker lifecycle (module L).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Spawning,
    WarmingUp,
    Active,
    Draining,
    Terminated,
}

/// A handle to one pool worker. Workers here represent a logical slot
/// capable of running one pipeline stage (Guardian/Analyst/Advisor/Enforcer
/// replica) — the actual stage logic lives in `sentra-agents`; this module
/// only tracks lifecycle and load.
pub struct WorkerHandle {
    pub id: String,
    pub role: String,
    pub priority_weight: f64,
    state: parking_lot::RwLock<WorkerState>,
    active_tasks: AtomicU64,
}

impl WorkerHandle {
    pub fn new(id: impl Into<String>, role: impl Into<String>, priority_weight: f64) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            role: role.into(),
            priority_weight,
            state: parking_lot::RwLock::new(WorkerState::Spawning),
            active_tasks: AtomicU64::new(0),
        })
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    pub fn set_state(&self, state: WorkerState) {
        *self.state.write() = state;
    }

    pub fn load(&self) -> u64 {
        self.active_tasks.load(Ordering::Relaxed)
    }

    pub fn begin_task(&self) {
        self.active_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn end_task(&self) {
        self.active_tasks.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.state() == WorkerState::Active
    }
}
