//! Worker pool and load balancer (module L).

use crate::worker::{WorkerHandle, WorkerState};
use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancingStrategy {
    RoundRobin,
    LeastConnections,
    Weighted,
    Random,
}

#[derive(Debug, Clone)]
pub struct AutoScaleConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Desired average in-flight tasks per active worker before scaling up.
    pub target_load_per_worker: f64,
}

impl Default for AutoScaleConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 16,
            target_load_per_worker: 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    ScaleUp,
    ScaleDown,
    Hold,
}

pub struct WorkerPool {
    workers: DashMap<String, Arc<WorkerHandle>>,
    strategy: BalancingStrategy,
    autoscale: AutoScaleConfig,
    work_stealing_enabled: bool,
    round_robin_cursor: AtomicUsize,
}

impl WorkerPool {
    pub fn new(strategy: BalancingStrategy, autoscale: AutoScaleConfig, work_stealing_enabled: bool) -> Self {
        Self {
            workers: DashMap::new(),
            strategy,
            autoscale,
            work_stealing_enabled,
            round_robin_cursor: AtomicUsize::new(0),
        }
    }

    pub fn spawn_worker(&self, id: impl Into<String>, role: impl Into<String>, priority_weight: f64) -> Arc<WorkerHandle> {
        let worker = WorkerHandle::new(id, role, priority_weight);
        self.workers.insert(worker.id.clone(), worker.clone());
        worker
    }

    pub fn warmup(&self, id: &str) {
        if let Some(w) = self.workers.get(id) {
            w.set_state(WorkerState::WarmingUp);
        }
    }

    pub fn activate(&self, id: &str) {
        if let Some(w) = self.workers.get(id) {
            w.set_state(WorkerState::Active);
        }
    }

    pub fn drain(&self, id: &str) {
        if let Some(w) = self.workers.get(id) {
            w.set_state(WorkerState::Draining);
        }
    }

    pub fn terminate(&self, id: &str) {
        if let Some(w) = self.workers.get(id) {
            w.set_state(WorkerState::Terminated);
        }
        self.workers.remove(id);
    }

    pub fn active_workers(&self) -> Vec<Arc<WorkerHandle>> {
        self.workers.iter().map(|e| e.value().clone()).filter(|w| w.is_active()).collect()
    }

    /// Picks a worker per the configured strategy, optionally preferring a
    /// given role. Returns `None` if no active worker exists.
    pub fn assign(&self, role_affinity: Option<&str>) -> Option<Arc<WorkerHandle>> {
        let mut candidates = self.active_workers();
        if candidates.is_empty() {
            return None;
        }
        if let Some(role) = role_affinity {
            let affine: Vec<_> = candidates.iter().filter(|w| w.role == role).cloned().collect();
            if !affine.is_empty() {
                candidates = affine;
            }
        }

        match self.strategy {
            BalancingStrategy::RoundRobin => {
                let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
                Some(candidates[idx].clone())
            }
            BalancingStrategy::LeastConnections => {
                candidates.into_iter().min_by_key(|w| w.load())
            }
            BalancingStrategy::Weighted => candidates
                .into_iter()
                .max_by(|a, b| assignment_score(a, role_affinity).total_cmp(&assignment_score(b, role_affinity))),
            BalancingStrategy::Random => {
                let mut rng = rand::thread_rng();
                candidates.choose(&mut rng).cloned()
            }
        }
    }

    pub fn worker(&self, id: &str) -> Option<Arc<WorkerHandle>> {
        self.workers.get(id).map(|e| e.value().clone())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Decides whether the pool should grow or shrink given current total
    /// queue depth, bounded by `min_workers`/`max_workers`.
    pub fn evaluate_autoscale(&self, queue_depth: u64) -> ScaleDecision {
        let active = self.active_workers();
        let count = active.len();
        if count < self.autoscale.min_workers {
            return ScaleDecision::ScaleUp;
        }
        if count >= self.autoscale.max_workers {
            return ScaleDecision::Hold;
        }

        let total_load: u64 = active.iter().map(|w| w.load()).sum::<u64>() + queue_depth;
        let avg_load = total_load as f64 / count.max(1) as f64;

        if avg_load > self.autoscale.target_load_per_worker {
            ScaleDecision::ScaleUp
        } else if avg_load < self.autoscale.target_load_per_worker / 4.0 && count > self.autoscale.min_workers {
            ScaleDecision::ScaleDown
        } else {
            ScaleDecision::Hold
        }
    }

    /// Moves one unit of accounted load from an overloaded worker to an
    /// idle one, when work-stealing is enabled. Returns whether a transfer
    /// happened.
    pub fn steal_work(&self) -> bool {
        if !self.work_stealing_enabled {
            return false;
        }
        let active = self.active_workers();
        if active.len() < 2 {
            return false;
        }
        let (Some(busiest), Some(idlest)) = (
            active.iter().max_by_key(|w| w.load()).cloned(),
            active.iter().min_by_key(|w| w.load()).cloned(),
        ) else {
            return false;
        };
        if busiest.id == idlest.id || busiest.load() <= idlest.load() + 1 {
            return false;
        }
        busiest.end_task();
        idlest.begin_task();
        true
    }
}

fn assignment_score(worker: &WorkerHandle, role_affinity: Option<&str>) -> f64 {
    let affinity_bonus = if role_affinity == Some(worker.role.as_str()) { 2.0 } else { 1.0 };
    (worker.priority_weight * affinity_bonus) / (1.0 + worker.load() as f64)
}
