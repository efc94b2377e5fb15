//! Enforcer: the action executor (module J).
//!
//! Owns two responsibilities: a synchronous pre-gate (`check`) consulted on
//! every request before Guardian runs, and asynchronous remediation
//! (`trigger_enforcement` / `approve_action`) driven by Guardian's anomaly
//! output. The pre-gate is deliberately fail-open: an internal error here
//! must never block a legitimate request, so any failure inside `check`
//! degrades to "allowed" rather than propagating. This is an explicit,
//! documented policy choice, not an oversight.

use crate::types::{Anomaly, EnforcerAction, EnforcerActionStatus, EnforcerActionTrigger, EnforcerActionType};
use crate::types::Severity;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EnforcerError {
    #[error("enforcer action {0} not found")]
    NotFound(String),
    #[error("enforcer action {0} is not pending")]
    NotPending(String),
}

#[derive(Debug, Clone)]
pub struct EnforcerConfig {
    pub max_actions_per_hour: u32,
    pub temporary_block_duration_minutes: i64,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            max_actions_per_hour: 1000,
            temporary_block_duration_minutes: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnforcerCheckResult {
    pub allowed: bool,
    pub reason: Option<String>,
}

pub struct Enforcer {
    config: EnforcerConfig,
    request_counters: DashMap<String, Mutex<VecDeque<DateTime<Utc>>>>,
    blocked_until: DashMap<String, DateTime<Utc>>,
    actions: DashMap<String, EnforcerAction>,
}

impl Enforcer {
    pub fn new(config: EnforcerConfig) -> Self {
        Self {
            config,
            request_counters: DashMap::new(),
            blocked_until: DashMap::new(),
            actions: DashMap::new(),
        }
    }

    /// The pre-gate consulted before Guardian runs. Fail-open: any internal
    /// error degrades to `allowed: true` with the failure logged, rather
    /// than bricking authorization on an enforcer bug.
    pub fn check(&self, principal_id: &str) -> EnforcerCheckResult {
        match self.try_check(principal_id, Utc::now()) {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(principal_id, error = %err, "enforcer pre-gate failed open");
                EnforcerCheckResult { allowed: true, reason: None }
            }
        }
    }

    fn try_check(&self, principal_id: &str, now: DateTime<Utc>) -> Result<EnforcerCheckResult, EnforcerError> {
        if let Some(until) = self.blocked_until.get(principal_id) {
            if *until > now {
                return Ok(EnforcerCheckResult {
                    allowed: false,
                    reason: Some("enforcer:temporary-block".into()),
                });
            }
        }

        let counter = self
            .request_counters
            .entry(principal_id.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut timestamps = counter.lock();
        timestamps.push_back(now);
        let cutoff = now - ChronoDuration::hours(1);
        while timestamps.front().map(|t| *t < cutoff).unwrap_or(false) {
            timestamps.pop_front();
        }

        if timestamps.len() as u32 > self.config.max_actions_per_hour {
            drop(timestamps);
            self.record_auto_rate_limit(principal_id, now);
            return Ok(EnforcerCheckResult {
                allowed: false,
                reason: Some("enforcer:rate-limit".into()),
            });
        }

        Ok(EnforcerCheckResult { allowed: true, reason: None })
    }

    fn record_auto_rate_limit(&self, principal_id: &str, now: DateTime<Utc>) {
        let action = EnforcerAction {
            id: Uuid::new_v4().to_string(),
            action_type: EnforcerActionType::RateLimit,
            principal_id: principal_id.to_string(),
            priority: 3,
            status: EnforcerActionStatus::Completed,
            trigger: EnforcerActionTrigger {
                agent_type: "enforcer".into(),
                reason: "request rate exceeded maxActionsPerHour".into(),
                related_ids: Vec::new(),
            },
            can_rollback: true,
            result: Some("rate limited automatically".into()),
            created_at: now,
            updated_at: now,
        };
        self.actions.insert(action.id.clone(), action);
    }

    /// Creates and, unless it requires human approval, immediately applies
    /// an enforcement action. The caller (typically the orchestrator,
    /// informed by Guardian) chooses `action_type` and supplies the
    /// triggering reason; `recommended_action_type` offers a default
    /// severity-based mapping but the Enforcer itself never infers it.
    pub fn trigger_enforcement(&self, action_type: EnforcerActionType, principal_id: &str, priority: u8, trigger: EnforcerActionTrigger) -> EnforcerAction {
        let now = Utc::now();
        let requires_approval = matches!(action_type, EnforcerActionType::RequireApproval);

        let mut action = EnforcerAction {
            id: Uuid::new_v4().to_string(),
            action_type,
            principal_id: principal_id.to_string(),
            priority,
            status: EnforcerActionStatus::Pending,
            trigger,
            can_rollback: matches!(action_type, EnforcerActionType::RateLimit | EnforcerActionType::TemporaryBlock),
            result: None,
            created_at: now,
            updated_at: now,
        };

        if !requires_approval {
            self.apply(&mut action, now);
        }

        self.actions.insert(action.id.clone(), action.clone());
        action
    }

    fn apply(&self, action: &mut EnforcerAction, now: DateTime<Utc>) {
        match action.action_type {
            EnforcerActionType::TemporaryBlock => {
                let until = now + ChronoDuration::minutes(self.config.temporary_block_duration_minutes);
                self.blocked_until.insert(action.principal_id.clone(), until);
                action.result = Some(format!("blocked until {until}"));
            }
            EnforcerActionType::RateLimit => {
                action.result = Some("rate limit applied".into());
            }
            EnforcerActionType::AlertAdmin => {
                action.result = Some("admin alerted".into());
            }
            EnforcerActionType::RequireApproval => {
                action.result = Some("approved and applied".into());
            }
        }
        action.status = EnforcerActionStatus::Completed;
        action.updated_at = now;
    }

    /// Resolves a pending, approval-requiring action. Approval is the gate,
    /// not a terminal state of its own: an approved action is applied
    /// immediately and reaches `Completed`, same as any other action type.
    pub fn approve_action(&self, action_id: &str, approve: bool) -> Result<EnforcerAction, EnforcerError> {
        let mut entry = self
            .actions
            .get_mut(action_id)
            .ok_or_else(|| EnforcerError::NotFound(action_id.to_string()))?;

        if entry.status != EnforcerActionStatus::Pending {
            return Err(EnforcerError::NotPending(action_id.to_string()));
        }

        let now = Utc::now();
        if approve {
            self.apply(&mut *entry, now);
        } else {
            entry.status = EnforcerActionStatus::Failed;
            entry.result = Some("rejected by approver".into());
            entry.updated_at = now;
        }

        Ok(entry.clone())
    }

    /// Rolls back a completed, rollback-eligible action.
    pub fn rollback_action(&self, action_id: &str) -> Result<EnforcerAction, EnforcerError> {
        let mut entry = self
            .actions
            .get_mut(action_id)
            .ok_or_else(|| EnforcerError::NotFound(action_id.to_string()))?;

        if entry.status != EnforcerActionStatus::Completed || !entry.can_rollback {
            return Err(EnforcerError::NotPending(action_id.to_string()));
        }

        if entry.action_type == EnforcerActionType::TemporaryBlock {
            self.blocked_until.remove(&entry.principal_id);
        }

        entry.status = EnforcerActionStatus::RolledBack;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    pub fn get_pending_actions(&self) -> Vec<EnforcerAction> {
        self.actions
            .iter()
            .filter(|e| e.status == EnforcerActionStatus::Pending)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn get_action(&self, action_id: &str) -> Option<EnforcerAction> {
        self.actions.get(action_id).map(|e| e.value().clone())
    }
}

/// Default severity-based mapping from an anomaly to a remediation type.
/// Callers are free to override this; the Enforcer does not apply it
/// implicitly.
pub fn recommended_action_type(anomaly: &Anomaly) -> EnforcerActionType {
    use crate::types::AnomalyType::*;
    match (anomaly.severity, anomaly.anomaly_type) {
        (Severity::Critical, VelocitySpike) => EnforcerActionType::TemporaryBlock,
        (Severity::Critical, _) => EnforcerActionType::RequireApproval,
        (Severity::High, _) => EnforcerActionType::RequireApproval,
        (Severity::Medium, _) => EnforcerActionType::AlertAdmin,
        (Severity::Low, _) => EnforcerActionType::RateLimit,
    }
}

pub fn severity_priority(severity: Severity) -> u8 {
    match severity {
        Severity::Low => 1,
        Severity::Medium => 2,
        Severity::High => 3,
        Severity::Critical => 4,
    }
}
