//! Shared data types for the agentic pipeline (Guardian, Analyst, Advisor,
//! Enforcer).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    VelocitySpike,
    PermissionEscalation,
    UnusualAccessTime,
    UnusualResourceAccess,
    PatternDeviation,
    BulkOperation,
    GeographicAnomaly,
    NewResourceType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyStatus {
    Open,
    Resolved,
    FalsePositive,
}

/// One channel's contribution to the overall anomaly score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub weight: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: String,
    pub detected_at: DateTime<Utc>,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub principal_id: String,
    pub score: f64,
    pub factors: Vec<RiskFactor>,
    pub baseline_snapshot: Option<serde_json::Value>,
    pub observed_snapshot: serde_json::Value,
    pub status: AnomalyStatus,
}

/// Per-principal statistical summary used by Guardian as a reference for
/// "normal" behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Baseline {
    pub principal_id: String,
    pub sample_size: u64,
    pub avg_requests_per_hour: f64,
    pub common_actions: Vec<String>,
    pub common_resource_kinds: Vec<String>,
    pub common_time_ranges: Vec<u32>,
    pub unique_resource_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub id: String,
    #[serde(rename = "type")]
    pub pattern_type: String,
    pub description: String,
    pub confidence: f64,
    pub sample_size: u64,
    pub discovered_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub is_approved: bool,
    pub suggested_policy_rule: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplanationFactor {
    #[serde(rename = "type")]
    pub factor_type: String,
    pub description: String,
    pub impact: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathToAllow {
    pub missing_roles: Vec<String>,
    pub missing_attributes: Vec<String>,
    pub required_conditions: Vec<String>,
    pub suggested_actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub summary: String,
    pub factors: Vec<ExplanationFactor>,
    pub natural_language: String,
    pub path_to_allow: Option<PathToAllow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcerActionType {
    RateLimit,
    TemporaryBlock,
    AlertAdmin,
    RequireApproval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcerActionStatus {
    Pending,
    Completed,
    RolledBack,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcerActionTrigger {
    pub agent_type: String,
    pub reason: String,
    pub related_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcerAction {
    pub id: String,
    pub action_type: EnforcerActionType,
    pub principal_id: String,
    pub priority: u8,
    pub status: EnforcerActionStatus,
    pub trigger: EnforcerActionTrigger,
    pub can_rollback: bool,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The text-generation seam: an external, optional LLM-backed explainer.
/// Absent or disabled, callers still get the full structured `Explanation`
/// with an empty `natural_language` field. `explain` is async because a real
/// implementation makes a network call; this is the one designed suspension
/// point inside Advisor.
#[async_trait::async_trait]
pub trait TextExplainer: Send + Sync {
    async fn explain(&self, structured: &Explanation) -> Option<String>;
}

/// Default no-op implementation: keeps the core testable without a network
/// call.
pub struct NoopTextExplainer;

#[async_trait::async_trait]
impl TextExplainer for NoopTextExplainer {
    async fn explain(&self, _structured: &Explanation) -> Option<String> {
        None
    }
}
