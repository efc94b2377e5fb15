//! Store-owned wrapper and query/event types (module C).

use chrono::{DateTime, Utc};
use sentra_core::policy::PolicyKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A policy document plus the metadata the store owns: identity, content
/// hash, lifecycle flag, and timestamps. Identity is `"<kind>:<name>"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPolicy {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub policy: PolicyKind,
    pub content_hash: String,
    pub version: String,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl StoredPolicy {
    pub fn make_id(kind: &str, name: &str) -> String {
        format!("{kind}:{name}")
    }
}

/// A change-event kind, mirroring the store's public operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeEventType {
    Created,
    Updated,
    Deleted,
    Disabled,
    Enabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_type: ChangeEventType,
    pub policy_id: String,
    pub policy_name: String,
    pub policy_kind: String,
    pub previous_hash: Option<String>,
    pub new_hash: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Name,
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Filter and pagination parameters for `query`.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub kinds: Option<Vec<String>>,
    pub resource_kind: Option<String>,
    pub name_glob: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub disabled: Option<bool>,
    pub sort_by: Option<SortField>,
    pub sort_direction: SortDirection,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Default for SortDirection {
    fn default() -> Self {
        SortDirection::Ascending
    }
}

/// Result of a `bulkPut`: all-or-none when the store is transactional (it
/// is, here — it's all in-memory), but the per-item error list is kept for
/// interface parity with backends that degrade to best-effort.
#[derive(Debug, Default)]
pub struct BulkPutOutcome {
    pub put: Vec<String>,
    pub errors: Vec<(usize, String)>,
}
