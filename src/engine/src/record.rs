//! Decision record & query log (module E).
//!
//! Append-only; the only mutation is pushing a new record. Guardian's
//! baseline and velocity computations read through this interface only, so
//! ordering per principal must be monotonic (enforced here by always
//! appending under the write lock and stamping `created_at` at append time).

use chrono::{DateTime, Timelike, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use sentra_core::policy::{CheckRequest, CheckResponse};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct DecisionRecord {
    pub id: String,
    pub principal_id: String,
    pub resource_kind: String,
    pub request: CheckRequest,
    pub response: CheckResponse,
    pub matched_rule: Option<String>,
    pub derived_roles: Vec<String>,
    pub anomaly_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PrincipalStats {
    pub total_requests: u64,
    pub unique_resources: u64,
    pub common_actions: Vec<(String, u64)>,
    pub common_time_ranges: Vec<(u32, u64)>,
}

struct DecisionStoreInner {
    records: RwLock<Vec<DecisionRecord>>,
    by_principal: DashMap<String, Vec<usize>>,
}

/// Append-only decision record log with a read-mostly access pattern.
#[derive(Clone)]
pub struct DecisionStore {
    inner: Arc<DecisionStoreInner>,
}

impl DecisionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DecisionStoreInner {
                records: RwLock::new(Vec::new()),
                by_principal: DashMap::new(),
            }),
        }
    }

    pub fn append(&self, record: DecisionRecord) {
        let principal = record.principal_id.clone();
        let mut records = self.inner.records.write();
        let index = records.len();
        records.push(record);
        drop(records);
        self.inner.by_principal.entry(principal).or_default().push(index);
    }

    fn indices_for(&self, principal_id: &str) -> Vec<usize> {
        self.inner
            .by_principal
            .get(principal_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn query_by_principal(&self, principal_id: &str, limit: Option<usize>) -> Vec<DecisionRecord> {
        let records = self.inner.records.read();
        let mut out: Vec<DecisionRecord> = self
            .indices_for(principal_id)
            .into_iter()
            .filter_map(|i| records.get(i).cloned())
            .collect();
        if let Some(limit) = limit {
            let start = out.len().saturating_sub(limit);
            out = out[start..].to_vec();
        }
        out
    }

    pub fn query_by_time_range(&self, start: DateTime<Utc>, end: DateTime<Utc>, limit: Option<usize>) -> Vec<DecisionRecord> {
        let records = self.inner.records.read();
        let mut out: Vec<DecisionRecord> = records
            .iter()
            .filter(|r| r.created_at >= start && r.created_at <= end)
            .cloned()
            .collect();
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        out
    }

    pub fn query_by_resource_kind(&self, resource_kind: &str, limit: Option<usize>) -> Vec<DecisionRecord> {
        let records = self.inner.records.read();
        let mut out: Vec<DecisionRecord> = records
            .iter()
            .filter(|r| r.resource_kind == resource_kind)
            .cloned()
            .collect();
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        out
    }

    /// Most recent `limit` records for a principal within the last `since`.
    pub fn recent_for_principal(&self, principal_id: &str, since: DateTime<Utc>, limit: usize) -> Vec<DecisionRecord> {
        let mut records = self.query_by_principal(principal_id, None);
        records.retain(|r| r.created_at >= since);
        let start = records.len().saturating_sub(limit);
        records[start..].to_vec()
    }

    /// Per-principal statistics over all retained history: total requests,
    /// unique resources, top-K common actions (default K=5), and common
    /// time ranges (hour-of-day counts, sorted descending by count).
    pub fn principal_stats(&self, principal_id: &str, top_k: usize) -> PrincipalStats {
        let records = self.query_by_principal(principal_id, None);
        if records.is_empty() {
            return PrincipalStats::default();
        }

        let mut resources = std::collections::HashSet::new();
        let mut action_counts: HashMap<String, u64> = HashMap::new();
        let mut hour_counts: HashMap<u32, u64> = HashMap::new();

        for record in &records {
            resources.insert(record.request.resource.id.clone());
            for action in &record.request.actions {
                *action_counts.entry(action.clone()).or_insert(0) += 1;
            }
            *hour_counts.entry(record.created_at.hour()).or_insert(0) += 1;
        }

        let mut common_actions: Vec<(String, u64)> = action_counts.into_iter().collect();
        common_actions.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        common_actions.truncate(top_k);

        let mut common_time_ranges: Vec<(u32, u64)> = hour_counts.into_iter().collect();
        common_time_ranges.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        PrincipalStats {
            total_requests: records.len() as u64,
            unique_resources: resources.len() as u64,
            common_actions,
            common_time_ranges,
        }
    }
}

impl Default for DecisionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_core::policy::types::{ActionResult, Effect, Principal, Resource, ResponseMeta};
    use std::collections::BTreeMap;

    fn record(principal: &str, resource_kind: &str, action: &str) -> DecisionRecord {
        let request = CheckRequest {
            principal: Principal::new(principal),
            resource: Resource::new(resource_kind, "r1"),
            actions: vec![action.to_string()],
            aux_data: Default::default(),
        };
        let mut results = BTreeMap::new();
        results.insert(
            action.to_string(),
            ActionResult {
                effect: Effect::Allow,
                policy_id: "p1".into(),
                matched_rule: "rule#0".into(),
                effective_derived_roles: vec![],
            },
        );
        DecisionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            principal_id: principal.to_string(),
            resource_kind: resource_kind.to_string(),
            request,
            response: CheckResponse {
                request_id: uuid::Uuid::new_v4().to_string(),
                results,
                meta: ResponseMeta::default(),
            },
            matched_rule: Some("rule#0".into()),
            derived_roles: vec![],
            anomaly_score: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn records_are_retrievable_per_principal_in_append_order() {
        let store = DecisionStore::new();
        store.append(record("u1", "document", "read"));
        store.append(record("u1", "document", "write"));
        store.append(record("u2", "document", "read"));

        let u1_records = store.query_by_principal("u1", None);
        assert_eq!(u1_records.len(), 2);
        assert_eq!(u1_records[0].request.actions[0], "read");
        assert_eq!(u1_records[1].request.actions[0], "write");
    }

    #[test]
    fn principal_stats_counts_actions_and_resources() {
        let store = DecisionStore::new();
        store.append(record("u1", "document", "read"));
        store.append(record("u1", "document", "read"));
        store.append(record("u1", "document", "write"));

        let stats = store.principal_stats("u1", 5);
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.common_actions[0], ("read".to_string(), 2));
    }

    #[test]
    fn stats_for_unknown_principal_are_empty() {
        let store = DecisionStore::new();
        let stats = store.principal_stats("ghost", 5);
        assert_eq!(stats.total_requests, 0);
    }
}
