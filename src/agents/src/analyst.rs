//! Analyst: the pattern miner (module H).
//!
//! Advisory only — it reads decision history and Guardian's anomaly store
//! and produces `LearnedPattern`s for a human (or a future automation) to
//! review. It never writes to the policy store and never calls
//! `PolicyStore::put` directly.

use crate::guardian::AnomalyStore;
use crate::types::{AnomalyType, LearnedPattern};
use chrono::Utc;
use dashmap::DashMap;
use sentra_engine::DecisionStore;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AnalystConfig {
    /// Minimum number of repeated occurrences before a pattern is surfaced.
    pub min_sample_size: u64,
    /// Minimum fraction of a principal's recent anomalies that must share a
    /// type for that type to be reported as a pattern.
    pub min_confidence: f64,
}

impl Default for AnalystConfig {
    fn default() -> Self {
        Self {
            min_sample_size: 3,
            min_confidence: 0.5,
        }
    }
}

pub struct Analyst {
    config: AnalystConfig,
    decisions: DecisionStore,
    anomalies: AnomalyStore,
    patterns: DashMap<String, LearnedPattern>,
}

impl Analyst {
    pub fn new(decisions: DecisionStore, anomalies: AnomalyStore, config: AnalystConfig) -> Self {
        Self {
            config,
            decisions,
            anomalies,
            patterns: DashMap::new(),
        }
    }

    /// Mines decision history and anomaly history for a principal, recording
    /// any newly discovered patterns and returning all patterns found this
    /// run (including ones already known).
    pub fn discover_patterns(&self, principal_id: &str) -> Vec<LearnedPattern> {
        let mut discovered = Vec::new();

        discovered.extend(self.discover_action_patterns(principal_id));
        discovered.extend(self.discover_anomaly_patterns(principal_id));

        for pattern in &discovered {
            self.patterns.insert(pattern.id.clone(), pattern.clone());
        }

        discovered
    }

    fn discover_action_patterns(&self, principal_id: &str) -> Vec<LearnedPattern> {
        let records = self.decisions.query_by_principal(principal_id, None);
        if (records.len() as u64) < self.config.min_sample_size {
            return Vec::new();
        }

        // Frequency is mined over the (resource-kind, action) pair, not the
        // action alone — a principal that frequently "read"s documents and a
        // principal that frequently "read"s ledgers are different patterns.
        let mut action_counts: HashMap<(String, String), u64> = HashMap::new();
        for record in &records {
            for action in &record.request.actions {
                *action_counts.entry((record.resource_kind.clone(), action.clone())).or_insert(0) += 1;
            }
        }

        let total = records.len() as f64;
        let now = Utc::now();
        action_counts
            .into_iter()
            .filter_map(|((resource_kind, action), count)| {
                let confidence = count as f64 / total;
                if confidence < self.config.min_confidence {
                    return None;
                }
                Some(LearnedPattern {
                    id: Uuid::new_v4().to_string(),
                    pattern_type: "frequent_action".into(),
                    description: format!(
                        "principal {principal_id} frequently performs '{action}' on '{resource_kind}'"
                    ),
                    confidence,
                    sample_size: count,
                    discovered_at: now,
                    last_updated: now,
                    is_approved: false,
                    suggested_policy_rule: Some(format!(
                        "allow '{action}' on '{resource_kind}' for principal '{principal_id}' (observed in {count}/{total:.0} requests)"
                    )),
                })
            })
            .collect()
    }

    fn discover_anomaly_patterns(&self, principal_id: &str) -> Vec<LearnedPattern> {
        let anomalies = self.anomalies.for_principal(principal_id);
        if (anomalies.len() as u64) < self.config.min_sample_size {
            return Vec::new();
        }

        let mut type_counts: HashMap<AnomalyType, u64> = HashMap::new();
        for anomaly in &anomalies {
            *type_counts.entry(anomaly.anomaly_type).or_insert(0) += 1;
        }

        let total = anomalies.len() as f64;
        let now = Utc::now();
        type_counts
            .into_iter()
            .filter_map(|(anomaly_type, count)| {
                let confidence = count as f64 / total;
                if confidence < self.config.min_confidence {
                    return None;
                }
                Some(LearnedPattern {
                    id: Uuid::new_v4().to_string(),
                    pattern_type: "recurring_anomaly".into(),
                    description: format!(
                        "principal {principal_id} repeatedly triggers {anomaly_type:?} anomalies"
                    ),
                    confidence,
                    sample_size: count,
                    discovered_at: now,
                    last_updated: now,
                    is_approved: false,
                    suggested_policy_rule: None,
                })
            })
            .collect()
    }

    pub fn get_patterns(&self) -> Vec<LearnedPattern> {
        self.patterns.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get_pattern(&self, id: &str) -> Option<LearnedPattern> {
        self.patterns.get(id).map(|e| e.value().clone())
    }
}
