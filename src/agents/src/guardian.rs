//! Guardian: the anomaly detector (module G).
//!
//! Scores each request across four independent channels, combines them with
//! configurable weights, clamps to `[0,1]`, and creates an `Anomaly` once the
//! clamped score reaches the configured threshold. Baselines, velocity
//! trackers, and the per-principal anomaly ring are Guardian's own state;
//! the authoritative anomaly record still lives in `AnomalyStore` so other
//! components can query history without going through Guardian directly.

use crate::types::{Anomaly, AnomalyStatus, AnomalyType, Baseline, RiskFactor, Severity};
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use sentra_core::policy::types::CheckRequest;
use sentra_engine::DecisionStore;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

const ANOMALY_RING_CAPACITY: usize = 10;
const ESCALATION_LOOKBACK_HOURS: i64 = 24;
const ESCALATION_SAMPLE_CAP: usize = 50;

#[derive(Debug, Clone)]
pub struct ChannelWeights {
    pub velocity: f64,
    pub baseline: f64,
    pub patterns: f64,
    pub escalation: f64,
}

impl Default for ChannelWeights {
    fn default() -> Self {
        Self {
            velocity: 0.3,
            baseline: 0.4,
            patterns: 0.2,
            escalation: 0.3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuardianConfig {
    pub max_requests_per_minute: u32,
    pub velocity_window_minutes: i64,
    pub anomaly_threshold: f64,
    pub min_baseline_sample_size: u64,
    pub suspicious_patterns: Vec<String>,
    pub sensitive_prefixes: Vec<String>,
    pub weights: ChannelWeights,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 100,
            velocity_window_minutes: 5,
            anomaly_threshold: 0.7,
            min_baseline_sample_size: 10,
            suspicious_patterns: vec![
                "admin".into(),
                "delete".into(),
                "export".into(),
                "bulk".into(),
                "payout".into(),
                "withdraw".into(),
            ],
            sensitive_prefixes: vec![
                "admin".into(),
                "payout".into(),
                "user".into(),
                "subscription".into(),
                "payment".into(),
            ],
            weights: ChannelWeights::default(),
        }
    }
}

/// Result of scoring a single request.
#[derive(Debug, Clone)]
pub struct GuardianResult {
    pub score: f64,
    pub anomaly: Option<Anomaly>,
}

struct ChannelOutcome {
    score: f64,
    factors: Vec<RiskFactor>,
}

/// Append-only authoritative anomaly store, analogous to `DecisionStore`.
#[derive(Clone)]
pub struct AnomalyStore {
    records: Arc<Mutex<Vec<Anomaly>>>,
}

impl AnomalyStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn append(&self, anomaly: Anomaly) {
        self.records.lock().push(anomaly);
    }

    pub fn for_principal(&self, principal_id: &str) -> Vec<Anomaly> {
        self.records
            .lock()
            .iter()
            .filter(|a| a.principal_id == principal_id)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Anomaly> {
        self.records.lock().clone()
    }
}

impl Default for AnomalyStore {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Guardian {
    config: parking_lot::RwLock<GuardianConfig>,
    decisions: DecisionStore,
    anomalies: AnomalyStore,
    baseline_cache: DashMap<String, (Baseline, DateTime<Utc>)>,
    velocity: DashMap<String, Mutex<VecDeque<DateTime<Utc>>>>,
    anomaly_ring: DashMap<String, Mutex<VecDeque<Anomaly>>>,
}

impl Guardian {
    pub fn new(decisions: DecisionStore, config: GuardianConfig) -> Self {
        Self {
            config: parking_lot::RwLock::new(config),
            decisions,
            anomalies: AnomalyStore::new(),
            baseline_cache: DashMap::new(),
            velocity: DashMap::new(),
            anomaly_ring: DashMap::new(),
        }
    }

    pub fn anomalies(&self) -> &AnomalyStore {
        &self.anomalies
    }

    pub fn config(&self) -> GuardianConfig {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: GuardianConfig) {
        *self.config.write() = config;
    }

    pub fn analyze_request(&self, request: &CheckRequest) -> GuardianResult {
        self.analyze_request_at(request, Utc::now())
    }

    /// Same as `analyze_request` but with an injectable clock, per the
    /// "unusual time" open question — the caller decides the tenant's
    /// reference clock.
    pub fn analyze_request_at(&self, request: &CheckRequest, now: DateTime<Utc>) -> GuardianResult {
        let config = self.config.read().clone();
        let principal_id = &request.principal.id;
        let action = request.actions.first().cloned().unwrap_or_default();

        let velocity = self.velocity_channel(principal_id, now, &config);
        let baseline = self.baseline_channel(principal_id, &action, now, &config);
        let patterns = self.pattern_channel(&request.resource.kind, &request.resource.id, &action, &config);
        let escalation = self.escalation_channel(principal_id, &request.resource.kind, now, &config);

        let raw = velocity.score * config.weights.velocity
            + baseline.score * config.weights.baseline
            + patterns.score * config.weights.patterns
            + escalation.score * config.weights.escalation;
        let score = raw.clamp(0.0, 1.0);

        let mut all_factors = Vec::new();
        all_factors.extend(velocity.factors);
        all_factors.extend(baseline.factors);
        all_factors.extend(patterns.factors);
        all_factors.extend(escalation.factors);

        let anomaly = if score >= config.anomaly_threshold {
            let baseline_snapshot = self.baseline_for(principal_id, &config);
            let anomaly = self.create_anomaly(principal_id, score, all_factors, request, now, Some(baseline_snapshot));
            self.anomalies.append(anomaly.clone());
            self.push_ring(principal_id, anomaly.clone());
            Some(anomaly)
        } else {
            None
        };

        GuardianResult { score, anomaly }
    }

    fn velocity_channel(&self, principal_id: &str, now: DateTime<Utc>, config: &GuardianConfig) -> ChannelOutcome {
        let window = ChronoDuration::minutes(config.velocity_window_minutes);
        let tracker = self.velocity.entry(principal_id.to_string()).or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut entries = tracker.lock();
        entries.push_back(now);
        let cutoff = now - window;
        while entries.front().map(|t| *t < cutoff).unwrap_or(false) {
            entries.pop_front();
        }
        let count = entries.len() as f64;
        drop(entries);

        let reference_rate = config.max_requests_per_minute as f64 * config.velocity_window_minutes as f64;
        let ratio = if reference_rate > 0.0 { count / reference_rate } else { 0.0 };

        let (score, severity) = if ratio < 0.5 {
            (0.0, None)
        } else if ratio < 0.7 {
            (0.2, Some(Severity::Low))
        } else if ratio < 1.0 {
            (0.5, Some(Severity::Medium))
        } else if ratio < 1.5 {
            (0.8, Some(Severity::High))
        } else {
            (1.0, Some(Severity::Critical))
        };

        let factors = match severity {
            Some(severity) => vec![RiskFactor {
                name: "velocity".into(),
                weight: score,
                severity,
            }],
            None => Vec::new(),
        };

        ChannelOutcome { score, factors }
    }

    fn baseline_channel(&self, principal_id: &str, action: &str, now: DateTime<Utc>, config: &GuardianConfig) -> ChannelOutcome {
        let baseline = self.baseline_for(principal_id, config);

        if baseline.sample_size < config.min_baseline_sample_size {
            return ChannelOutcome {
                score: 0.2,
                factors: vec![RiskFactor {
                    name: "new_principal".into(),
                    weight: 0.2,
                    severity: Severity::Low,
                }],
            };
        }

        let mut score = 0.0;
        let mut factors = Vec::new();

        if !baseline.common_actions.iter().any(|a| a == action) {
            score += 0.3;
            factors.push(RiskFactor {
                name: "unusual_action".into(),
                weight: 0.3,
                severity: Severity::Medium,
            });
        }

        let hour = now.hour();
        if hour < 6 || hour > 22 {
            score += 0.15;
            factors.push(RiskFactor {
                name: "unusual_time".into(),
                weight: 0.15,
                severity: Severity::Low,
            });
        }

        ChannelOutcome { score, factors }
    }

    fn baseline_for(&self, principal_id: &str, config: &GuardianConfig) -> Baseline {
        if let Some(entry) = self.baseline_cache.get(principal_id) {
            return entry.0.clone();
        }

        let stats = self.decisions.principal_stats(principal_id, 5);
        let common_actions: Vec<String> = stats.common_actions.iter().map(|(a, _)| a.clone()).collect();
        let common_time_ranges: Vec<u32> = stats.common_time_ranges.iter().map(|(h, _)| *h).collect();

        let baseline = Baseline {
            principal_id: principal_id.to_string(),
            sample_size: stats.total_requests,
            avg_requests_per_hour: 0.0,
            common_actions,
            common_resource_kinds: Vec::new(),
            common_time_ranges,
            unique_resource_count: stats.unique_resources,
        };

        let _ = config;
        self.baseline_cache.insert(principal_id.to_string(), (baseline.clone(), Utc::now()));
        baseline
    }

    fn pattern_channel(&self, resource_kind: &str, resource_id: &str, action: &str, config: &GuardianConfig) -> ChannelOutcome {
        let haystacks = [resource_kind.to_lowercase(), resource_id.to_lowercase(), action.to_lowercase()];
        let mut hits = 0.0;
        for pattern in &config.suspicious_patterns {
            if haystacks.iter().any(|h| h.contains(pattern.as_str())) {
                hits += 0.25;
            }
        }
        let mut score = hits.min(1.0);
        let mut factors = Vec::new();
        if score > 0.0 {
            factors.push(RiskFactor {
                name: "suspicious_pattern".into(),
                weight: score,
                severity: Severity::Medium,
            });
        }

        let action_lower = action.to_lowercase();
        if ["bulk", "batch", "all"].iter().any(|kw| action_lower.contains(kw)) {
            score += 0.3;
            factors.push(RiskFactor {
                name: "bulk_operation".into(),
                weight: 0.3,
                severity: Severity::Medium,
            });
        }

        ChannelOutcome { score, factors }
    }

    fn escalation_channel(&self, principal_id: &str, resource_kind: &str, now: DateTime<Utc>, config: &GuardianConfig) -> ChannelOutcome {
        let since = now - ChronoDuration::hours(ESCALATION_LOOKBACK_HOURS);
        let history = self.decisions.recent_for_principal(principal_id, since, ESCALATION_SAMPLE_CAP);
        let seen_kinds: std::collections::HashSet<&str> = history.iter().map(|r| r.resource_kind.as_str()).collect();

        let is_new_kind = !seen_kinds.contains(resource_kind);
        let is_sensitive = config.sensitive_prefixes.iter().any(|p| resource_kind.starts_with(p.as_str()));

        if is_new_kind && is_sensitive {
            ChannelOutcome {
                score: 0.5,
                factors: vec![RiskFactor {
                    name: "permission_escalation".into(),
                    weight: 0.5,
                    severity: Severity::High,
                }],
            }
        } else {
            ChannelOutcome { score: 0.0, factors: Vec::new() }
        }
    }

    fn create_anomaly(&self, principal_id: &str, score: f64, factors: Vec<RiskFactor>, request: &CheckRequest, now: DateTime<Utc>, baseline_snapshot: Option<Baseline>) -> Anomaly {
        let anomaly_type = classify_anomaly_type(&factors);
        let severity = classify_severity(score, &factors);

        Anomaly {
            id: Uuid::new_v4().to_string(),
            detected_at: now,
            anomaly_type,
            severity,
            principal_id: principal_id.to_string(),
            score,
            factors,
            baseline_snapshot,
            observed_snapshot: serde_json::json!({
                "resourceKind": request.resource.kind,
                "resourceId": request.resource.id,
                "actions": request.actions,
            }),
            status: AnomalyStatus::Open,
        }
    }

    fn push_ring(&self, principal_id: &str, anomaly: Anomaly) {
        let ring = self.anomaly_ring.entry(principal_id.to_string()).or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut entries = ring.lock();
        if entries.len() >= ANOMALY_RING_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(anomaly);
    }

    pub fn recent_anomalies(&self, principal_id: &str) -> Vec<Anomaly> {
        self.anomaly_ring
            .get(principal_id)
            .map(|r| r.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Hourly background job: clears the baseline cache so the next request
    /// recomputes from fresh decision history.
    pub fn purge_baseline_cache(&self) {
        self.baseline_cache.clear();
    }

    /// Per-minute background job: drops velocity entries older than the
    /// window and removes trackers left empty.
    pub fn purge_velocity_trackers(&self) {
        let window = ChronoDuration::minutes(self.config.read().velocity_window_minutes);
        let now = Utc::now();
        let cutoff = now - window;
        let mut empty = Vec::new();
        for entry in self.velocity.iter() {
            let mut timestamps = entry.value().lock();
            while timestamps.front().map(|t| *t < cutoff).unwrap_or(false) {
                timestamps.pop_front();
            }
            if timestamps.is_empty() {
                empty.push(entry.key().clone());
            }
        }
        for key in empty {
            self.velocity.remove(&key);
        }
    }
}

fn classify_anomaly_type(factors: &[RiskFactor]) -> AnomalyType {
    const PRIORITY: &[(&str, AnomalyType)] = &[
        ("velocity", AnomalyType::VelocitySpike),
        ("permission_escalation", AnomalyType::PermissionEscalation),
        ("unusual_action", AnomalyType::UnusualResourceAccess),
        ("unusual_time", AnomalyType::UnusualAccessTime),
        ("suspicious_pattern", AnomalyType::PatternDeviation),
        ("bulk_operation", AnomalyType::BulkOperation),
    ];
    for (name, anomaly_type) in PRIORITY {
        if factors.iter().any(|f| f.name == *name) {
            return *anomaly_type;
        }
    }
    AnomalyType::PatternDeviation
}

fn classify_severity(score: f64, factors: &[RiskFactor]) -> Severity {
    if factors.iter().any(|f| f.severity == Severity::Critical) || score >= 0.9 {
        Severity::Critical
    } else if factors.iter().any(|f| f.severity == Severity::High) || score >= 0.7 {
        Severity::High
    } else if score >= 0.5 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Spawns Guardian's two background maintenance jobs. Both are explicit,
/// cancellable tasks rather than fire-and-forget timers.
pub struct GuardianJobs {
    baseline_purge: tokio::task::JoinHandle<()>,
    velocity_purge: tokio::task::JoinHandle<()>,
}

impl GuardianJobs {
    pub fn spawn(guardian: Arc<Guardian>) -> Self {
        let baseline_guardian = guardian.clone();
        let baseline_purge = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
            loop {
                interval.tick().await;
                baseline_guardian.purge_baseline_cache();
            }
        });

        let velocity_guardian = guardian;
        let velocity_purge = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                velocity_guardian.purge_velocity_trackers();
            }
        });

        Self { baseline_purge, velocity_purge }
    }

    pub fn shutdown(self) {
        self.baseline_purge.abort();
        self.velocity_purge.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_core::policy::types::{Principal, Resource};

    fn request(principal: &str, kind: &str, action: &str) -> CheckRequest {
        CheckRequest {
            principal: Principal::new(principal),
            resource: Resource::new(kind, "r1"),
            actions: vec![action.to_string()],
            aux_data: Default::default(),
        }
    }

    #[test]
    fn new_principal_gets_small_positive_score() {
        let guardian = Guardian::new(DecisionStore::new(), GuardianConfig::default());
        let result = guardian.analyze_request(&request("u1", "document", "read"));
        assert!(result.score > 0.0 && result.score < 0.5);
        assert!(result.anomaly.is_none());
    }

    #[test]
    fn velocity_channel_is_zero_below_half_reference_rate() {
        let mut config = GuardianConfig::default();
        config.max_requests_per_minute = 100;
        config.velocity_window_minutes = 5;
        let guardian = Guardian::new(DecisionStore::new(), config);

        let now = Utc::now();
        let req = request("u1", "document", "read");
        for _ in 0..10 {
            guardian.analyze_request_at(&req, now);
        }
        let result = guardian.analyze_request_at(&req, now);
        // 11 requests against a reference rate of 500 is well under 50%.
        assert!(result.score < 0.5);
    }

    #[test]
    fn high_velocity_burst_creates_critical_anomaly() {
        let mut config = GuardianConfig::default();
        config.max_requests_per_minute = 100;
        config.velocity_window_minutes = 5;
        let guardian = Guardian::new(DecisionStore::new(), config);

        let now = Utc::now();
        let req = request("u3", "document", "read");
        let mut last = GuardianResult { score: 0.0, anomaly: None };
        for _ in 0..600 {
            last = guardian.analyze_request_at(&req, now);
        }
        assert!(last.score > 0.0);
        let anomaly = last.anomaly.expect("expected an anomaly for a velocity burst");
        assert_eq!(anomaly.anomaly_type, AnomalyType::VelocitySpike);
    }

    #[test]
    fn suspicious_action_substring_contributes_pattern_score() {
        let guardian = Guardian::new(DecisionStore::new(), GuardianConfig::default());
        let result = guardian.analyze_request(&request("u4", "document", "admin_delete"));
        assert!(result.score > 0.0);
    }

    #[test]
    fn velocity_purge_drops_stale_entries_and_empty_trackers() {
        let guardian = Guardian::new(DecisionStore::new(), GuardianConfig::default());
        let old = Utc::now() - ChronoDuration::minutes(30);
        guardian.analyze_request_at(&request("u5", "document", "read"), old);
        guardian.purge_velocity_trackers();
        assert!(guardian.velocity.get("u5").is_none());
    }
}
