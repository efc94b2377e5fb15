//! Swarm coordinator (module M): stage dispatch across the worker pool plus
//! optional quorum consensus among replica votes.

use crate::pool::WorkerPool;
use crate::types::{PipelineStage, StageDecision, StageResult, StageVote};
use tokio::sync::mpsc;
use tokio::time::Duration;

#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    pub quorum_size: usize,
    pub timeout_ms: u64,
    pub approval_threshold: f64,
    pub min_confidence: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            quorum_size: 3,
            timeout_ms: 500,
            approval_threshold: 0.66,
            min_confidence: 0.4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsensusOutcome {
    pub decision: StageDecision,
    /// `votes >= quorumSize && avgConfidence >= minConfidence`.
    pub reached: bool,
    pub total_votes: usize,
    pub approvals: usize,
    pub rejections: usize,
    pub avg_confidence: f64,
}

impl ConsensusOutcome {
    /// The consensus round's result folded back into the larger
    /// weighted-aggregation vote pool, per the fixed `5 * avgConfidence`
    /// synthetic-weight rule.
    pub fn as_synthetic_vote(&self, voter_id: impl Into<String>) -> StageVote {
        StageVote {
            voter_id: voter_id.into(),
            decision: self.decision,
            confidence: self.avg_confidence,
            weight: 5.0 * self.avg_confidence,
        }
    }
}

pub struct SwarmCoordinator {
    pool: WorkerPool,
    consensus: ConsensusConfig,
}

impl SwarmCoordinator {
    pub fn new(pool: WorkerPool, consensus: ConsensusConfig) -> Self {
        Self { pool, consensus }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Assigns a worker for `stage` and runs `work` against it, tracking
    /// load for the duration of the call.
    pub fn dispatch_stage<F>(&self, stage: PipelineStage, work: F) -> Option<StageResult>
    where
        F: FnOnce(&str) -> (StageDecision, f64, String),
    {
        let worker = self.pool.assign(Some(stage.name()))?;
        worker.begin_task();
        let (decision, confidence, reason) = work(&worker.id);
        worker.end_task();

        Some(StageResult {
            stage,
            worker_id: worker.id.clone(),
            decision,
            confidence,
            reason,
        })
    }

    /// Runs every pipeline stage in the fixed order Guardian → Analyst →
    /// Advisor → Enforcer. A stage with no available worker produces an
    /// `Indeterminate` result rather than aborting the remaining stages —
    /// stage failure must never silently read as `Allow`.
    pub fn run_pipeline<F>(&self, mut work: F) -> Vec<StageResult>
    where
        F: FnMut(PipelineStage, &str) -> (StageDecision, f64, String),
    {
        PipelineStage::ORDER
            .iter()
            .map(|&stage| {
                self.dispatch_stage(stage, |worker_id| work(stage, worker_id))
                    .unwrap_or(StageResult {
                        stage,
                        worker_id: String::new(),
                        decision: StageDecision::Indeterminate,
                        confidence: 0.0,
                        reason: "no worker available".into(),
                    })
            })
            .collect()
    }

    /// Collects up to `quorum_size` votes or until `timeout_ms` elapses,
    /// whichever comes first. Votes the channel delivers after the
    /// deadline are never read — the receiver is dropped with them still
    /// queued, discarding them atomically with respect to the outcome
    /// computed from what was collected.
    pub async fn run_consensus(&self, mut votes: mpsc::Receiver<StageVote>) -> ConsensusOutcome {
        let deadline = Duration::from_millis(self.consensus.timeout_ms);
        let mut collected = Vec::new();

        let _ = tokio::time::timeout(deadline, async {
            while collected.len() < self.consensus.quorum_size {
                match votes.recv().await {
                    Some(vote) => collected.push(vote),
                    None => break,
                }
            }
        })
        .await;

        self.aggregate(&collected)
    }

    /// `avgConfidence` is averaged over every collected vote, not just the
    /// ones above `minConfidence` — that threshold gates `reached`, it does
    /// not pre-filter the average. Consensus is reached iff the vote count
    /// meets `quorumSize` and the resulting average meets `minConfidence`;
    /// the decision itself is the approval ratio against `approvalThreshold`
    /// regardless of whether consensus was reached.
    fn aggregate(&self, votes: &[StageVote]) -> ConsensusOutcome {
        if votes.is_empty() {
            return ConsensusOutcome {
                decision: StageDecision::Indeterminate,
                reached: false,
                total_votes: 0,
                approvals: 0,
                rejections: 0,
                avg_confidence: 0.0,
            };
        }

        let total_votes = votes.len();
        let approvals = votes.iter().filter(|v| v.decision == StageDecision::Allow).count();
        let rejections = total_votes - approvals;
        let avg_confidence = votes.iter().map(|v| v.confidence).sum::<f64>() / total_votes as f64;

        let approval_ratio = approvals as f64 / total_votes as f64;
        let decision = if approval_ratio >= self.consensus.approval_threshold {
            StageDecision::Allow
        } else {
            StageDecision::Deny
        };

        let reached = total_votes >= self.consensus.quorum_size && avg_confidence >= self.consensus.min_confidence;

        ConsensusOutcome {
            decision,
            reached,
            total_votes,
            approvals,
            rejections,
            avg_confidence,
        }
    }

    /// Weighted aggregation across independently produced votes (not a
    /// quorum round): `allow` if the allow-weighted confidence ratio
    /// exceeds 0.6, `deny` if the deny-weighted ratio exceeds 0.4,
    /// otherwise `indeterminate`.
    pub fn weighted_aggregate(votes: &[StageVote]) -> StageDecision {
        let total_weight: f64 = votes.iter().map(|v| v.weight).sum();
        if total_weight <= 0.0 {
            return StageDecision::Indeterminate;
        }

        let allow_weight: f64 = votes
            .iter()
            .filter(|v| v.decision == StageDecision::Allow)
            .map(|v| v.weight * v.confidence)
            .sum();
        let deny_weight: f64 = votes
            .iter()
            .filter(|v| v.decision == StageDecision::Deny)
            .map(|v| v.weight * v.confidence)
            .sum();

        let allow_ratio = allow_weight / total_weight;
        let deny_ratio = deny_weight / total_weight;

        if allow_ratio > 0.6 {
            StageDecision::Allow
        } else if deny_ratio > 0.4 {
            StageDecision::Deny
        } else {
            StageDecision::Indeterminate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{AutoScaleConfig, BalancingStrategy};

    fn coordinator() -> SwarmCoordinator {
        let pool = WorkerPool::new(BalancingStrategy::RoundRobin, AutoScaleConfig::default(), false);
        for stage in PipelineStage::ORDER {
            pool.spawn_worker(format!("{}-0", stage.name()), stage.name(), 1.0);
            pool.activate(&format!("{}-0", stage.name()));
        }
        SwarmCoordinator::new(pool, ConsensusConfig::default())
    }

    #[test]
    fn run_pipeline_dispatches_all_four_stages_in_order() {
        let coordinator = coordinator();
        let results = coordinator.run_pipeline(|_stage, _worker| (StageDecision::Allow, 0.9, "ok".into()));
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].stage, PipelineStage::Guardian);
        assert_eq!(results[3].stage, PipelineStage::Enforcer);
        assert!(results.iter().all(|r| r.decision == StageDecision::Allow));
    }

    #[test]
    fn missing_worker_for_a_stage_is_indeterminate_not_allow() {
        let pool = WorkerPool::new(BalancingStrategy::RoundRobin, AutoScaleConfig::default(), false);
        pool.spawn_worker("g-0", "guardian", 1.0);
        pool.activate("g-0");
        let coordinator = SwarmCoordinator::new(pool, ConsensusConfig::default());

        let results = coordinator.run_pipeline(|_stage, _worker| (StageDecision::Allow, 0.9, "ok".into()));
        assert_eq!(results[0].decision, StageDecision::Allow);
        assert_eq!(results[1].decision, StageDecision::Indeterminate);
    }

    #[tokio::test]
    async fn consensus_reaches_allow_when_quorum_approves() {
        let coordinator = coordinator();
        let (tx, rx) = mpsc::channel(8);
        for _ in 0..3 {
            tx.send(StageVote {
                voter_id: "advisor-replica".into(),
                decision: StageDecision::Allow,
                confidence: 0.9,
                weight: 1.0,
            })
            .await
            .unwrap();
        }
        let outcome = coordinator.run_consensus(rx).await;
        assert_eq!(outcome.decision, StageDecision::Allow);
        assert_eq!(outcome.total_votes, 3);
        assert!(outcome.reached);
    }

    #[tokio::test]
    async fn consensus_times_out_with_partial_votes_and_still_produces_a_decision() {
        let mut config = ConsensusConfig::default();
        config.quorum_size = 10;
        config.timeout_ms = 50;
        let pool = WorkerPool::new(BalancingStrategy::RoundRobin, AutoScaleConfig::default(), false);
        let coordinator = SwarmCoordinator::new(pool, config);

        let (tx, rx) = mpsc::channel(8);
        for _ in 0..2 {
            tx.send(StageVote {
                voter_id: "r".into(),
                decision: StageDecision::Deny,
                confidence: 0.8,
                weight: 1.0,
            })
            .await
            .unwrap();
        }
        let outcome = coordinator.run_consensus(rx).await;
        assert_eq!(outcome.total_votes, 2);
        assert_eq!(outcome.decision, StageDecision::Deny);
        // Only 2 of the required 10 arrived before the deadline.
        assert!(!outcome.reached);
    }

    #[test]
    fn aggregate_averages_over_all_votes_not_just_ones_above_min_confidence() {
        let mut config = ConsensusConfig::default();
        config.quorum_size = 3;
        config.approval_threshold = 0.6;
        config.min_confidence = 0.5;
        let pool = WorkerPool::new(BalancingStrategy::RoundRobin, AutoScaleConfig::default(), false);
        let coordinator = SwarmCoordinator::new(pool, config);

        let votes = vec![
            StageVote { voter_id: "a".into(), decision: StageDecision::Allow, confidence: 0.9, weight: 1.0 },
            StageVote { voter_id: "b".into(), decision: StageDecision::Allow, confidence: 0.9, weight: 1.0 },
            StageVote { voter_id: "c".into(), decision: StageDecision::Deny, confidence: 0.4, weight: 1.0 },
        ];
        let outcome = coordinator.aggregate(&votes);

        assert_eq!(outcome.total_votes, 3);
        assert_eq!(outcome.approvals, 2);
        assert_eq!(outcome.rejections, 1);
        assert!((outcome.avg_confidence - 0.7333333333333333).abs() < 1e-9);
        assert!(outcome.reached);
        assert_eq!(outcome.decision, StageDecision::Allow);
    }

    #[test]
    fn weighted_aggregate_follows_the_ratio_thresholds() {
        let votes = vec![
            StageVote { voter_id: "a".into(), decision: StageDecision::Allow, confidence: 0.9, weight: 3.0 },
            StageVote { voter_id: "b".into(), decision: StageDecision::Deny, confidence: 0.5, weight: 1.0 },
        ];
        assert_eq!(SwarmCoordinator::weighted_aggregate(&votes), StageDecision::Allow);
    }

    #[test]
    fn weighted_aggregate_is_indeterminate_when_neither_threshold_is_met() {
        let votes = vec![
            StageVote { voter_id: "a".into(), decision: StageDecision::Allow, confidence: 0.5, weight: 1.0 },
            StageVote { voter_id: "b".into(), decision: StageDecision::Deny, confidence: 0.5, weight: 1.0 },
        ];
        assert_eq!(SwarmCoordinator::weighted_aggregate(&votes), StageDecision::Indeterminate);
    }
}
