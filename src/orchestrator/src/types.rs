//! Result types for the end-to-end agentic pipeline.

use sentra_agents::{Anomaly, EnforcerAction, Explanation};
use sentra_core::policy::types::CheckResponse;
use serde::{Deserialize, Serialize};

/// The merged result of running a request through the full pipeline:
/// core authorization plus whatever the agentic stage produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticCheckResponse {
    pub response: CheckResponse,
    pub anomaly: Option<Anomaly>,
    pub enforcer_action: Option<EnforcerAction>,
    pub explanation: Option<Explanation>,
    pub agents_involved: Vec<String>,
    pub processing_time_ms: u64,
}
