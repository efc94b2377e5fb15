//! Payload types carried over the agentic event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event raised by one of the four pipeline agents (Guardian, Analyst,
/// Advisor, Enforcer) for consumption by the orchestrator or other
/// observers. The payload is left as `serde_json::Value` since each agent's
/// event shapes differ and this bus is transport-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AgentEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}
