//! The agent orchestrator (module K).
//!
//! Owns the four pipeline agents directly and drives them through a fixed
//! sequence per request. Agents never hold references back to the
//! orchestrator or to each other — outbound events are the only channel an
//! agent has to the rest of the system, which avoids the cyclic
//! orchestrator/agent reference pattern.

use crate::types::AgenticCheckResponse;
use sentra_agents::{recommended_action_type, severity_priority, Advisor, Analyst, Enforcer, EnforcerActionTrigger, Guardian, LearnedPattern, Severity};
use sentra_core::policy::types::{ActionResult, CheckRequest, Effect};
use sentra_engine::DecisionEngine;
use sentra_eventbus::{AgentEvent, AgentEventBus};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

pub struct AgentOrchestrator {
    engine: DecisionEngine,
    guardian: Arc<Guardian>,
    analyst: Arc<Analyst>,
    advisor: Arc<Advisor>,
    enforcer: Arc<Enforcer>,
    events: AgentEventBus,
}

impl AgentOrchestrator {
    pub fn new(
        engine: DecisionEngine,
        guardian: Arc<Guardian>,
        analyst: Arc<Analyst>,
        advisor: Arc<Advisor>,
        enforcer: Arc<Enforcer>,
        events: AgentEventBus,
    ) -> Self {
        Self {
            engine,
            guardian,
            analyst,
            advisor,
            enforcer,
            events,
        }
    }

    pub fn analyst(&self) -> &Arc<Analyst> {
        &self.analyst
    }

    pub fn discover_patterns(&self, principal_id: &str) -> Vec<LearnedPattern> {
        self.analyst.discover_patterns(principal_id)
    }

    /// Runs the full pipeline: Enforcer pre-gate, core authorization,
    /// Guardian anomaly scoring, conditional enforcement, and optional
    /// explanation. `include_explanation` and `policy_context` are caller
    /// toggles, not inferred from the decision outcome: a caller that wants
    /// Advisor's explanation asks for it explicitly, and may hand it extra
    /// context to factor in.
    pub async fn process_request(&self, request: &CheckRequest, include_explanation: bool, policy_context: Option<&serde_json::Value>) -> AgenticCheckResponse {
        let started = Instant::now();
        let mut agents_involved = Vec::new();

        agents_involved.push("enforcer".to_string());
        let gate = self.enforcer.check(&request.principal.id);

        if !gate.allowed {
            let response = blocked_response(request, gate.reason.as_deref().unwrap_or("enforcer:blocked"));
            self.emit("enforcement.blocked", &request.principal.id, &gate.reason);
            return AgenticCheckResponse {
                response,
                anomaly: None,
                enforcer_action: None,
                explanation: None,
                agents_involved,
                processing_time_ms: started.elapsed().as_millis() as u64,
            };
        }

        let response = match self.engine.check(request) {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(error = %err, "decision engine failed during agentic pipeline");
                blocked_response(request, "engine-error")
            }
        };

        agents_involved.push("guardian".to_string());
        let guardian_result = self.guardian.analyze_request(request);

        let mut enforcer_action = None;
        if let Some(anomaly) = &guardian_result.anomaly {
            if anomaly.severity == Severity::Critical {
                agents_involved.push("enforcer".to_string());
                let action = self.enforcer.trigger_enforcement(
                    recommended_action_type(anomaly),
                    &anomaly.principal_id,
                    severity_priority(anomaly.severity),
                    EnforcerActionTrigger {
                        agent_type: "guardian".into(),
                        reason: format!("{:?} anomaly at score {:.2}", anomaly.anomaly_type, anomaly.score),
                        related_ids: vec![anomaly.id.clone()],
                    },
                );
                self.emit("enforcement.triggered", &request.principal.id, &Some(action.id.clone()));
                enforcer_action = Some(action);
            }
        }

        let explanation = if include_explanation {
            agents_involved.push("advisor".to_string());
            let derived_roles: Vec<String> = response
                .results
                .values()
                .flat_map(|r| r.effective_derived_roles.clone())
                .collect();
            Some(self.advisor.explain(request, &response, &derived_roles, policy_context).await)
        } else {
            None
        };

        AgenticCheckResponse {
            response,
            anomaly: guardian_result.anomaly,
            enforcer_action,
            explanation,
            agents_involved,
            processing_time_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn emit(&self, event_type: &str, principal_id: &str, detail: &Option<String>) {
        let payload = serde_json::json!({
            "principalId": principal_id,
            "detail": detail,
        });
        self.events.publish(AgentEvent::new(event_type, payload));
    }
}

fn blocked_response(request: &CheckRequest, matched_rule: &str) -> sentra_core::policy::types::CheckResponse {
    let mut results = BTreeMap::new();
    for action in &request.actions {
        results.insert(
            action.clone(),
            ActionResult {
                effect: Effect::Deny,
                policy_id: "none".into(),
                matched_rule: matched_rule.to_string(),
                effective_derived_roles: Vec::new(),
            },
        );
    }
    sentra_core::policy::types::CheckResponse {
        request_id: uuid::Uuid::new_v4().to_string(),
        results,
        meta: Default::default(),
    }
}
