//! Advisor: the decision explainer (module I).
//!
//! Turns a `CheckResponse` plus the request/derived-roles/anomaly context
//! that produced it into a structured `Explanation`. Natural-language text
//! generation is delegated to a `TextExplainer`; the default `NoopTextExplainer`
//! leaves `natural_language` empty rather than fabricating prose.

use crate::types::{Explanation, ExplanationFactor, NoopTextExplainer, PathToAllow, TextExplainer};
use sentra_core::policy::types::{CheckRequest, CheckResponse, Effect};
use std::sync::Arc;

pub struct Advisor {
    text_explainer: Arc<dyn TextExplainer>,
}

impl Advisor {
    pub fn new(text_explainer: Arc<dyn TextExplainer>) -> Self {
        Self { text_explainer }
    }

    pub async fn explain(&self, request: &CheckRequest, response: &CheckResponse, derived_roles: &[String], policy_context: Option<&serde_json::Value>) -> Explanation {
        let mut factors = Vec::new();

        if let Some(context) = policy_context {
            factors.push(ExplanationFactor {
                factor_type: "policy_context".into(),
                description: format!("caller-supplied context considered: {context}"),
                impact: "contextual".into(),
            });
        }

        if !derived_roles.is_empty() {
            factors.push(ExplanationFactor {
                factor_type: "derived_role".into(),
                description: format!("activated derived role(s): {}", derived_roles.join(", ")),
                impact: "enabling".into(),
            });
        }

        if request.principal.roles.is_empty() {
            factors.push(ExplanationFactor {
                factor_type: "base_role".into(),
                description: "principal carries no base roles".into(),
                impact: "limiting".into(),
            });
        } else {
            factors.push(ExplanationFactor {
                factor_type: "base_role".into(),
                description: format!("base role(s): {}", request.principal.roles.join(", ")),
                impact: "contextual".into(),
            });
        }

        let denied: Vec<&str> = response
            .results
            .iter()
            .filter(|(_, r)| !r.effect.is_allow())
            .map(|(action, _)| action.as_str())
            .collect();

        for (action, result) in &response.results {
            factors.push(ExplanationFactor {
                factor_type: "matched_rule".into(),
                description: format!("action '{action}' matched rule '{}' from policy '{}'", result.matched_rule, result.policy_id),
                impact: if result.effect.is_allow() { "enabling".into() } else { "blocking".into() },
            });
        }

        let summary = if response.all_allowed() {
            format!("all requested actions allowed for principal '{}'", request.principal.id)
        } else {
            format!(
                "{} of {} requested action(s) denied for principal '{}': {}",
                denied.len(),
                response.results.len(),
                request.principal.id,
                denied.join(", ")
            )
        };

        let path_to_allow = if denied.is_empty() {
            None
        } else {
            Some(self.build_path_to_allow(request, response, derived_roles))
        };

        let structured = Explanation {
            summary,
            factors,
            natural_language: String::new(),
            path_to_allow,
        };

        let natural_language = self.text_explainer.explain(&structured).await.unwrap_or_default();

        Explanation { natural_language, ..structured }
    }

    fn build_path_to_allow(&self, request: &CheckRequest, response: &CheckResponse, derived_roles: &[String]) -> PathToAllow {
        let mut path = PathToAllow::default();

        for (action, result) in &response.results {
            if result.effect == Effect::Allow {
                continue;
            }
            if result.matched_rule == "default-deny" {
                path.missing_roles.push(format!("a role authorized for action '{action}' on '{}'", request.resource.kind));
            }
            if result.effective_derived_roles.is_empty() && derived_roles.is_empty() {
                path.suggested_actions.push(format!(
                    "check whether a derived role should grant '{action}' on this resource"
                ));
            }
        }

        path
    }
}

impl Default for Advisor {
    fn default() -> Self {
        Self::new(Arc::new(NoopTextExplainer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_core::policy::types::{ActionResult, Principal, Resource, ResponseMeta};
    use std::collections::BTreeMap;

    fn response(action: &str, effect: Effect, matched_rule: &str, derived_roles: Vec<String>) -> CheckResponse {
        let mut results = BTreeMap::new();
        results.insert(
            action.to_string(),
            ActionResult {
                effect,
                policy_id: "p1".into(),
                matched_rule: matched_rule.into(),
                effective_derived_roles: derived_roles,
            },
        );
        CheckResponse {
            request_id: "req1".into(),
            results,
            meta: ResponseMeta::default(),
        }
    }

    fn request() -> CheckRequest {
        CheckRequest {
            principal: Principal::new("u1").with_role("viewer"),
            resource: Resource::new("document", "r1"),
            actions: vec!["read".into()],
            aux_data: Default::default(),
        }
    }

    #[tokio::test]
    async fn allow_summary_names_no_denials() {
        let advisor = Advisor::default();
        let resp = response("read", Effect::Allow, "rule#0", vec![]);
        let explanation = advisor.explain(&request(), &resp, &[], None).await;
        assert!(explanation.summary.contains("all requested actions allowed"));
        assert!(explanation.path_to_allow.is_none());
    }

    #[tokio::test]
    async fn deny_summary_includes_path_to_allow() {
        let advisor = Advisor::default();
        let resp = response("read", Effect::Deny, "default-deny", vec![]);
        let explanation = advisor.explain(&request(), &resp, &[], None).await;
        assert!(explanation.summary.contains("denied"));
        assert!(explanation.path_to_allow.is_some());
    }

    #[tokio::test]
    async fn derived_role_factor_present_when_role_contributed() {
        let advisor = Advisor::default();
        let resp = response("write", Effect::Allow, "rule#0", vec!["owner".into()]);
        let explanation = advisor.explain(&request(), &resp, &["owner".to_string()], None).await;
        assert!(explanation
            .factors
            .iter()
            .any(|f| f.factor_type == "derived_role" && f.description.contains("owner")));
    }

    #[tokio::test]
    async fn policy_context_surfaces_as_a_factor_when_supplied() {
        let advisor = Advisor::default();
        let resp = response("read", Effect::Allow, "rule#0", vec![]);
        let context = serde_json::json!({"requestSource": "mobile-app"});
        let explanation = advisor.explain(&request(), &resp, &[], Some(&context)).await;
        assert!(explanation.factors.iter().any(|f| f.factor_type == "policy_context"));
    }

    #[tokio::test]
    async fn noop_explainer_leaves_natural_language_empty() {
        let advisor = Advisor::default();
        let resp = response("read", Effect::Allow, "rule#0", vec![]);
        let explanation = advisor.explain(&request(), &resp, &[], None).await;
        assert!(explanation.natural_language.is_empty());
    }
}
