//! Decision engine (module D): the heart of the core.

use crate::record::{DecisionRecord, DecisionStore};
use chrono::Utc;
use sentra_core::derived_roles::RoleResolver;
use sentra_core::expr::{Activation, EvalOutcome, ExprEvaluator};
use sentra_core::policy::types::{ActionResult, CheckRequest, CheckResponse, Condition, Effect, ResponseMeta, RuleEffect};
use sentra_core::policy::PolicyKind;
use sentra_core::{AttributeMap, AuthzError, Result};
use sentra_store::{PolicyStore, StoredPolicy};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

const DEFAULT_DENY_RULE: &str = "default-deny";

pub struct DecisionEngine {
    store: PolicyStore,
    decisions: DecisionStore,
    evaluator: Arc<ExprEvaluator>,
}

impl DecisionEngine {
    pub fn new(store: PolicyStore, decisions: DecisionStore) -> Self {
        Self {
            store,
            decisions,
            evaluator: Arc::new(ExprEvaluator::new()),
        }
    }

    pub fn decisions(&self) -> &DecisionStore {
        &self.decisions
    }

    /// Evaluate a single `CheckRequest` against the current policy set.
    pub fn check(&self, request: &CheckRequest) -> Result<CheckResponse> {
        if request.actions.is_empty() {
            return Err(AuthzError::InvalidInput("actions must not be empty".into()));
        }
        if request.principal.id.trim().is_empty() {
            return Err(AuthzError::InvalidInput("principal.id must not be empty".into()));
        }

        let started = Instant::now();
        let mut policies_evaluated: Vec<String> = Vec::new();

        let activation = Activation::new(
            request.principal.attributes.clone(),
            request.resource.attributes.clone(),
            request.aux_data.clone(),
        );

        let effective_derived_roles = self.resolve_derived_roles(&request.principal.roles, &activation, &mut policies_evaluated)?;

        let mut effective_roles = request.principal.roles.clone();
        for role in &effective_derived_roles {
            if !effective_roles.contains(role) {
                effective_roles.push(role.clone());
            }
        }

        let mut remaining: Vec<String> = request.actions.clone();
        let mut results: BTreeMap<String, ActionResult> = BTreeMap::new();

        // 3. Principal override pass.
        if let Some(stored) = self.store.get_principal_policy(&request.principal.id) {
            policies_evaluated.push(stored.id.clone());
            if let PolicyKind::PrincipalPolicy(pp) = &stored.policy {
                for (i, rule) in pp.rules.iter().enumerate() {
                    if remaining.is_empty() {
                        break;
                    }
                    if rule.resource != request.resource.kind {
                        continue;
                    }
                    let intersecting = rule.actions_intersect(&remaining);
                    if intersecting.is_empty() {
                        continue;
                    }
                    if !condition_truthy(&rule.condition, &activation, &self.evaluator) {
                        continue;
                    }
                    let rule_name = rule.display_name(i);
                    for action in &intersecting {
                        results.insert(
                            action.clone(),
                            ActionResult {
                                effect: to_effect(rule.effect),
                                policy_id: stored.id.clone(),
                                matched_rule: rule_name.clone(),
                                effective_derived_roles: effective_derived_roles.clone(),
                            },
                        );
                    }
                    remaining.retain(|a| !intersecting.contains(a));
                }
            }
        }

        // 4. Resource policy pass.
        if !remaining.is_empty() {
            let candidates = self.candidate_resource_policies(&request.resource.kind, request.resource.scope.as_deref());
            for stored in &candidates {
                if remaining.is_empty() {
                    break;
                }
                policies_evaluated.push(stored.id.clone());
                let PolicyKind::ResourcePolicy(rp) = &stored.policy else { continue };
                for (i, rule) in rp.rules.iter().enumerate() {
                    if remaining.is_empty() {
                        break;
                    }
                    let intersecting = rule.actions_intersect(&remaining);
                    if intersecting.is_empty() {
                        continue;
                    }
                    if !rule.role_filter_satisfied(&effective_roles) {
                        continue;
                    }
                    if !condition_truthy(&rule.condition, &activation, &self.evaluator) {
                        continue;
                    }
                    let rule_name = rule.display_name(i);
                    for action in &intersecting {
                        results.insert(
                            action.clone(),
                            ActionResult {
                                effect: to_effect(rule.effect),
                                policy_id: stored.id.clone(),
                                matched_rule: rule_name.clone(),
                                effective_derived_roles: effective_derived_roles.clone(),
                            },
                        );
                    }
                    remaining.retain(|a| !intersecting.contains(a));
                }
            }
        }

        // 5. Default deny for anything still undecided.
        for action in &remaining {
            results.insert(
                action.clone(),
                ActionResult {
                    effect: Effect::Deny,
                    policy_id: "none".to_string(),
                    matched_rule: DEFAULT_DENY_RULE.to_string(),
                    effective_derived_roles: effective_derived_roles.clone(),
                },
            );
        }

        let response = CheckResponse {
            request_id: Uuid::new_v4().to_string(),
            results,
            meta: ResponseMeta {
                evaluation_duration_ms: started.elapsed().as_millis() as u64,
                policies_evaluated,
            },
        };

        self.decisions.append(DecisionRecord {
            id: Uuid::new_v4().to_string(),
            principal_id: request.principal.id.clone(),
            resource_kind: request.resource.kind.clone(),
            request: request.clone(),
            response: response.clone(),
            matched_rule: response.results.values().next().map(|r| r.matched_rule.clone()),
            derived_roles: effective_derived_roles,
            anomaly_score: None,
            created_at: Utc::now(),
        });

        Ok(response)
    }

    /// Evaluate the same principal against several `(resource, actions)`
    /// pairs independently, under the same tenant/expression context.
    pub fn check_batch(&self, principal: &sentra_core::policy::types::Principal, requests: &[(sentra_core::policy::types::Resource, Vec<String>)], aux_data: &AttributeMap) -> Vec<Result<CheckResponse>> {
        requests
            .iter()
            .map(|(resource, actions)| {
                let req = CheckRequest {
                    principal: principal.clone(),
                    resource: resource.clone(),
                    actions: actions.clone(),
                    aux_data: aux_data.clone(),
                };
                self.check(&req)
            })
            .collect()
    }

    fn candidate_resource_policies(&self, kind: &str, scope: Option<&str>) -> Vec<StoredPolicy> {
        self.store
            .get_policies_for_resource(kind)
            .into_iter()
            .filter(|p| match &p.policy {
                PolicyKind::ResourcePolicy(rp) => rp.scope.as_deref() == scope,
                _ => false,
            })
            .collect()
    }

    /// Merge every enabled `DerivedRolesPolicy` document's definitions and
    /// resolve against the combined graph. A cross-document cycle (each
    /// document is acyclic on its own per `validate_policy`, but the merged
    /// set need not be) is an engine error, not a silent "no derived roles" —
    /// an invalid derived-role graph must never be treated as equivalent to
    /// an empty one.
    fn resolve_derived_roles(&self, principal_roles: &[String], activation: &Activation, policies_evaluated: &mut Vec<String>) -> Result<Vec<String>> {
        let docs = self.store.get_derived_roles();
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let mut definitions = Vec::new();
        for doc in &docs {
            policies_evaluated.push(doc.id.clone());
            if let PolicyKind::DerivedRoles(drp) = &doc.policy {
                definitions.extend(drp.definitions.iter().cloned());
            }
        }

        let resolver = RoleResolver::new(definitions)
            .map_err(|e| AuthzError::InvalidPolicy(format!("derived-role graph across enabled policies is invalid: {e}")))?;
        Ok(resolver.resolve(principal_roles, activation, &self.evaluator))
    }
}

fn condition_truthy(condition: &Option<Condition>, activation: &Activation, evaluator: &ExprEvaluator) -> bool {
    match condition {
        None => true,
        Some(condition) => matches!(evaluator.evaluate(&condition.to_expr(), activation), EvalOutcome::True),
    }
}

fn to_effect(effect: RuleEffect) -> Effect {
    match effect {
        RuleEffect::Allow => Effect::Allow,
        RuleEffect::Deny => Effect::Deny,
    }
}
