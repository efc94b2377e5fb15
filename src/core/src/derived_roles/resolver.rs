//! Derived-role resolution (module D, step 2).
//!
//! Walks a `DerivedRolesPolicy`'s definitions in topological order, growing
//! the principal's effective role set as each derived role is granted so a
//! later definition may depend on an earlier one. Unlike a pattern-only
//! resolver, this one actually evaluates each definition's condition (if
//! present) against the request's activation — a definition with a falsy or
//! errored condition is simply not granted; evaluation continues.

use crate::expr::{Activation, EvalOutcome, ExprEvaluator};
use crate::policy::types::DerivedRoleDef;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::graph::{resolve_order, GraphError};

struct CachedResult {
    roles: Vec<String>,
    expires_at: Instant,
}

/// Resolves the set of derived roles in effect for a request, given a fixed
/// `DerivedRolesPolicy` document's definitions.
pub struct RoleResolver {
    definitions: Vec<DerivedRoleDef>,
    evaluation_order: Vec<String>,
    cache: DashMap<String, CachedResult>,
    cache_ttl: Duration,
}

impl RoleResolver {
    /// Build a resolver for `definitions`, rejecting cyclic dependencies.
    pub fn new(definitions: Vec<DerivedRoleDef>) -> Result<Self, GraphError> {
        let evaluation_order = resolve_order(&definitions)?;
        Ok(Self {
            definitions,
            evaluation_order,
            cache: DashMap::new(),
            cache_ttl: Duration::from_secs(5),
        })
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    fn def_by_name(&self, name: &str) -> Option<&DerivedRoleDef> {
        self.definitions.iter().find(|d| d.name == name)
    }

    fn cache_key(&self, principal_roles: &[String], activation: &Activation) -> String {
        let mut roles = principal_roles.to_vec();
        roles.sort();
        let resource_json = serde_json::to_string(&activation.resource).unwrap_or_default();
        let aux_json = serde_json::to_string(&activation.aux).unwrap_or_default();
        format!("{}|{}|{}", roles.join(","), resource_json, aux_json)
    }

    /// Compute the set of derived roles in effect, given the principal's base
    /// roles and the request's activation. Returns role names in the order
    /// they were granted (topological order, not insertion order of any
    /// caller-visible list).
    pub fn resolve(&self, principal_roles: &[String], activation: &Activation, evaluator: &ExprEvaluator) -> Vec<String> {
        let key = self.cache_key(principal_roles, activation);
        if let Some(cached) = self.cache.get(&key) {
            if cached.expires_at > Instant::now() {
                return cached.roles.clone();
            }
        }

        let mut current_roles: Vec<String> = principal_roles.to_vec();
        let mut granted: Vec<String> = Vec::new();

        for name in &self.evaluation_order {
            let Some(def) = self.def_by_name(name) else { continue };

            // A derived-role name never shadows a user-supplied role for the
            // purpose of parent-role matching.
            let parent_match = def
                .parent_roles
                .iter()
                .any(|pattern| {
                    current_roles
                        .iter()
                        .filter(|r| *r != &def.name)
                        .any(|r| crate::pattern::matches(r, pattern))
                });
            if !parent_match {
                continue;
            }

            let condition_ok = match &def.condition {
                None => true,
                Some(condition) => {
                    matches!(evaluator.evaluate(&condition.to_expr(), activation), EvalOutcome::True)
                }
            };

            if condition_ok {
                granted.push(def.name.clone());
                current_roles.push(def.name.clone());
            }
        }

        self.cache.insert(
            key,
            CachedResult {
                roles: granted.clone(),
                expires_at: Instant::now() + self.cache_ttl,
            },
        );

        granted
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }

    pub fn evaluation_order(&self) -> &[String] {
        &self.evaluation_order
    }
}

pub type SharedRoleResolver = Arc<RoleResolver>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{AttributeMap, Value};

    fn def(name: &str, parents: &[&str], condition: Option<&str>) -> DerivedRoleDef {
        DerivedRoleDef {
            name: name.to_string(),
            parent_roles: parents.iter().map(|s| s.to_string()).collect(),
            condition: condition.map(|e| crate::policy::types::Condition::Expr(e.to_string())),
        }
    }

    fn activation_with(owner: &str, caller: &str) -> Activation {
        let mut principal = AttributeMap::new();
        principal.insert("id".into(), Value::from(caller));
        let mut resource = AttributeMap::new();
        resource.insert("ownerId".into(), Value::from(owner));
        Activation::new(principal, resource, AttributeMap::new())
    }

    #[test]
    fn grants_role_with_matching_parent_and_no_condition() {
        let resolver = RoleResolver::new(vec![def("manager", &["employee"], None)]).unwrap();
        let evaluator = ExprEvaluator::new();
        let act = activation_with("x", "u1");
        let roles = resolver.resolve(&["employee".to_string()], &act, &evaluator);
        assert_eq!(roles, vec!["manager".to_string()]);
    }

    #[test]
    fn does_not_grant_role_without_matching_parent() {
        let resolver = RoleResolver::new(vec![def("manager", &["employee"], None)]).unwrap();
        let evaluator = ExprEvaluator::new();
        let act = activation_with("x", "u1");
        let roles = resolver.resolve(&["contractor".to_string()], &act, &evaluator);
        assert!(roles.is_empty());
    }

    #[test]
    fn evaluates_condition_and_grants_owner_role() {
        let resolver =
            RoleResolver::new(vec![def("owner", &["user"], Some("P.id == R.ownerId"))]).unwrap();
        let evaluator = ExprEvaluator::new();
        let act = activation_with("u2", "u2");
        let roles = resolver.resolve(&["user".to_string()], &act, &evaluator);
        assert_eq!(roles, vec!["owner".to_string()]);
    }

    #[test]
    fn false_condition_withholds_role() {
        let resolver =
            RoleResolver::new(vec![def("owner", &["user"], Some("P.id == R.ownerId"))]).unwrap();
        let evaluator = ExprEvaluator::new();
        let act = activation_with("someone_else", "u2");
        let roles = resolver.resolve(&["user".to_string()], &act, &evaluator);
        assert!(roles.is_empty());
    }

    #[test]
    fn errored_condition_withholds_role_without_panicking() {
        let resolver =
            RoleResolver::new(vec![def("owner", &["user"], Some("P.missing_field.nested"))]).unwrap();
        let evaluator = ExprEvaluator::new();
        let act = activation_with("u2", "u2");
        let roles = resolver.resolve(&["user".to_string()], &act, &evaluator);
        assert!(roles.is_empty());
    }

    #[test]
    fn chained_derived_roles_resolve_in_topological_order() {
        let resolver = RoleResolver::new(vec![
            def("senior_manager", &["manager"], None),
            def("manager", &["employee"], None),
        ])
        .unwrap();
        let evaluator = ExprEvaluator::new();
        let act = activation_with("x", "u1");
        let roles = resolver.resolve(&["employee".to_string()], &act, &evaluator);
        assert_eq!(roles, vec!["manager".to_string(), "senior_manager".to_string()]);
    }

    #[test]
    fn derived_role_name_does_not_shadow_base_role_for_self_matching() {
        // A role named "owner" whose own parent pattern is "*" must not
        // match itself once granted in the same pass (it is not in
        // `current_roles` until after the check for this definition).
        let resolver = RoleResolver::new(vec![def("owner", &["*"], None)]).unwrap();
        let evaluator = ExprEvaluator::new();
        let act = activation_with("x", "u1");
        let roles = resolver.resolve(&["user".to_string()], &act, &evaluator);
        assert_eq!(roles, vec!["owner".to_string()]);
    }
}
