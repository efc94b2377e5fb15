//! Decision engine (module D) and decision record & query log (module E).

pub mod engine;
pub mod record;

pub use engine::DecisionEngine;
pub use record::{DecisionRecord, DecisionStore, PrincipalStats};

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_core::error::AuthzError;
    use sentra_core::policy::types::{CheckRequest, Principal, Resource, Rule, RuleEffect};
    use sentra_core::policy::{Condition, DerivedRoleDef, DerivedRolesPolicy, PolicyKind, ResourcePolicy};
    use sentra_store::PolicyStore;

    fn put_resource_policy(store: &PolicyStore, resource: &str, rules: Vec<Rule>) {
        store
            .put(
                PolicyKind::ResourcePolicy(ResourcePolicy {
                    resource: resource.to_string(),
                    version: "default".to_string(),
                    scope: None,
                    rules,
                }),
                None,
                Default::default(),
            )
            .unwrap();
    }

    #[test]
    fn s1_viewer_read_is_allowed() {
        let store = PolicyStore::new();
        put_resource_policy(
            &store,
            "document",
            vec![Rule {
                actions: vec!["read".into()],
                effect: RuleEffect::Allow,
                roles: Some(vec!["viewer".into()]),
                derived_roles: None,
                condition: None,
                name: None,
            }],
        );
        let engine = DecisionEngine::new(store, DecisionStore::new());

        let request = CheckRequest {
            principal: Principal::new("u1").with_role("viewer"),
            resource: Resource::new("document", "d1"),
            actions: vec!["read".to_string()],
            aux_data: Default::default(),
        };
        let response = engine.check(&request).unwrap();
        assert!(response.effect_for("read").unwrap().is_allow());
    }

    #[test]
    fn s2_undecided_action_defaults_to_deny() {
        let store = PolicyStore::new();
        put_resource_policy(
            &store,
            "document",
            vec![Rule {
                actions: vec!["read".into()],
                effect: RuleEffect::Allow,
                roles: Some(vec!["viewer".into()]),
                derived_roles: None,
                condition: None,
                name: None,
            }],
        );
        let engine = DecisionEngine::new(store, DecisionStore::new());

        let request = CheckRequest {
            principal: Principal::new("u1").with_role("viewer"),
            resource: Resource::new("document", "d1"),
            actions: vec!["delete".to_string()],
            aux_data: Default::default(),
        };
        let response = engine.check(&request).unwrap();
        assert!(!response.effect_for("delete").unwrap().is_allow());
        assert_eq!(response.results.get("delete").unwrap().matched_rule, "default-deny");
    }

    #[test]
    fn s3_owner_derived_role_grants_write() {
        let store = PolicyStore::new();
        store
            .put(
                PolicyKind::DerivedRoles(DerivedRolesPolicy {
                    name: "common_roles".into(),
                    definitions: vec![DerivedRoleDef {
                        name: "owner".into(),
                        parent_roles: vec!["user".into()],
                        condition: Some(Condition::Expr("R.ownerId == P.id".into())),
                    }],
                }),
                None,
                Default::default(),
            )
            .unwrap();
        put_resource_policy(
            &store,
            "doc",
            vec![Rule {
                actions: vec!["write".into()],
                effect: RuleEffect::Allow,
                roles: None,
                derived_roles: Some(vec!["owner".into()]),
                condition: None,
                name: None,
            }],
        );
        let engine = DecisionEngine::new(store, DecisionStore::new());

        let request = CheckRequest {
            principal: Principal::new("u2").with_role("user"),
            resource: Resource::new("doc", "d2").with_attribute("ownerId", "u2"),
            actions: vec!["write".to_string()],
            aux_data: Default::default(),
        };
        let response = engine.check(&request).unwrap();
        let result = response.results.get("write").unwrap();
        assert!(result.effect.is_allow());
        assert!(result.effective_derived_roles.contains(&"owner".to_string()));
    }

    #[test]
    fn no_applicable_policy_denies_with_default_deny() {
        let store = PolicyStore::new();
        let engine = DecisionEngine::new(store, DecisionStore::new());

        let request = CheckRequest {
            principal: Principal::new("u1").with_role("viewer"),
            resource: Resource::new("widget", "w1"),
            actions: vec!["read".to_string()],
            aux_data: Default::default(),
        };
        let response = engine.check(&request).unwrap();
        assert_eq!(response.results.get("read").unwrap().matched_rule, "default-deny");
    }

    #[test]
    fn erroring_condition_falls_through_to_next_rule() {
        let store = PolicyStore::new();
        put_resource_policy(
            &store,
            "document",
            vec![
                Rule {
                    actions: vec!["read".into()],
                    effect: RuleEffect::Deny,
                    roles: Some(vec!["viewer".into()]),
                    derived_roles: None,
                    condition: Some(Condition::Expr("P.missing.nested".into())),
                    name: Some("bad-condition".into()),
                },
                Rule {
                    actions: vec!["read".into()],
                    effect: RuleEffect::Allow,
                    roles: Some(vec!["viewer".into()]),
                    derived_roles: None,
                    condition: None,
                    name: Some("fallback-allow".into()),
                },
            ],
        );
        let engine = DecisionEngine::new(store, DecisionStore::new());

        let request = CheckRequest {
            principal: Principal::new("u1").with_role("viewer"),
            resource: Resource::new("document", "d1"),
            actions: vec!["read".to_string()],
            aux_data: Default::default(),
        };
        let response = engine.check(&request).unwrap();
        let result = response.results.get("read").unwrap();
        assert!(result.effect.is_allow());
        assert_eq!(result.matched_rule, "fallback-allow");
    }

    #[test]
    fn decision_records_are_appended_per_check() {
        let store = PolicyStore::new();
        put_resource_policy(
            &store,
            "document",
            vec![Rule {
                actions: vec!["read".into()],
                effect: RuleEffect::Allow,
                roles: Some(vec!["viewer".into()]),
                derived_roles: None,
                condition: None,
                name: None,
            }],
        );
        let decisions = DecisionStore::new();
        let engine = DecisionEngine::new(store, decisions.clone());

        let request = CheckRequest {
            principal: Principal::new("u1").with_role("viewer"),
            resource: Resource::new("document", "d1"),
            actions: vec!["read".to_string()],
            aux_data: Default::default(),
        };
        engine.check(&request).unwrap();
        assert_eq!(decisions.query_by_principal("u1", None).len(), 1);
    }

    #[test]
    fn cross_document_derived_role_cycle_is_an_engine_error_not_an_empty_result() {
        let store = PolicyStore::new();
        // Each document is acyclic by itself (and so passes `validate_policy`
        // independently) but the two together form role_a -> role_b -> role_a.
        store
            .put(
                PolicyKind::DerivedRoles(DerivedRolesPolicy {
                    name: "doc1".into(),
                    definitions: vec![DerivedRoleDef {
                        name: "role_a".into(),
                        parent_roles: vec!["role_b".into()],
                        condition: None,
                    }],
                }),
                None,
                Default::default(),
            )
            .unwrap();
        store
            .put(
                PolicyKind::DerivedRoles(DerivedRolesPolicy {
                    name: "doc2".into(),
                    definitions: vec![DerivedRoleDef {
                        name: "role_b".into(),
                        parent_roles: vec!["role_a".into()],
                        condition: None,
                    }],
                }),
                None,
                Default::default(),
            )
            .unwrap();
        put_resource_policy(
            &store,
            "document",
            vec![Rule {
                actions: vec!["read".into()],
                effect: RuleEffect::Allow,
                roles: None,
                derived_roles: Some(vec!["role_a".into()]),
                condition: None,
                name: None,
            }],
        );
        let engine = DecisionEngine::new(store, DecisionStore::new());

        let request = CheckRequest {
            principal: Principal::new("u1").with_role("employee"),
            resource: Resource::new("document", "d1"),
            actions: vec!["read".to_string()],
            aux_data: Default::default(),
        };
        match engine.check(&request) {
            Err(AuthzError::InvalidPolicy(msg)) => {
                assert!(msg.contains("role_a") || msg.contains("role_b") || msg.to_lowercase().contains("cycle") || msg.to_lowercase().contains("circular"));
            }
            other => panic!("expected AuthzError::InvalidPolicy, got {other:?}"),
        }
    }
}
