//! Schema and structural validation for policy documents (module B).

use super::types::{Condition, PolicyKind, Rule, RuleEffect};
use thiserror::Error;

const MAX_PARENT_ROLES: usize = 50;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("{field}: {reason}")]
    Field { field: String, reason: String },
    #[error("derived-role dependency graph contains a cycle: {0}")]
    Cycle(String),
}

fn field_err(field: impl Into<String>, reason: impl Into<String>) -> ValidationError {
    ValidationError::Field {
        field: field.into(),
        reason: reason.into(),
    }
}

/// Validate a single policy document. Does not consult the store, so it
/// cannot detect cross-policy derived-role cycles — only cycles within one
/// `DerivedRolesPolicy` document's own definitions. A cycle formed only once
/// multiple documents are merged is caught later, when the decision engine
/// builds the combined resolver for a `check()` call.
pub fn validate_policy(policy: &PolicyKind) -> Result<(), ValidationError> {
    match policy {
        PolicyKind::ResourcePolicy(p) => {
            if p.resource.trim().is_empty() {
                return Err(field_err("resource", "must not be empty"));
            }
            if p.version.trim().is_empty() {
                return Err(field_err("version", "must not be empty"));
            }
            if p.rules.is_empty() {
                return Err(field_err("rules", "must contain at least one rule"));
            }
            for (i, rule) in p.rules.iter().enumerate() {
                validate_rule(rule, i)?;
            }
            Ok(())
        }
        PolicyKind::PrincipalPolicy(p) => {
            if p.principal.trim().is_empty() {
                return Err(field_err("principal", "must not be empty"));
            }
            if p.version.trim().is_empty() {
                return Err(field_err("version", "must not be empty"));
            }
            for (i, rule) in p.rules.iter().enumerate() {
                if rule.resource.trim().is_empty() {
                    return Err(field_err(format!("rules[{i}].resource"), "must not be empty"));
                }
                if rule.actions.is_empty() {
                    return Err(field_err(
                        format!("rules[{i}].actions"),
                        "must contain at least one action",
                    ));
                }
                if let Some(cond) = &rule.condition {
                    validate_condition(cond, &format!("rules[{i}].condition"))?;
                }
            }
            Ok(())
        }
        PolicyKind::DerivedRoles(p) => {
            if p.name.trim().is_empty() {
                return Err(field_err("name", "must not be empty"));
            }
            if p.definitions.is_empty() {
                return Err(field_err("definitions", "must contain at least one derived role"));
            }
            let mut seen = std::collections::HashSet::new();
            for (i, def) in p.definitions.iter().enumerate() {
                if def.name.trim().is_empty() {
                    return Err(field_err(format!("definitions[{i}].name"), "must not be empty"));
                }
                if !seen.insert(def.name.clone()) {
                    return Err(field_err(
                        format!("definitions[{i}].name"),
                        format!("duplicate derived role name '{}'", def.name),
                    ));
                }
                if def.parent_roles.is_empty() || def.parent_roles.len() > MAX_PARENT_ROLES {
                    return Err(field_err(
                        format!("definitions[{i}].parentRoles"),
                        format!("must contain between 1 and {MAX_PARENT_ROLES} entries"),
                    ));
                }
                // A derived role never self-references via its own name among
                // its parent roles (prevents trivial self-cycles).
                if def.parent_roles.iter().any(|p| p == &def.name) {
                    return Err(field_err(
                        format!("definitions[{i}].parentRoles"),
                        "must not reference its own derived-role name",
                    ));
                }
                if let Some(cond) = &def.condition {
                    validate_condition(cond, &format!("definitions[{i}].condition"))?;
                }
            }
            crate::derived_roles::graph::resolve_order(&p.definitions)
                .map_err(|e| ValidationError::Cycle(e.to_string()))?;
            Ok(())
        }
    }
}

fn validate_rule(rule: &Rule, index: usize) -> Result<(), ValidationError> {
    if rule.actions.is_empty() {
        return Err(field_err(
            format!("rules[{index}].actions"),
            "must contain at least one action",
        ));
    }
    for action in &rule.actions {
        if action.trim().is_empty() {
            return Err(field_err(
                format!("rules[{index}].actions"),
                "action names must not be empty",
            ));
        }
    }
    match rule.effect {
        RuleEffect::Allow | RuleEffect::Deny => {}
    }
    if let Some(roles) = &rule.roles {
        if roles.is_empty() {
            return Err(field_err(
                format!("rules[{index}].roles"),
                "when present must contain at least one role",
            ));
        }
    }
    if let Some(derived) = &rule.derived_roles {
        if derived.is_empty() {
            return Err(field_err(
                format!("rules[{index}].derivedRoles"),
                "when present must contain at least one derived role",
            ));
        }
    }
    if let Some(cond) = &rule.condition {
        validate_condition(cond, &format!("rules[{index}].condition"))?;
    }
    Ok(())
}

fn validate_condition(condition: &Condition, field: &str) -> Result<(), ValidationError> {
    match condition {
        Condition::Expr(e) => {
            if e.trim().is_empty() {
                return Err(field_err(field, "expr must not be empty"));
            }
            Ok(())
        }
        Condition::All(items) | Condition::Any(items) | Condition::None(items) => {
            if items.is_empty() {
                return Err(field_err(field, "boolean combinator must contain at least one child"));
            }
            for (i, child) in items.iter().enumerate() {
                validate_condition(child, &format!("{field}[{i}]"))?;
            }
            Ok(())
        }
    }
}
