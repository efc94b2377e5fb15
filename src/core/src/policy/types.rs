//! Policy document types (module B).
//!
//! These mirror the canonical wire schema in the specification: resource
//! policies, principal policy overrides, and derived-role definitions. The
//! core consumes already-parsed policy objects — YAML/JSON loading is a
//! transport-layer concern.

use crate::value::AttributeMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A caller-supplied principal for one authorization check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub attributes: AttributeMap,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
            attributes: AttributeMap::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<crate::value::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A caller-supplied resource for one authorization check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub attributes: AttributeMap,
    /// Optional dotted/colon scope narrowing the resource policy lookup.
    #[serde(default)]
    pub scope: Option<String>,
}

impl Resource {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            attributes: AttributeMap::new(),
            scope: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<crate::value::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// An action verb. Requests carry an ordered, non-empty list of these.
pub type Action = String;

/// The unit of work submitted to the decision engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub principal: Principal,
    pub resource: Resource,
    /// Ordered, non-empty.
    pub actions: Vec<Action>,
    #[serde(default)]
    pub aux_data: AttributeMap,
}

/// Per-action verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn is_allow(&self) -> bool {
        matches!(self, Effect::Allow)
    }
}

/// The decision for a single action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub effect: Effect,
    pub policy_id: String,
    pub matched_rule: String,
    pub effective_derived_roles: Vec<String>,
}

/// Metadata about how a response was produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub evaluation_duration_ms: u64,
    pub policies_evaluated: Vec<String>,
}

/// The full response to a [`CheckRequest`]: one result per requested action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResponse {
    pub request_id: String,
    pub results: BTreeMap<Action, ActionResult>,
    pub meta: ResponseMeta,
}

impl CheckResponse {
    /// Whether every requested action was allowed.
    pub fn all_allowed(&self) -> bool {
        self.results.values().all(|r| r.effect.is_allow())
    }

    pub fn effect_for(&self, action: &str) -> Option<&Effect> {
        self.results.get(action).map(|r| &r.effect)
    }
}

/// A structured condition: either a single `expr` string or a boolean tree of
/// `all`/`any`/`none` over nested conditions. The decision engine only ever
/// needs a single compiled expression string per rule, so trees are flattened
/// into an equivalent CEL expression at validation time (see `validator`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Condition {
    Expr(String),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    None(Vec<Condition>),
}

impl Condition {
    /// Flatten into a single CEL expression string.
    pub fn to_expr(&self) -> String {
        match self {
            Condition::Expr(e) => format!("({e})"),
            Condition::All(items) => join(items, " && "),
            Condition::Any(items) => join(items, " || "),
            Condition::None(items) => format!("!({})", join(items, " || ")),
        }
    }
}

fn join(items: &[Condition], sep: &str) -> String {
    if items.is_empty() {
        return "true".to_string();
    }
    items
        .iter()
        .map(Condition::to_expr)
        .collect::<Vec<_>>()
        .join(sep)
}

/// Effect used by a policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleEffect {
    Allow,
    Deny,
}

/// A single rule inside a resource or principal policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Action patterns (may contain `*`).
    pub actions: Vec<String>,
    pub effect: RuleEffect,
    /// Role filter; may contain `*` and derived-role names. `None` means the
    /// rule applies regardless of role (principal-policy rules commonly omit
    /// this).
    #[serde(default)]
    pub roles: Option<Vec<String>>,
    /// Derived role names this rule activates under, combined with `roles`
    /// using OR semantics (either list, if present, may satisfy the rule).
    #[serde(default)]
    pub derived_roles: Option<Vec<String>>,
    #[serde(default)]
    pub condition: Option<Condition>,
    /// Free-form name so `matchedRule` in responses is meaningful; falls
    /// back to a generated index-based name if absent.
    #[serde(default)]
    pub name: Option<String>,
}

impl Rule {
    pub fn display_name(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| format!("rule#{index}"))
    }

    /// Role filter is satisfied when it's absent (matches unconditionally
    /// for principal-policy rules), contains `*`, or matches any of the
    /// effective roles (base + derived).
    pub fn role_filter_satisfied(&self, effective_roles: &[String]) -> bool {
        let mut patterns: Vec<String> = Vec::new();
        if let Some(roles) = &self.roles {
            patterns.extend(roles.iter().cloned());
        }
        if let Some(derived) = &self.derived_roles {
            patterns.extend(derived.iter().cloned());
        }
        if patterns.is_empty() {
            return true;
        }
        crate::pattern::any_intersects(effective_roles, &patterns)
    }

    pub fn actions_intersect(&self, requested: &[String]) -> Vec<String> {
        requested
            .iter()
            .filter(|a| crate::pattern::matches_any(a, &self.actions))
            .cloned()
            .collect()
    }
}

/// `(resource-kind, version, scope)` identity plus an ordered rule list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePolicy {
    pub resource: String,
    pub version: String,
    #[serde(default)]
    pub scope: Option<String>,
    pub rules: Vec<Rule>,
}

impl ResourcePolicy {
    /// Identity used by the policy store: `(kind, name)`. For resource
    /// policies the "name" is `resource@version[/scope]`.
    pub fn name(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}@{}/{}", self.resource, self.version, scope),
            None => format!("{}@{}", self.resource, self.version),
        }
    }
}

/// A derived-role definition inside a `DerivedRolesPolicy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRoleDef {
    pub name: String,
    /// May contain `*`, `prefix:*`, `*:suffix` globs.
    pub parent_roles: Vec<String>,
    #[serde(default)]
    pub condition: Option<Condition>,
}

/// A named set of derived-role definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRolesPolicy {
    pub name: String,
    pub definitions: Vec<DerivedRoleDef>,
}

/// A principal-specific rule: resource-kind-scoped, no role filter (identity
/// is the principal itself).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalRule {
    pub resource: String,
    pub actions: Vec<String>,
    pub effect: RuleEffect,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub name: Option<String>,
}

impl PrincipalRule {
    pub fn display_name(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| format!("principal-rule#{index}"))
    }

    pub fn actions_intersect(&self, requested: &[String]) -> Vec<String> {
        requested
            .iter()
            .filter(|a| crate::pattern::matches_any(a, &self.actions))
            .cloned()
            .collect()
    }
}

/// A per-principal override: an ordered list of resource-kind-scoped rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalPolicy {
    pub principal: String,
    pub version: String,
    pub rules: Vec<PrincipalRule>,
}

impl PrincipalPolicy {
    pub fn name(&self) -> String {
        format!("{}@{}", self.principal, self.version)
    }
}

/// Any one of the three policy document kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PolicyKind {
    ResourcePolicy(ResourcePolicy),
    DerivedRoles(DerivedRolesPolicy),
    PrincipalPolicy(PrincipalPolicy),
}

impl PolicyKind {
    pub fn name(&self) -> String {
        match self {
            PolicyKind::ResourcePolicy(p) => p.name(),
            PolicyKind::DerivedRoles(p) => p.name.clone(),
            PolicyKind::PrincipalPolicy(p) => p.name(),
        }
    }

    /// The store's top-level kind discriminator (distinct from
    /// `ResourcePolicy.resource`, which is the *target* resource kind).
    pub fn store_kind(&self) -> &'static str {
        match self {
            PolicyKind::ResourcePolicy(_) => "ResourcePolicy",
            PolicyKind::DerivedRoles(_) => "DerivedRoles",
            PolicyKind::PrincipalPolicy(_) => "PrincipalPolicy",
        }
    }
}
