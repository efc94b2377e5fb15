//! Policy document model and validation (module B).

pub mod types;
pub mod validator;

pub use types::{
    Action, ActionResult, CheckRequest, CheckResponse, Condition, DerivedRoleDef,
    DerivedRolesPolicy, Effect, Principal, PolicyKind, PrincipalPolicy, PrincipalRule, Resource,
    ResourcePolicy, ResponseMeta, Rule, RuleEffect,
};
pub use validator::{validate_policy, ValidationError};
