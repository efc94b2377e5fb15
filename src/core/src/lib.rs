//! Core policy model, expression adapter, and derived-role resolution.
//!
//! This crate has no I/O: it defines the types and pure functions shared by
//! the policy store, decision engine, and agentic pipeline crates.

pub mod derived_roles;
pub mod error;
pub mod expr;
pub mod pattern;
pub mod policy;
pub mod value;

pub use error::{AuthzError, EvalError, Result};
pub use expr::{Activation, EvalOutcome, ExprEvaluator};
pub use value::{AttributeMap, Value};
