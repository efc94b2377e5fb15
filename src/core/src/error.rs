//! Error taxonomy for the authorization core.
//!
//! Kinds mirror the propagation policy: `EvalError` is absorbed internally by
//! the decision engine and never surfaces to a caller as an error; the rest
//! are returned as-is.

use thiserror::Error;

/// Errors raised by the policy model, store, and decision engine.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Malformed request or policy document. Client fault, never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown policy id, action id, or similar lookup miss.
    #[error("not found: {0}")]
    NotFound(String),

    /// Concurrent update detected under a strict consistency mode.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Policy document failed schema or structural validation.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// Backend storage failure (connection, timeout, transactional abort).
    #[error("store error: {0}")]
    Store(String),

    /// Deadline exceeded before the operation completed.
    #[error("timeout")]
    Timeout,

    /// An agentic feature was requested but is not configured.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Caller canceled before completion.
    #[error("canceled")]
    Canceled,

    /// Anything that does not fit the taxonomy above.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Expression evaluation failure. Kept distinct from [`AuthzError`] because it
/// is *never* escalated to a caller: a rule whose condition errors simply does
/// not match, and evaluation continues (see decision engine failure semantics).
#[derive(Debug, Error, Clone)]
pub enum EvalError {
    #[error("expression compilation failed: {0}")]
    Compile(String),

    #[error("expression evaluation failed: {0}")]
    Evaluate(String),

    #[error("expression did not evaluate to a boolean")]
    NonBoolean,
}

pub type Result<T> = std::result::Result<T, AuthzError>;
