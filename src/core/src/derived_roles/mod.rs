//! Derived-role dependency graph and resolution (module B/D).

pub mod graph;
pub mod resolver;

pub use graph::{resolve_order, GraphError};
pub use resolver::{RoleResolver, SharedRoleResolver};
