//! Sequential agentic pipeline orchestration (module K).

pub mod pipeline;
pub mod types;

pub use pipeline::AgentOrchestrator;
pub use types::AgenticCheckResponse;
