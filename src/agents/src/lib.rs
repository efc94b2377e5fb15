//! The agentic pipeline: Guardian, Analyst, Advisor, and Enforcer.

pub mod advisor;
pub mod analyst;
pub mod enforcer;
pub mod guardian;
pub mod types;

pub use advisor::Advisor;
pub use analyst::{Analyst, AnalystConfig};
pub use enforcer::{
    recommended_action_type, severity_priority, Enforcer, EnforcerCheckResult, EnforcerConfig, EnforcerError,
};
pub use guardian::{AnomalyStore, ChannelWeights, Guardian, GuardianConfig, GuardianJobs, GuardianResult};
pub use types::{
    Anomaly, AnomalyStatus, AnomalyType, Baseline, EnforcerAction, EnforcerActionStatus, EnforcerActionTrigger,
    EnforcerActionType, Explanation, ExplanationFactor, LearnedPattern, NoopTextExplainer, PathToAllow, RiskFactor,
    Severity, TextExplainer,
};
