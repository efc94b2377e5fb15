//! Typed in-process event bus (module F).

pub mod bus;
pub mod events;
pub mod queue;

pub use bus::{EventBus, Subscription};
pub use events::AgentEvent;

/// The bus type used to fan agent-produced events out to observers.
pub type AgentEventBus = EventBus<AgentEvent>;
