pub mod events;
pub mod orchestrator;
pub mod session;

pub use events::{CallEvent, EventBus, EventSubscription};
pub use orchestrator::CallOrchestrator;
pub use session::{CallSession, CallStatus};
