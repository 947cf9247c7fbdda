//! Per-user voice sessions
//!
//! A [`SessionOrchestrator`] drives one user's pipeline on its own thread;
//! the [`SessionLifecycleManager`] owns the registry of those threads.

mod manager;
mod orchestrator;
mod signals;

pub use manager::{DEFAULT_STOP_TIMEOUT, SessionLifecycleManager, SessionStatus};
pub use orchestrator::{PipelineServices, SessionConfig, SessionOrchestrator, SessionState, UserSession};
pub use signals::SessionSignals;
