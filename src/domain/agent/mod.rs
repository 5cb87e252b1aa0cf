// Agent domain module
// Contains agent configuration, runtime state machine, value objects, and domain events

#![allow(clippy::module_inception)]

pub mod agent;
pub mod events;
pub mod value_objects;

// Re-export main types for convenience
pub use agent::{AgentConfig, AgentRecord, AgentRuntimeState, AgentSpec};
pub use events::AgentEvent;
pub use value_objects::{AgentStatus, Capability, ExternalModel, PermissionMode};
