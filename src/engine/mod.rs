// Engine modules
//
// Agent registry, task scheduler with its dispatch loop, workflow
// orchestrator and per-agent log store, tied together by the Engine facade.

#![allow(clippy::module_inception)]

pub mod engine;
pub mod errors;
pub mod events;
pub mod invoker;
pub mod log_store;
pub mod orchestrator;
pub mod plan;
pub mod presets;
pub mod prompts;
pub mod registry;
pub mod scheduler;

// Re-export main types
pub use engine::{Engine, EngineSettings};
pub use errors::{EngineError, EngineResult, ErrorKind};
pub use events::{ProgressHook, WorkflowProgress};
pub use invoker::{
    InvocationError, InvocationOutput, InvocationRequest, ModelInvoker, ProgressEvent,
    ProgressSender,
};
pub use orchestrator::WorkflowResult;
