// Workflow domain module
// Contains the workflow aggregate root, its subtasks, and plan value objects

#![allow(clippy::module_inception)]

pub mod value_objects;
pub mod workflow;

// Re-export main types for convenience
pub use value_objects::{PlanStep, SubtaskStatus, WorkerProfile, WorkflowStatus};
pub use workflow::{Subtask, Workflow};
