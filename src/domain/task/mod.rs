// Task domain module
// Contains the task aggregate root and its status value object

#![allow(clippy::module_inception)]

pub mod task;
pub mod value_objects;

// Re-export main types for convenience
pub use task::Task;
pub use value_objects::TaskStatus;
