// Infrastructure layer module
// Contains persistence adapters and the model invocation adapter
// Follows Hexagonal Architecture

pub mod invokers;
pub mod repositories;
