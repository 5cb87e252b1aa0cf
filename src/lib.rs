//! Conclave API Library
//!
//! Agent fleet engine: agent lifecycle, single-flight task scheduling and
//! planner-driven workflows, with SQLite persistence, a Claude CLI model
//! adapter and an HTTP surface.

pub mod api;
pub mod config;
pub mod domain;
pub mod engine;
pub mod infrastructure;
