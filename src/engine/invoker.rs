//! Port to the model invocation service
//!
//! The engine only schedules invocations and records their outcome. The
//! actual call to a language model lives behind [`ModelInvoker`].

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::agent::AgentConfig;

/// One prompt sent on behalf of one agent
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub task_id: Uuid,
    pub config: Arc<AgentConfig>,
    pub prompt: String,
    /// Opaque token returned by an earlier invocation of the same agent
    pub session_id: Option<String>,
}

/// Successful invocation outcome
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOutput {
    pub text: String,
    pub session_id: Option<String>,
    pub cost_usd: Option<Decimal>,
    pub turns_used: Option<u32>,
}

impl InvocationOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_id: None,
            cost_usd: None,
            turns_used: None,
        }
    }
}

/// Errors reported by the model invocation service
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvocationError {
    #[error("Model service unavailable: {0}")]
    Unavailable(String),

    #[error("Model returned an error: {0}")]
    Model(String),

    #[error("Malformed model response: {0}")]
    Malformed(String),
}

/// Incremental progress of an in-flight invocation
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Service-side session started
    Session(String),
    /// Assistant produced text
    Text(String),
    /// Assistant called a tool
    ToolUse(String),
    /// Anything else worth recording
    Other(String),
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Session(id) => write!(f, "session {}", id),
            ProgressEvent::Text(text) => write!(f, "assistant: {}", text),
            ProgressEvent::ToolUse(name) => write!(f, "tool: {}", name),
            ProgressEvent::Other(line) => f.write_str(line),
        }
    }
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Sends a prompt plus agent configuration to a language model
///
/// Implementations must stop work when the returned future is dropped;
/// that is how task cancellation reaches the underlying call.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(
        &self,
        request: InvocationRequest,
        progress: ProgressSender,
    ) -> Result<InvocationOutput, InvocationError>;
}
