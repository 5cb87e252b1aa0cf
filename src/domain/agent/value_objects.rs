use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an agent
///
/// # Status Transitions
/// ```text
/// Stopped -> Idle -> Running -> Idle
///             ^         └-----> Error -> Idle (restart)
///             └-------------------┘
/// Idle | Running | Error -> Stopped
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Registered but not accepting work
    Stopped,
    /// Ready to accept exactly one task
    Idle,
    /// Executing its single active task
    Running,
    /// Last task failed and the agent was not restarted
    Error,
}

impl AgentStatus {
    /// Checks if a transition from current status to next status is valid
    ///
    /// # Valid Transitions
    /// - Stopped -> Idle (start)
    /// - Idle -> Running (task submitted)
    /// - Running -> Idle (task succeeded or was cancelled)
    /// - Running -> Error (task failed)
    /// - Error -> Idle (auto-restart or explicit start)
    /// - Idle | Running | Error -> Stopped (stop)
    ///
    /// # Example
    /// ```
    /// use conclave_api::domain::agent::value_objects::AgentStatus;
    ///
    /// assert!(AgentStatus::Stopped.can_transition_to(AgentStatus::Idle));
    /// assert!(!AgentStatus::Stopped.can_transition_to(AgentStatus::Running));
    /// ```
    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (self, next),
            (Stopped, Idle)
                | (Idle, Running)
                | (Running, Idle)
                | (Running, Error)
                | (Error, Idle)
                | (Idle, Stopped)
                | (Running, Stopped)
                | (Error, Stopped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Stopped => "stopped",
            AgentStatus::Idle => "idle",
            AgentStatus::Running => "running",
            AgentStatus::Error => "error",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool capability an agent may be granted
///
/// The set is closed: configuration naming anything else is rejected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Capability {
    Read,
    Write,
    Edit,
    Bash,
    Glob,
    Grep,
    WebFetch,
    WebSearch,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::Read,
        Capability::Write,
        Capability::Edit,
        Capability::Bash,
        Capability::Glob,
        Capability::Grep,
        Capability::WebFetch,
        Capability::WebSearch,
    ];

    /// Default grant for agents created without an explicit capability list
    pub const DEFAULT: [Capability; 6] = [
        Capability::Read,
        Capability::Glob,
        Capability::Grep,
        Capability::Bash,
        Capability::Edit,
        Capability::Write,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Read => "Read",
            Capability::Write => "Write",
            Capability::Edit => "Edit",
            Capability::Bash => "Bash",
            Capability::Glob => "Glob",
            Capability::Grep => "Grep",
            Capability::WebFetch => "WebFetch",
            Capability::WebSearch => "WebSearch",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Capability::ALL
            .iter()
            .copied()
            .find(|cap| cap.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| format!("Unknown capability: '{}'", name))
    }
}

/// How the model service treats edits and tool approvals for an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Default,
    #[default]
    AcceptEdits,
    BypassPermissions,
    Plan,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
            PermissionMode::Plan => "plan",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = s.trim();
        [
            PermissionMode::Default,
            PermissionMode::AcceptEdits,
            PermissionMode::BypassPermissions,
            PermissionMode::Plan,
        ]
        .into_iter()
        .find(|m| m.as_str().eq_ignore_ascii_case(mode))
        .ok_or_else(|| format!("Unknown permission mode: '{}'", mode))
    }
}

/// Model served over HTTP by another provider instead of the Claude CLI
///
/// Written `external:<provider>:<model>` in an agent configuration, e.g.
/// `external:gemini:gemini-2.0-flash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalModel {
    pub provider: String,
    pub model: String,
}

impl ExternalModel {
    pub const PREFIX: &'static str = "external:";

    /// `Ok(None)` for models the CLI serves
    ///
    /// # Example
    /// ```
    /// use conclave_api::domain::agent::ExternalModel;
    ///
    /// let external = ExternalModel::parse("external:gemini:gemini-pro").unwrap().unwrap();
    /// assert_eq!(external.provider, "gemini");
    /// assert!(ExternalModel::parse("sonnet").unwrap().is_none());
    /// assert!(ExternalModel::parse("external:gemini").is_err());
    /// ```
    pub fn parse(model: &str) -> Result<Option<Self>, String> {
        let Some(rest) = model.strip_prefix(Self::PREFIX) else {
            return Ok(None);
        };
        match rest.split_once(':') {
            Some((provider, name)) if !provider.trim().is_empty() && !name.trim().is_empty() => {
                Ok(Some(Self {
                    provider: provider.trim().to_ascii_lowercase(),
                    model: name.trim().to_string(),
                }))
            }
            _ => Err(format!(
                "Invalid external model '{}', expected 'external:<provider>:<model>'",
                model
            )),
        }
    }
}
