use super::events::AgentEvent;
use super::value_objects::{AgentStatus, Capability, ExternalModel, PermissionMode};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

pub const DEFAULT_MODEL: &str = "sonnet";
pub const DEFAULT_MAX_TURNS: u32 = 50;
pub const DEFAULT_MAX_RESTARTS: u32 = 3;
const MAX_ID_LEN: usize = 64;

/// Request to create an agent
///
/// Everything except the name and system prompt is optional and falls back
/// to the defaults documented on [`AgentConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub system_prompt: String,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub disallowed_capabilities: Option<Vec<String>>,
    /// MCP server definitions by name, passed to the CLI as-is
    #[serde(default)]
    pub mcp_servers: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub max_budget_usd: Option<Decimal>,
    #[serde(default)]
    pub permission_mode: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub auto_restart: Option<bool>,
    #[serde(default)]
    pub max_restarts: Option<u32>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            ..Self::default()
        }
    }
}

/// Immutable configuration of an agent
///
/// # Invariants
/// - Name and system prompt are not blank
/// - Id is non-empty and made of `[A-Za-z0-9_-]`
/// - Capabilities come from the closed [`Capability`] set, and none is both
///   granted and disallowed
/// - Every MCP server definition is a JSON object
/// - An `external:` model names a provider and a model
/// - Max turns is positive, budget (if any) is positive
///
/// # Defaults
/// - Capabilities: `Read, Glob, Grep, Bash, Edit, Write`, nothing disallowed
/// - Model `sonnet`, 50 turns, `acceptEdits`, no auto-restart, 3 restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub capabilities: BTreeSet<Capability>,
    #[serde(default)]
    pub disallowed_capabilities: BTreeSet<Capability>,
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, Value>,
    pub model: String,
    pub max_turns: u32,
    pub max_budget_usd: Option<Decimal>,
    pub permission_mode: PermissionMode,
    pub cwd: Option<String>,
    pub auto_restart: bool,
    pub max_restarts: u32,
}

impl AgentConfig {
    /// Validates a creation request and builds the configuration
    ///
    /// # Returns
    /// * `Ok(AgentConfig)` - Validated configuration
    /// * `Err(String)` - First violated rule
    ///
    /// # Example
    /// ```
    /// use conclave_api::domain::agent::{AgentConfig, AgentSpec};
    ///
    /// let config = AgentConfig::from_spec(AgentSpec::new("Echo", "Repeat after me")).unwrap();
    /// assert_eq!(config.id.len(), 8);
    /// assert!(AgentConfig::from_spec(AgentSpec::new("", "x")).is_err());
    /// ```
    pub fn from_spec(spec: AgentSpec) -> Result<Self, String> {
        let name = spec.name.trim().to_string();
        if name.is_empty() {
            return Err("Agent name cannot be empty".to_string());
        }

        if spec.system_prompt.trim().is_empty() {
            return Err("System prompt cannot be empty".to_string());
        }

        let id = match spec.id {
            Some(id) => {
                let id = id.trim().to_string();
                validate_id(&id)?;
                id
            }
            None => generate_agent_id(),
        };

        let capabilities = match spec.capabilities {
            Some(names) => parse_capabilities(&names)?,
            None => Capability::DEFAULT.into_iter().collect(),
        };
        let disallowed_capabilities =
            parse_capabilities(&spec.disallowed_capabilities.unwrap_or_default())?;
        if let Some(both) = capabilities.intersection(&disallowed_capabilities).next() {
            return Err(format!(
                "Capability {} cannot be both granted and disallowed",
                both.as_str()
            ));
        }

        let mcp_servers = spec.mcp_servers.unwrap_or_default();
        for (name, server) in &mcp_servers {
            if name.trim().is_empty() {
                return Err("MCP server name cannot be empty".to_string());
            }
            if !server.is_object() {
                return Err(format!("MCP server '{}' must be a JSON object", name));
            }
        }

        let permission_mode = match spec.permission_mode {
            Some(mode) => mode.parse::<PermissionMode>()?,
            None => PermissionMode::default(),
        };

        let max_turns = spec.max_turns.unwrap_or(DEFAULT_MAX_TURNS);
        if max_turns == 0 {
            return Err("Max turns must be positive".to_string());
        }

        if let Some(budget) = spec.max_budget_usd {
            if budget <= Decimal::ZERO {
                return Err("Budget must be positive".to_string());
            }
        }

        let model = spec
            .model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        ExternalModel::parse(&model)?;

        Ok(Self {
            id,
            name,
            description: spec.description.unwrap_or_default(),
            system_prompt: spec.system_prompt,
            capabilities,
            disallowed_capabilities,
            mcp_servers,
            model,
            max_turns,
            max_budget_usd: spec.max_budget_usd,
            permission_mode,
            cwd: spec.cwd.filter(|c| !c.trim().is_empty()),
            auto_restart: spec.auto_restart.unwrap_or(false),
            max_restarts: spec.max_restarts.unwrap_or(DEFAULT_MAX_RESTARTS),
        })
    }

    /// Comma separated capability list as the model service expects it
    pub fn capability_list(&self) -> String {
        join_capabilities(&self.capabilities)
    }

    pub fn disallowed_list(&self) -> String {
        join_capabilities(&self.disallowed_capabilities)
    }

    /// The model when another provider serves it over HTTP
    pub fn external_model(&self) -> Option<ExternalModel> {
        ExternalModel::parse(&self.model).ok().flatten()
    }
}

fn parse_capabilities(names: &[String]) -> Result<BTreeSet<Capability>, String> {
    names
        .iter()
        .filter(|n| !n.trim().is_empty())
        .map(|n| n.parse::<Capability>())
        .collect()
}

fn join_capabilities(capabilities: &BTreeSet<Capability>) -> String {
    capabilities
        .iter()
        .map(Capability::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

fn validate_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("Agent id cannot be empty".to_string());
    }
    if id.len() > MAX_ID_LEN {
        return Err(format!("Agent id is longer than {} characters", MAX_ID_LEN));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(format!("Agent id '{}' contains invalid characters", id));
    }
    Ok(())
}

/// Eight lowercase hex characters
pub fn generate_agent_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Mutable runtime state of an agent
///
/// # Invariants
/// - `status == Running` implies `current_task_id.is_some()`
/// - `status != Running` implies `current_task_id.is_none()`
///
/// Each transition method validates the move against
/// [`AgentStatus::can_transition_to`] and returns the event to log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRuntimeState {
    pub status: AgentStatus,
    pub session_id: Option<String>,
    pub current_task_id: Option<Uuid>,
    pub last_error: Option<String>,
    pub restart_count: u32,
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for AgentRuntimeState {
    fn default() -> Self {
        Self {
            status: AgentStatus::Stopped,
            session_id: None,
            current_task_id: None,
            last_error: None,
            restart_count: 0,
            started_at: None,
        }
    }
}

impl AgentRuntimeState {
    fn transition(&mut self, next: AgentStatus) -> Result<AgentStatus, String> {
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "Cannot move agent from {} to {}",
                self.status, next
            ));
        }
        let from = self.status;
        self.status = next;
        Ok(from)
    }

    /// Makes the agent available for work
    ///
    /// Starting an Idle or Running agent is a no-op and returns `None`.
    /// From Stopped or Error the agent becomes Idle with a fresh restart
    /// counter.
    pub fn start(&mut self) -> Option<AgentEvent> {
        match self.status {
            AgentStatus::Idle | AgentStatus::Running => None,
            AgentStatus::Stopped | AgentStatus::Error => {
                let from = self.status;
                self.status = AgentStatus::Idle;
                self.restart_count = 0;
                self.last_error = None;
                self.started_at = Some(Utc::now());
                Some(AgentEvent::Started { from })
            }
        }
    }

    /// Binds a task to the agent (Idle -> Running)
    pub fn begin_task(&mut self, task_id: Uuid) -> Result<AgentEvent, String> {
        if self.status != AgentStatus::Idle {
            return Err(format!(
                "Agent is {} and accepts one task at a time",
                self.status
            ));
        }
        self.transition(AgentStatus::Running)?;
        self.current_task_id = Some(task_id);
        Ok(AgentEvent::TaskSubmitted { task_id })
    }

    /// Records a successful task (Running -> Idle)
    ///
    /// Stores the new session token when the service returned one and
    /// resets the restart counter.
    pub fn task_succeeded(
        &mut self,
        task_id: Uuid,
        session_id: Option<String>,
    ) -> Result<AgentEvent, String> {
        self.ensure_current(task_id)?;
        self.transition(AgentStatus::Idle)?;
        self.current_task_id = None;
        if session_id.is_some() {
            self.session_id = session_id;
        }
        self.restart_count = 0;
        self.last_error = None;
        Ok(AgentEvent::TaskSucceeded { task_id })
    }

    /// Records a failed task (Running -> Error)
    pub fn task_failed(&mut self, task_id: Uuid, error: String) -> Result<AgentEvent, String> {
        self.ensure_current(task_id)?;
        self.transition(AgentStatus::Error)?;
        self.current_task_id = None;
        self.last_error = Some(error.clone());
        Ok(AgentEvent::TaskFailed { task_id, error })
    }

    /// Releases the agent after its task was cancelled (Running -> Idle)
    pub fn task_cancelled(&mut self, task_id: Uuid) -> Result<AgentEvent, String> {
        self.ensure_current(task_id)?;
        self.transition(AgentStatus::Idle)?;
        self.current_task_id = None;
        Ok(AgentEvent::TaskCancelled { task_id })
    }

    /// Applies the auto-restart policy after a failure
    ///
    /// Returns the restart event when the agent went back to Idle, `None`
    /// when restarts are disabled or exhausted and the agent stays in Error.
    pub fn auto_restart(&mut self, enabled: bool, max_restarts: u32) -> Option<AgentEvent> {
        if self.status != AgentStatus::Error || !enabled || self.restart_count >= max_restarts {
            return None;
        }
        self.status = AgentStatus::Idle;
        self.restart_count += 1;
        Some(AgentEvent::AutoRestarted {
            attempt: self.restart_count,
            max: max_restarts,
        })
    }

    /// Stops the agent, dropping its current task binding
    ///
    /// Stopping a Stopped agent is a no-op and returns `None`.
    pub fn stop(&mut self) -> Option<AgentEvent> {
        if self.status == AgentStatus::Stopped {
            return None;
        }
        let from = self.status;
        self.status = AgentStatus::Stopped;
        let cancelled_task = self.current_task_id.take();
        Some(AgentEvent::Stopped {
            from,
            cancelled_task,
        })
    }

    /// Marks a Running agent as failed because its engine went away
    pub fn interrupt(&mut self) -> Option<AgentEvent> {
        if self.status != AgentStatus::Running {
            return None;
        }
        self.status = AgentStatus::Error;
        let task_id = self.current_task_id.take();
        self.last_error = Some("interrupted by engine restart".to_string());
        Some(AgentEvent::Interrupted { task_id })
    }

    fn ensure_current(&self, task_id: Uuid) -> Result<(), String> {
        if self.current_task_id != Some(task_id) {
            return Err(format!("Task {} is not the agent's current task", task_id));
        }
        Ok(())
    }
}

/// Configuration plus runtime state, the unit persisted and returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub config: AgentConfig,
    pub state: AgentRuntimeState,
}

impl AgentRecord {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            state: AgentRuntimeState::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }
}
