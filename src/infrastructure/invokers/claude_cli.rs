use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::engine::invoker::{
    InvocationError, InvocationOutput, InvocationRequest, ModelInvoker, ProgressEvent,
    ProgressSender,
};

const PROGRESS_TEXT_LIMIT: usize = 200;

/// Claude Code CLI invoker.
///
/// Runs the `claude` CLI headless (`-p --output-format stream-json`), turns
/// every streamed event into a progress update and parses the final
/// `result` event. The child process is killed when the invocation future
/// is dropped, so cancelling a task stops the CLI.
pub struct ClaudeCliInvoker {
    binary: String,
    default_cwd: Option<PathBuf>,
}

impl ClaudeCliInvoker {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            default_cwd: None,
        }
    }

    /// Working directory for agents that do not set their own
    pub fn with_default_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.default_cwd = cwd;
        self
    }

    fn build_command(&self, request: &InvocationRequest) -> Command {
        let config = &request.config;
        let mut cmd = Command::new(&self.binary);

        cmd.arg("-p").arg(&request.prompt);
        cmd.arg("--output-format").arg("stream-json");
        cmd.arg("--verbose");
        cmd.arg("--model").arg(&config.model);
        cmd.arg("--max-turns").arg(config.max_turns.to_string());
        cmd.arg("--permission-mode")
            .arg(config.permission_mode.as_str());
        if !config.capabilities.is_empty() {
            cmd.arg("--allowedTools").arg(config.capability_list());
        }
        if !config.disallowed_capabilities.is_empty() {
            cmd.arg("--disallowedTools").arg(config.disallowed_list());
        }
        if !config.mcp_servers.is_empty() {
            let mcp = json!({ "mcpServers": config.mcp_servers });
            cmd.arg("--mcp-config").arg(mcp.to_string());
        }
        cmd.arg("--append-system-prompt").arg(&config.system_prompt);
        if let Some(budget) = config.max_budget_usd {
            cmd.arg("--max-budget-usd").arg(budget.to_string());
        }
        if let Some(session) = &request.session_id {
            cmd.arg("--resume").arg(session);
        }

        let cwd = config
            .cwd
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| self.default_cwd.clone());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ModelInvoker for ClaudeCliInvoker {
    async fn invoke(
        &self,
        request: InvocationRequest,
        progress: ProgressSender,
    ) -> Result<InvocationOutput, InvocationError> {
        tracing::info!(
            agent_id = %request.config.id,
            task_id = %request.task_id,
            model = %request.config.model,
            resume = request.session_id.is_some(),
            "Spawning claude CLI"
        );

        let mut child = self.build_command(&request).spawn().map_err(|e| {
            InvocationError::Unavailable(format!(
                "Failed to run '{}' CLI. Is Claude Code installed? Error: {}",
                self.binary, e
            ))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| InvocationError::Unavailable("CLI stdout not captured".to_string()))?;
        let stderr = child.stderr.take();
        let stderr_reader = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut result_event: Option<Value> = None;
        let mut stream_session: Option<String> = None;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| InvocationError::Malformed(format!("Failed to read CLI output: {}", e)))?
        {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let event: Value = match serde_json::from_str(line) {
                Ok(event) => event,
                Err(_) => {
                    let _ = progress.send(ProgressEvent::Other(truncate(line)));
                    continue;
                }
            };

            if event["type"] == "result" {
                result_event = Some(event);
                continue;
            }
            if stream_session.is_none() {
                stream_session = event["session_id"].as_str().map(str::to_string);
            }
            for update in progress_events(&event) {
                let _ = progress.send(update);
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| InvocationError::Unavailable(format!("CLI did not exit cleanly: {}", e)))?;
        let stderr = stderr_reader.await.unwrap_or_default();

        let Some(result_event) = result_event else {
            if !status.success() {
                return Err(InvocationError::Model(format!(
                    "Claude Code CLI failed (exit {}): {}",
                    status.code().unwrap_or(-1),
                    stderr.trim()
                )));
            }
            return Err(InvocationError::Malformed(
                "CLI output contained no result event".to_string(),
            ));
        };

        let mut output = parse_result(&result_event)?;
        if !status.success() {
            return Err(InvocationError::Model(format!(
                "Claude Code CLI failed (exit {}): {}",
                status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        if output.session_id.is_none() {
            output.session_id = stream_session;
        }

        tracing::info!(
            agent_id = %request.config.id,
            task_id = %request.task_id,
            cost_usd = ?output.cost_usd,
            num_turns = ?output.turns_used,
            "Claude CLI response received"
        );
        Ok(output)
    }
}

/// Parses the final `result` event of a stream-json run
fn parse_result(event: &Value) -> Result<InvocationOutput, InvocationError> {
    let text = event["result"].as_str().unwrap_or_default().to_string();

    if event["is_error"].as_bool().unwrap_or(false) {
        let subtype = event["subtype"].as_str().unwrap_or("error");
        let detail = if text.is_empty() { subtype } else { text.as_str() };
        return Err(InvocationError::Model(format!("Claude Code error: {}", detail)));
    }

    if event.get("result").and_then(Value::as_str).is_none() {
        return Err(InvocationError::Malformed(
            "result event has no result text".to_string(),
        ));
    }

    Ok(InvocationOutput {
        text,
        session_id: event["session_id"].as_str().map(str::to_string),
        cost_usd: parse_cost(&event["total_cost_usd"]),
        turns_used: event["num_turns"]
            .as_u64()
            .and_then(|n| u32::try_from(n).ok()),
    })
}

fn parse_cost(value: &Value) -> Option<Decimal> {
    let Value::Number(number) = value else {
        return None;
    };
    let raw = number.to_string();
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
}

/// Progress updates carried by one non-result stream event
fn progress_events(event: &Value) -> Vec<ProgressEvent> {
    match event["type"].as_str() {
        Some("system") => event["session_id"]
            .as_str()
            .map(|id| vec![ProgressEvent::Session(id.to_string())])
            .unwrap_or_default(),
        Some("assistant") => event["message"]["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|block| match block["type"].as_str() {
                        Some("text") => block["text"]
                            .as_str()
                            .filter(|t| !t.trim().is_empty())
                            .map(|t| ProgressEvent::Text(truncate(t))),
                        Some("tool_use") => block["name"]
                            .as_str()
                            .map(|n| ProgressEvent::ToolUse(n.to_string())),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn truncate(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(PROGRESS_TEXT_LIMIT) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentConfig, AgentSpec, Capability};
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    fn request(session: Option<&str>) -> InvocationRequest {
        let mut spec = AgentSpec::new("Coder", "Write code");
        spec.capabilities = Some(vec!["Read".to_string(), "Bash".to_string()]);
        spec.cwd = Some("/tmp".to_string());
        InvocationRequest {
            task_id: Uuid::new_v4(),
            config: Arc::new(AgentConfig::from_spec(spec).unwrap()),
            prompt: "fix the bug".to_string(),
            session_id: session.map(str::to_string),
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn command_carries_agent_configuration() {
        let invoker = ClaudeCliInvoker::new("claude");
        let cmd = invoker.build_command(&request(None));
        let args = args(&cmd);

        assert_eq!(args[0], "-p");
        assert_eq!(args[1], "fix the bug");
        assert!(args.windows(2).any(|w| w == ["--model", "sonnet"]));
        assert!(args.windows(2).any(|w| w == ["--max-turns", "50"]));
        assert!(args.windows(2).any(|w| w == ["--permission-mode", "acceptEdits"]));
        assert!(args.windows(2).any(|w| w == ["--allowedTools", "Read,Bash"]));
        assert!(!args.contains(&"--resume".to_string()));
        assert!(!args.contains(&"--disallowedTools".to_string()));
        assert!(!args.contains(&"--mcp-config".to_string()));
        assert_eq!(
            cmd.as_std().get_current_dir(),
            Some(std::path::Path::new("/tmp"))
        );
    }

    #[test]
    fn command_carries_disallowed_tools_and_mcp_servers() {
        let mut req = request(None);
        let config = Arc::make_mut(&mut req.config);
        config.disallowed_capabilities = [Capability::Write, Capability::WebSearch].into();
        config.mcp_servers.insert(
            "docs".to_string(),
            json!({"command": "docs-server", "args": ["--stdio"]}),
        );

        let args = args(&ClaudeCliInvoker::new("claude").build_command(&req));
        assert!(args
            .windows(2)
            .any(|w| w == ["--disallowedTools", "Write,WebSearch"]));

        let position = args.iter().position(|a| a == "--mcp-config").unwrap();
        let mcp: Value = serde_json::from_str(&args[position + 1]).unwrap();
        assert_eq!(mcp["mcpServers"]["docs"]["command"], "docs-server");
        assert_eq!(mcp["mcpServers"]["docs"]["args"][0], "--stdio");
    }

    #[test]
    fn command_resumes_session() {
        let invoker = ClaudeCliInvoker::new("claude");
        let args = args(&invoker.build_command(&request(Some("sess-9"))));
        assert!(args.windows(2).any(|w| w == ["--resume", "sess-9"]));
    }

    #[test]
    fn parse_successful_result() {
        let event = json!({
            "type": "result",
            "subtype": "success",
            "is_error": false,
            "result": "All tests pass",
            "session_id": "abc",
            "total_cost_usd": 0.0425,
            "num_turns": 7
        });

        let output = parse_result(&event).unwrap();
        assert_eq!(output.text, "All tests pass");
        assert_eq!(output.session_id.as_deref(), Some("abc"));
        assert_eq!(output.cost_usd, Some(Decimal::new(425, 4)));
        assert_eq!(output.turns_used, Some(7));
    }

    #[test]
    fn parse_error_result() {
        let event = json!({
            "type": "result",
            "subtype": "error_max_turns",
            "is_error": true,
            "session_id": "abc"
        });

        let err = parse_result(&event).unwrap_err();
        assert!(matches!(err, InvocationError::Model(ref m) if m.contains("error_max_turns")));
    }

    #[test]
    fn parse_result_without_text_is_malformed() {
        let event = json!({"type": "result", "is_error": false});
        assert!(matches!(
            parse_result(&event),
            Err(InvocationError::Malformed(_))
        ));
    }

    #[test]
    fn assistant_event_yields_text_and_tool_progress() {
        let event = json!({
            "type": "assistant",
            "message": {
                "content": [
                    {"type": "text", "text": "Looking at the code"},
                    {"type": "tool_use", "name": "Grep", "input": {}}
                ]
            }
        });

        assert_eq!(
            progress_events(&event),
            vec![
                ProgressEvent::Text("Looking at the code".to_string()),
                ProgressEvent::ToolUse("Grep".to_string()),
            ]
        );
    }

    #[test]
    fn long_progress_text_is_truncated() {
        let long = "x".repeat(PROGRESS_TEXT_LIMIT + 50);
        let out = truncate(&long);
        assert_eq!(out.len(), PROGRESS_TEXT_LIMIT + 3);
        assert!(out.ends_with("..."));
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let invoker = ClaudeCliInvoker::new("/nonexistent/claude-binary");
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut req = request(None);
        Arc::make_mut(&mut req.config).cwd = None;

        let err = invoker.invoke(req, tx).await.unwrap_err();
        assert!(matches!(err, InvocationError::Unavailable(_)));
    }
}
