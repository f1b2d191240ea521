//! Shell tool - execute commands in the workspace

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::warn;

use super::{optional_i64, required_str, truncate_chars, Tool, ToolArgs, ToolContext, UnknownArgs, WEB_CHAR_BUDGET};
use crate::error::Error;
use crate::Result;

/// Longest timeout a call may ask for, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 600;

/// Execute shell commands
pub struct BashTool {
    default_timeout: Duration,
}

impl BashTool {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl Default for BashTool {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace. Returns stdout, stderr, and the exit code; \
         a non-zero exit code is reported, not treated as a tool failure."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (max 600; the agent's tool timeout still applies)"
                }
            },
            "required": ["command"]
        })
    }

    fn unknown_args(&self) -> UnknownArgs {
        UnknownArgs::Ignore
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<String> {
        let command = required_str(args, "command")?;
        let timeout = match optional_i64(args, "timeout")? {
            Some(secs) if secs >= 1 => Duration::from_secs((secs as u64).min(MAX_TIMEOUT_SECS)),
            Some(secs) => return Err(Error::Tool(format!("timeout must be >= 1 second, got {secs}"))),
            None => self.default_timeout,
        };

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Tool(format!("Failed to execute command: {e}")))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| Error::Tool(format!("Failed to execute command: {e}")))?,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "bash command timed out and was killed");
                return Err(Error::Tool("timeout".to_string()));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "terminated by signal".to_string());

        let mut report = format!("exit code: {code}\n");
        if !stdout.is_empty() {
            report.push_str("\n[stdout]\n");
            report.push_str(&stdout);
        }
        if !stderr.is_empty() {
            report.push_str("\n[stderr]\n");
            report.push_str(&stderr);
        }

        Ok(truncate_chars(&report, WEB_CHAR_BUDGET))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(value: Value) -> ToolArgs {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_exec_echo() {
        let tmp = TempDir::new().unwrap();
        let result = BashTool::default()
            .execute(&args(json!({"command": "echo 'Hello, World!'"})), &ToolContext::new(tmp.path()))
            .await
            .unwrap();

        assert!(result.starts_with("exit code: 0"));
        assert!(result.contains("Hello, World!"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_a_tool_error() {
        let tmp = TempDir::new().unwrap();
        let result = BashTool::default()
            .execute(&args(json!({"command": "echo oops >&2; exit 3"})), &ToolContext::new(tmp.path()))
            .await
            .unwrap();

        assert!(result.starts_with("exit code: 3"));
        assert!(result.contains("[stderr]\noops"));
    }

    #[tokio::test]
    async fn test_runs_in_workspace() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("marker.txt"), "").unwrap();
        let result = BashTool::default()
            .execute(&args(json!({"command": "ls"})), &ToolContext::new(tmp.path()))
            .await
            .unwrap();
        assert!(result.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let tmp = TempDir::new().unwrap();
        let err = BashTool::new(Duration::from_secs(1))
            .execute(&args(json!({"command": "sleep 5"})), &ToolContext::new(tmp.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool(ref m) if m == "timeout"));
    }

    #[tokio::test]
    async fn test_registry_deadline_governs_bash() {
        use crate::agent::message::ToolCallRequest;
        use crate::tools::{ToolRegistry, ToolResult};

        let tmp = TempDir::new().unwrap();
        let mut registry = ToolRegistry::new(Duration::from_millis(200));
        registry.register(BashTool::new(Duration::from_secs(1))).unwrap();

        let started = std::time::Instant::now();
        let result = registry
            .invoke(
                &ToolCallRequest::new("tc_1", "bash", json!({"command": "sleep 3"})),
                &ToolContext::new(tmp.path()),
            )
            .await;

        assert_eq!(result, ToolResult::fail("timeout"));
        assert!(started.elapsed() < Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_own_timeout_reports_plain_timeout_through_registry() {
        use crate::agent::message::ToolCallRequest;
        use crate::tools::{ToolRegistry, ToolResult};

        let tmp = TempDir::new().unwrap();
        let mut registry = ToolRegistry::new(Duration::from_secs(30));
        registry.register(BashTool::new(Duration::from_secs(30))).unwrap();

        let result = registry
            .invoke(
                &ToolCallRequest::new("tc_1", "bash", json!({"command": "sleep 5", "timeout": 1})),
                &ToolContext::new(tmp.path()),
            )
            .await;
        assert_eq!(result, ToolResult::fail("timeout"));
    }
}
