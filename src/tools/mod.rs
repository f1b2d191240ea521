//! Tools module - agent capabilities
//!
//! Tools are external actions the agent can take: reading and editing
//! files inside the session workspace, running shell commands, and the
//! Z.AI web tools.

pub mod filesystem;
pub mod registry;
pub mod shell;
pub mod web;

pub use registry::{ToolDefinition, ToolRegistry};

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;
use crate::Result;

/// Character budget for page bodies and other large tool output
/// (four characters per token, 8000 tokens).
pub const WEB_CHAR_BUDGET: usize = 4 * 8000;

/// Arguments passed to a tool.
pub type ToolArgs = Map<String, Value>;

/// What the registry does with argument keys a tool does not declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownArgs {
    Reject,
    Ignore,
}

/// Per-invocation context.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Absolute session workspace
    pub workspace: PathBuf,
}

impl ToolContext {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }
}

/// Tool trait - interface for all agent tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls
    fn name(&self) -> &str;

    /// Description of what the tool does
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters(&self) -> Value;

    fn unknown_args(&self) -> UnknownArgs {
        UnknownArgs::Reject
    }

    /// Overrides the registry's default timeout
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Execute the tool with validated arguments
    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<String>;

    /// Convert to tool definition for LLM
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Outcome of one tool invocation.
///
/// A failed result carries its error and no content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            error: Some(error.into()),
        }
    }
}

/// Resolve `path` against the workspace without touching the filesystem.
///
/// `..` and absolute paths that leave the workspace are rejected.
pub fn resolve_in_workspace(workspace: &Path, path: &str) -> Result<PathBuf> {
    let outside = || {
        Error::Tool(format!(
            "Path '{path}' is outside workspace {}",
            workspace.display()
        ))
    };

    let root = normalize(workspace).ok_or_else(outside)?;
    let candidate = Path::new(path);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let resolved = normalize(&joined).ok_or_else(outside)?;

    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(outside())
    }
}

/// Lexical normalization; `None` when `..` climbs above the root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() || out.as_os_str().is_empty() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// Cut `text` to `budget` characters with a visible marker.
pub fn truncate_chars(text: &str, budget: usize) -> String {
    let total = text.chars().count();
    if total <= budget {
        return text.to_string();
    }
    let kept: String = text.chars().take(budget).collect();
    format!("{kept}\n\n[... truncated {} characters ...]", total - budget)
}

pub(crate) fn required_str<'a>(args: &'a ToolArgs, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Tool(format!("Parameter '{key}' must be a string")))
}

pub(crate) fn optional_str<'a>(args: &'a ToolArgs, key: &str) -> Result<Option<&'a str>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(Error::Tool(format!("Parameter '{key}' must be a string"))),
    }
}

pub(crate) fn optional_i64(args: &ToolArgs, key: &str) -> Result<Option<i64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| Error::Tool(format!("Parameter '{key}' must be an integer"))),
    }
}

pub(crate) fn optional_bool(args: &ToolArgs, key: &str) -> Result<Option<bool>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(Error::Tool(format!("Parameter '{key}' must be a boolean"))),
    }
}

/// Dummy tool for testing
#[cfg(test)]
pub(crate) struct DummyTool {
    pub name: String,
    pub result: String,
    pub delay: Duration,
    pub policy: UnknownArgs,
    pub calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

#[cfg(test)]
impl DummyTool {
    pub fn new(name: &str, result: &str) -> Self {
        Self {
            name: name.to_string(),
            result: result.to_string(),
            delay: Duration::ZERO,
            policy: UnknownArgs::Reject,
            calls: Default::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn ignoring_unknown(mut self) -> Self {
        self.policy = UnknownArgs::Ignore;
        self
    }
}

#[cfg(test)]
#[async_trait]
impl Tool for DummyTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Dummy tool for testing"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"input": {"type": "string"}},
            "required": ["input"]
        })
    }

    fn unknown_args(&self) -> UnknownArgs {
        self.policy
    }

    async fn execute(&self, args: &ToolArgs, _ctx: &ToolContext) -> Result<String> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let keys: Vec<&str> = args.keys().map(String::as_str).collect();
        Ok(format!("{} [{}]", self.result, keys.join(",")))
    }
}
