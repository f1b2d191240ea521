//! Tool registry - admits, validates, and dispatches tools

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::filesystem::{FileEditTool, FileReadTool, FileWriteTool};
use super::shell::BashTool;
use super::web::{ZaiWebReaderTool, ZaiWebSearchTool};
use super::{Tool, ToolArgs, ToolContext, ToolResult, UnknownArgs};
use crate::agent::llm::ZaiClient;
use crate::agent::message::ToolCallRequest;
use crate::agent::session::CancelFlag;
use crate::config::Config;
use crate::error::Error;
use crate::gate::CreditGate;
use crate::Result;

/// Tool definition for LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    /// Keys listed under `required`.
    pub fn required(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|keys| keys.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Whether `key` is declared under `properties`.
    pub fn declares(&self, key: &str) -> bool {
        self.parameters
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.contains_key(key))
            .unwrap_or(false)
    }
}

struct Entry {
    tool: Arc<dyn Tool>,
    definition: ToolDefinition,
}

/// Ordered set of admitted tools, unique by name.
pub struct ToolRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    default_timeout: Duration,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            default_timeout,
        }
    }

    /// Build the registry the config asks for.
    ///
    /// Z.AI tools go through the credit gate; a refusal is returned as is.
    pub fn from_config(config: &Config, gate: &CreditGate) -> Result<Self> {
        let mut registry = Self::new(Duration::from_secs(config.agent.tool_timeout_secs.max(1)));

        if config.tools.enable_file_tools {
            registry.register(FileReadTool)?;
            registry.register(FileWriteTool)?;
            registry.register(FileEditTool)?;
        }

        if config.tools.enable_bash {
            registry.register(BashTool::new(Duration::from_secs(config.tools.bash_timeout_secs.max(1))))?;
        }

        if config.tools.enable_zai_search {
            let client = ZaiClient::from_config(config, gate)?;
            registry.register(ZaiWebSearchTool::new(client.clone(), gate)?)?;
            registry.register(ZaiWebReaderTool::new(client, gate)?)?;
        }

        info!(tools = ?registry.tool_names(), "tool registry ready");
        Ok(registry)
    }

    /// Register a tool; a second tool with the same name is an error.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(Error::Registry(format!("Tool '{name}' is already registered")));
        }
        let definition = tool.to_definition();
        self.index.insert(name, self.entries.len());
        self.entries.push(Entry { tool, definition });
        Ok(())
    }

    /// Get tool definitions for LLM, in registration order
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.entries.iter().map(|e| e.definition.clone()).collect()
    }

    /// Check if a tool exists
    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// List registered tool names
    pub fn tool_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.definition.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate and run one call. Never fails: problems become failed results.
    pub async fn invoke(&self, call: &ToolCallRequest, ctx: &ToolContext) -> ToolResult {
        let Some(entry) = self.index.get(&call.name).map(|&i| &self.entries[i]) else {
            warn!(tool = %call.name, "model requested an unknown tool");
            return ToolResult::fail(format!("Unknown tool: {}", call.name));
        };

        let args = match validate_args(entry, &call.arguments) {
            Ok(args) => args,
            Err(message) => {
                debug!(tool = %call.name, error = %message, "rejected tool arguments");
                return ToolResult::fail(message);
            }
        };

        let timeout = entry.tool.timeout().unwrap_or(self.default_timeout);
        debug!(tool = %call.name, call_id = %call.id, "invoking tool");

        match tokio::time::timeout(timeout, entry.tool.execute(&args, ctx)).await {
            Ok(Ok(content)) => ToolResult::ok(content),
            Ok(Err(e)) => {
                debug!(tool = %call.name, error = %e, "tool failed");
                ToolResult::fail(tool_error_message(e))
            }
            Err(_) => {
                warn!(tool = %call.name, timeout_secs = timeout.as_secs(), "tool timed out");
                ToolResult::fail("timeout")
            }
        }
    }

    /// Run every call of one assistant turn concurrently.
    ///
    /// Results come back in call order. Calls not yet started when `cancel`
    /// is set are skipped with a failed result.
    pub async fn dispatch(
        &self,
        calls: &[ToolCallRequest],
        ctx: &ToolContext,
        cancel: &CancelFlag,
    ) -> Vec<ToolResult> {
        let pending = calls.iter().map(|call| async move {
            if cancel.is_cancelled() {
                return ToolResult::fail("Session cancelled before this tool call was dispatched");
            }
            self.invoke(call, ctx).await
        });
        futures_util::future::join_all(pending).await
    }
}

fn validate_args(entry: &Entry, raw: &Value) -> std::result::Result<ToolArgs, String> {
    let name = &entry.definition.name;
    let mut args = match raw {
        Value::Object(map) => map.clone(),
        Value::Null => ToolArgs::new(),
        Value::String(text) => {
            return Err(format!(
                "Malformed arguments for {name}: not a JSON object: {}",
                preview(text)
            ))
        }
        other => return Err(format!("Malformed arguments for {name}: expected a JSON object, got {other}")),
    };

    if let Some(missing) = entry
        .definition
        .required()
        .into_iter()
        .find(|key| matches!(args.get(*key), None | Some(Value::Null)))
    {
        return Err(format!("Missing required parameter '{missing}' for {name}"));
    }

    let unknown: Vec<String> = args
        .keys()
        .filter(|key| !entry.definition.declares(key))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        match entry.tool.unknown_args() {
            UnknownArgs::Reject => {
                return Err(format!("Unknown parameter(s) for {name}: {}", unknown.join(", ")));
            }
            UnknownArgs::Ignore => {
                for key in &unknown {
                    args.remove(key);
                }
            }
        }
    }

    Ok(args)
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(80).collect();
    if text.chars().count() > 80 {
        out.push_str("...");
    }
    out
}

fn tool_error_message(error: Error) -> String {
    match error {
        Error::Tool(message) => message,
        other => other.to_string(),
    }
}
