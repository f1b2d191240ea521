//! Canonical message log types, independent of any vendor wire shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolResult;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Why an assistant turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    ToolUse,
    Length,
    Error,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Stop => "stop",
            StopReason::ToolUse => "tool_use",
            StopReason::Length => "length",
            StopReason::Error => "error",
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,

    /// Structured reasoning returned alongside the answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,

    /// Tool calls made by assistant, in the order the model issued them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// Tool call ID (for tool responses)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Set on tool responses whose result failed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,

    /// Termination reason (assistant messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            thinking: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
            stop_reason: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Create an assistant message with tool calls
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(Role::Assistant, content.into())
        }
    }

    /// Internally produced terminal message (step limit, cancellation, provider failure).
    pub fn terminal(content: impl Into<String>, reason: StopReason) -> Self {
        Self {
            stop_reason: Some(reason),
            ..Self::with_role(Role::Assistant, content.into())
        }
    }

    /// Create a tool message answering `call_id`
    pub fn tool_result(call_id: impl Into<String>, result: &ToolResult) -> Self {
        let (content, is_error) = if result.success {
            (result.content.clone(), false)
        } else {
            (result.error.clone().unwrap_or_default(), true)
        };
        Self {
            tool_call_id: Some(call_id.into()),
            is_error,
            ..Self::with_role(Role::Tool, content)
        }
    }

    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }

    pub fn with_stop_reason(mut self, reason: StopReason) -> Self {
        self.stop_reason = Some(reason);
        self
    }

    /// Recover the tool result carried by a tool message.
    pub fn as_tool_result(&self) -> Option<ToolResult> {
        if self.role != Role::Tool {
            return None;
        }
        Some(if self.is_error {
            ToolResult::fail(self.content.clone())
        } else {
            ToolResult::ok(self.content.clone())
        })
    }

    #[inline]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A tool call request from the LLM
///
/// `arguments` is kept as the raw JSON the model produced; the registry
/// rejects anything that is not an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Give every call in a turn a unique, non-empty id.
pub(crate) fn ensure_unique_ids(calls: &mut [ToolCallRequest]) {
    let mut seen = std::collections::HashSet::new();
    for call in calls.iter_mut() {
        if call.id.is_empty() || !seen.insert(call.id.clone()) {
            call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
            seen.insert(call.id.clone());
        }
    }
}
