//! Anthropic messages dialect.
//!
//! Used by the anthropic-compatible provider and by the Z.AI coding plan's
//! anthropic endpoint. System prompts travel in the top-level `system`
//! field, tool calls as `tool_use` content blocks, and tool results as
//! user-role `tool_result` blocks.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agent::message::{ensure_unique_ids, Message, Role, StopReason, ToolCallRequest};
use crate::error::ProviderError;
use crate::tools::ToolDefinition;

use super::{GenerationParams, LlmResponse, ProviderKind, Usage};

/// Request path appended to the provider base URL.
pub const MESSAGES_PATH: &str = "/v1/messages";

/// Stands in for an assistant turn with no text, thinking, or tool calls;
/// the messages API rejects empty text blocks and empty content lists.
pub const EMPTY_TURN: &str = "(empty response)";

/// A content block inside an anthropic message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    #[serde(other)]
    Unsupported,
}

/// One message in the anthropic `messages` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: usize,
    #[serde(default)]
    output_tokens: usize,
}

/// Split a canonical log into the top-level system prompt and wire messages.
///
/// Consecutive tool messages collapse into one user message carrying one
/// `tool_result` block per call, in log order.
pub fn encode_messages(messages: &[Message]) -> (Option<String>, Vec<WireMessage>) {
    let mut system_parts = Vec::new();
    let mut wire: Vec<WireMessage> = Vec::with_capacity(messages.len());
    let mut open_results = false;

    for message in messages {
        match message.role {
            Role::System => {
                system_parts.push(message.content.clone());
                open_results = false;
            }
            Role::User => {
                wire.push(WireMessage {
                    role: "user".to_string(),
                    content: vec![ContentBlock::Text {
                        text: message.content.clone(),
                    }],
                });
                open_results = false;
            }
            Role::Assistant => {
                let mut blocks = Vec::with_capacity(message.tool_calls.len() + 2);
                if let Some(thinking) = &message.thinking {
                    blocks.push(ContentBlock::Thinking {
                        thinking: thinking.clone(),
                        signature: None,
                    });
                }
                if !message.content.is_empty() {
                    blocks.push(ContentBlock::Text {
                        text: message.content.clone(),
                    });
                }
                blocks.extend(message.tool_calls.iter().map(|call| ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                }));
                if blocks.is_empty() {
                    blocks.push(ContentBlock::Text {
                        text: EMPTY_TURN.to_string(),
                    });
                }
                wire.push(WireMessage {
                    role: "assistant".to_string(),
                    content: blocks,
                });
                open_results = false;
            }
            Role::Tool => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: Value::String(message.content.clone()),
                    is_error: message.is_error,
                };
                match wire.last_mut() {
                    Some(last) if open_results => last.content.push(block),
                    _ => wire.push(WireMessage {
                        role: "user".to_string(),
                        content: vec![block],
                    }),
                }
                open_results = true;
            }
        }
    }

    let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
    (system, wire)
}

/// Rebuild a canonical log from the anthropic request shape.
///
/// The request shape carries no termination reason, so assistant turns come
/// back as `ToolUse` when they call tools and `Stop` otherwise.
pub fn decode_messages(system: Option<&str>, wire: &[WireMessage]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(wire.len() + 1);
    if let Some(system) = system {
        messages.push(Message::system(system));
    }

    for message in wire {
        if message.role == "assistant" {
            let (mut content, thinking, tool_calls) = split_assistant_blocks(&message.content);
            if content == EMPTY_TURN && thinking.is_none() && tool_calls.is_empty() {
                content.clear();
            }
            let reason = if tool_calls.is_empty() {
                StopReason::Stop
            } else {
                StopReason::ToolUse
            };
            let mut decoded = Message::assistant_with_tools(content, tool_calls);
            decoded.thinking = thinking;
            messages.push(decoded.with_stop_reason(reason));
            continue;
        }

        let mut text = Vec::new();
        for block in &message.content {
            match block {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    let mut tool = Message::user(tool_result_text(content));
                    tool.role = Role::Tool;
                    tool.tool_call_id = Some(tool_use_id.clone());
                    tool.is_error = *is_error;
                    messages.push(tool);
                }
                ContentBlock::Text { text: t } => text.push(t.as_str()),
                _ => {}
            }
        }
        if !text.is_empty() {
            messages.push(Message::user(text.concat()));
        }
    }

    messages
}

fn split_assistant_blocks(blocks: &[ContentBlock]) -> (String, Option<String>, Vec<ToolCallRequest>) {
    let mut content = String::new();
    let mut thinking: Option<String> = None;
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => content.push_str(text),
            ContentBlock::Thinking { thinking: t, .. } => {
                thinking.get_or_insert_with(String::new).push_str(t);
            }
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCallRequest::new(id.clone(), name.clone(), input.clone()));
            }
            _ => {}
        }
    }

    (content, thinking, tool_calls)
}

fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Build the full request body.
pub fn encode_request(messages: &[Message], tools: &[ToolDefinition], params: &GenerationParams) -> Value {
    let (system, wire) = encode_messages(messages);

    let mut request = json!({
        "model": params.model,
        "max_tokens": params.max_tokens,
        "messages": wire,
    });

    if let Some(system) = system {
        request["system"] = json!(system);
    }
    if let Some(temperature) = params.temperature {
        request["temperature"] = json!(temperature);
    }
    if !params.stop_sequences.is_empty() {
        request["stop_sequences"] = json!(params.stop_sequences);
    }
    if !tools.is_empty() {
        request["tools"] = Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect(),
        );
    }

    request
}

/// Parse a messages response into the canonical response.
pub fn decode_response(provider: ProviderKind, body: Value) -> Result<LlmResponse, ProviderError> {
    let response: MessagesResponse = serde_json::from_value(body).map_err(|e| ProviderError::Upstream {
        provider,
        status: None,
        message: format!("unexpected messages response: {e}"),
    })?;

    let (content, thinking, mut tool_calls) = split_assistant_blocks(&response.content);
    ensure_unique_ids(&mut tool_calls);

    let stop_reason = match response.stop_reason.as_deref() {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::Length,
        _ if !tool_calls.is_empty() => StopReason::ToolUse,
        _ => StopReason::Stop,
    };

    let usage = response
        .usage
        .map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        content,
        thinking,
        tool_calls,
        stop_reason,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolResult;

    /// Assistant turns built the way the agent loop records them.
    fn sample_log() -> Vec<Message> {
        let reading = LlmResponse {
            content: "Reading both.".into(),
            thinking: Some("need both files".into()),
            tool_calls: vec![
                ToolCallRequest::new("toolu_1", "file_read", json!({"path": "a.txt"})),
                ToolCallRequest::new("toolu_2", "file_read", json!({"path": "b.txt"})),
            ],
            stop_reason: StopReason::ToolUse,
            usage: Usage::default(),
        };
        vec![
            Message::system("You are terse."),
            Message::user("read two files"),
            reading.into_message(),
            Message::tool_result("toolu_1", &ToolResult::ok("alpha")),
            Message::tool_result("toolu_2", &ToolResult::fail("path 'b.txt' not found")),
            LlmResponse::text("alpha and a missing file").into_message(),
            Message::user("thanks"),
        ]
    }

    #[test]
    fn test_round_trip_preserves_log() {
        let log = sample_log();
        let (system, wire) = encode_messages(&log);
        assert_eq!(system.as_deref(), Some("You are terse."));
        assert_eq!(decode_messages(system.as_deref(), &wire), log);
    }

    #[test]
    fn test_round_trip_keeps_stop_reasons() {
        let log = sample_log();
        let (system, wire) = encode_messages(&log);
        let back = decode_messages(system.as_deref(), &wire);
        assert_eq!(back[2].stop_reason, Some(StopReason::ToolUse));
        assert_eq!(back[5].stop_reason, Some(StopReason::Stop));
    }

    #[test]
    fn test_empty_assistant_turn_has_no_empty_text_block() {
        let log = vec![
            Message::user("do nothing"),
            LlmResponse::text("").into_message(),
            Message::user("still there?"),
        ];
        let (system, wire) = encode_messages(&log);

        assert_eq!(wire.len(), 3);
        assert_eq!(wire[1].role, "assistant");
        assert_eq!(
            wire[1].content,
            vec![ContentBlock::Text {
                text: EMPTY_TURN.to_string()
            }]
        );
        let encoded = serde_json::to_value(&wire).unwrap();
        assert_ne!(encoded[1]["content"][0]["text"], "");

        assert_eq!(decode_messages(system.as_deref(), &wire), log);
    }

    #[test]
    fn test_tool_calls_without_text_skip_the_text_block() {
        let log = vec![
            Message::user("list"),
            LlmResponse::tool_calls(vec![ToolCallRequest::new("toolu_1", "bash", json!({"command": "ls"}))])
                .into_message(),
        ];
        let (_, wire) = encode_messages(&log);
        assert_eq!(wire[1].content.len(), 1);
        assert!(matches!(wire[1].content[0], ContentBlock::ToolUse { .. }));
    }

    #[test]
    fn test_tool_results_share_one_user_message() {
        let (_, wire) = encode_messages(&sample_log());
        assert_eq!(wire.len(), 5);
        assert_eq!(wire[2].role, "user");
        assert_eq!(wire[2].content.len(), 2);
        match &wire[2].content[1] {
            ContentBlock::ToolResult { tool_use_id, is_error, .. } => {
                assert_eq!(tool_use_id, "toolu_2");
                assert!(*is_error);
            }
            other => panic!("expected tool_result, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_request_shape() {
        let tools = vec![ToolDefinition {
            name: "bash".into(),
            description: "run".into(),
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        }];
        let mut params = GenerationParams::new("claude-test");
        params.temperature = Some(0.5);
        let body = encode_request(&sample_log(), &tools, &params);

        assert_eq!(body["system"], "You are terse.");
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["content"][0]["type"], "thinking");
        assert_eq!(body["messages"][1]["content"][2]["type"], "tool_use");
        assert!(body.get("stop_sequences").is_none());
    }

    #[test]
    fn test_decode_tool_use_response() {
        let body = json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "thinking", "thinking": "look it up", "signature": "sig"},
                {"type": "text", "text": "Searching."},
                {"type": "tool_use", "id": "toolu_9", "name": "zai_web_search", "input": {"query": "asyncio", "max_results": 3}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let response = decode_response(ProviderKind::AnthropicCompatible, body).unwrap();
        assert_eq!(response.content, "Searching.");
        assert_eq!(response.thinking.as_deref(), Some("look it up"));
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.tool_calls[0].id, "toolu_9");
        assert_eq!(response.tool_calls[0].arguments["max_results"], 3);
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[test]
    fn test_decode_stop_reasons() {
        let body = json!({"content": [{"type": "text", "text": "OK"}], "stop_reason": "end_turn"});
        let response = decode_response(ProviderKind::AnthropicCompatible, body).unwrap();
        assert_eq!(response.content, "OK");
        assert_eq!(response.stop_reason, StopReason::Stop);

        let body = json!({"content": [], "stop_reason": "max_tokens"});
        let response = decode_response(ProviderKind::AnthropicCompatible, body).unwrap();
        assert_eq!(response.stop_reason, StopReason::Length);
    }

    #[test]
    fn test_decode_ignores_unknown_blocks() {
        let body = json!({"content": [{"type": "server_tool_use", "id": "x"}, {"type": "text", "text": "hi"}]});
        let response = decode_response(ProviderKind::ZaiCodingPlan, body).unwrap();
        assert_eq!(response.content, "hi");
    }

    #[test]
    fn test_decode_malformed_is_upstream() {
        let err = decode_response(ProviderKind::AnthropicCompatible, json!({"content": "nope"})).unwrap_err();
        assert!(matches!(err, ProviderError::Upstream { .. }));
    }
}
