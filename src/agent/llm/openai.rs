//! OpenAI chat-completions dialect.
//!
//! System prompts are a leading `system` message, tool calls are
//! `function` entries whose arguments travel as a JSON string, and tool
//! results are `tool` role messages keyed by `tool_call_id`.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent::message::{ensure_unique_ids, Message, Role, StopReason, ToolCallRequest};
use crate::error::ProviderError;
use crate::tools::ToolDefinition;

use super::{GenerationParams, LlmResponse, ProviderKind, Usage};

/// Request path appended to the provider base URL.
pub const COMPLETIONS_PATH: &str = "/chat/completions";

/// Prefix marking failed tool results, which this dialect cannot flag.
const ERROR_PREFIX: &str = "Error: ";

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
    #[serde(default)]
    total_tokens: usize,
}

/// Encode the canonical log as a chat-completions `messages` array.
pub fn encode_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| match message.role {
            Role::System => json!({"role": "system", "content": message.content}),
            Role::User => json!({"role": "user", "content": message.content}),
            Role::Assistant => {
                let mut wire = json!({"role": "assistant", "content": message.content});
                if let Some(thinking) = &message.thinking {
                    wire["reasoning_content"] = json!(thinking);
                }
                if message.has_tool_calls() {
                    wire["tool_calls"] = Value::Array(
                        message
                            .tool_calls
                            .iter()
                            .map(|call| {
                                json!({
                                    "id": call.id,
                                    "type": "function",
                                    "function": {
                                        "name": call.name,
                                        "arguments": encode_arguments(&call.arguments),
                                    }
                                })
                            })
                            .collect(),
                    );
                }
                wire
            }
            Role::Tool => {
                let content = if message.is_error {
                    format!("{ERROR_PREFIX}{}", message.content)
                } else {
                    message.content.clone()
                };
                json!({
                    "role": "tool",
                    "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": content,
                })
            }
        })
        .collect()
}

/// Arguments the model produced as unparseable text go back verbatim.
fn encode_arguments(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

fn decode_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Build the full request body.
pub fn encode_request(messages: &[Message], tools: &[ToolDefinition], params: &GenerationParams) -> Value {
    let mut request = json!({
        "model": params.model,
        "messages": encode_messages(messages),
        "max_tokens": params.max_tokens,
    });

    if let Some(temperature) = params.temperature {
        request["temperature"] = json!(temperature);
    }
    if !params.stop_sequences.is_empty() {
        request["stop"] = json!(params.stop_sequences);
    }
    if !tools.is_empty() {
        request["tools"] = Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect(),
        );
    }

    request
}

/// Parse a chat-completions response into the canonical response.
pub fn decode_response(provider: ProviderKind, body: Value) -> Result<LlmResponse, ProviderError> {
    let malformed = |message: String| ProviderError::Upstream {
        provider,
        status: None,
        message,
    };

    let response: CompletionResponse = serde_json::from_value(body)
        .map_err(|e| malformed(format!("unexpected completion response: {e}")))?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| malformed("completion response has no choices".to_string()))?;

    let mut tool_calls: Vec<ToolCallRequest> = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| ToolCallRequest::new(call.id, call.function.name, decode_arguments(&call.function.arguments)))
        .collect();
    ensure_unique_ids(&mut tool_calls);

    let stop_reason = match choice.finish_reason.as_deref() {
        Some("tool_calls") | Some("function_call") => StopReason::ToolUse,
        Some("length") => StopReason::Length,
        _ if !tool_calls.is_empty() => StopReason::ToolUse,
        _ => StopReason::Stop,
    };

    let usage = response
        .usage
        .map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens.max(u.prompt_tokens + u.completion_tokens),
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        content: choice.message.content.unwrap_or_default(),
        thinking: choice.message.reasoning_content.filter(|t| !t.is_empty()),
        tool_calls,
        stop_reason,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolResult;

    #[test]
    fn test_encode_messages_shape() {
        let log = vec![
            Message::system("sys"),
            Message::user("hi"),
            Message::assistant_with_tools(
                "",
                vec![ToolCallRequest::new("call_1", "bash", json!({"command": "ls"}))],
            ),
            Message::tool_result("call_1", &ToolResult::fail("exit status 2")),
        ];
        let wire = encode_messages(&log);

        assert_eq!(wire[0], json!({"role": "system", "content": "sys"}));
        assert_eq!(wire[2]["tool_calls"][0]["type"], "function");
        assert_eq!(wire[2]["tool_calls"][0]["function"]["arguments"], "{\"command\":\"ls\"}");
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_1");
        assert_eq!(wire[3]["content"], "Error: exit status 2");
    }

    #[test]
    fn test_encode_request_includes_params_and_tools() {
        let tools = vec![ToolDefinition {
            name: "file_read".into(),
            description: "read".into(),
            parameters: json!({"type": "object"}),
        }];
        let mut params = GenerationParams::new("gpt-test");
        params.stop_sequences = vec!["END".into()];
        let body = encode_request(&[Message::user("x")], &tools, &params);

        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["max_tokens"], 16384);
        assert_eq!(body["stop"], json!(["END"]));
        assert_eq!(body["tools"][0]["function"]["name"], "file_read");
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_decode_text_response() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "OK"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
        });
        let response = decode_response(ProviderKind::OpenAiCompatible, body).unwrap();
        assert_eq!(response.content, "OK");
        assert_eq!(response.stop_reason, StopReason::Stop);
        assert_eq!(response.usage.total_tokens, 4);
    }

    #[test]
    fn test_decode_tool_calls_keeps_malformed_arguments() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "reasoning_content": "thinking...",
                    "tool_calls": [
                        {"id": "a", "type": "function", "function": {"name": "file_read", "arguments": "{\"path\":\"x\"}"}},
                        {"id": "b", "type": "function", "function": {"name": "bash", "arguments": "{not json"}},
                        {"id": "a", "type": "function", "function": {"name": "file_read", "arguments": ""}}
                    ]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let response = decode_response(ProviderKind::OpenAiCompatible, body).unwrap();
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.thinking.as_deref(), Some("thinking..."));
        assert_eq!(response.tool_calls[0].arguments, json!({"path": "x"}));
        assert_eq!(response.tool_calls[1].arguments, json!("{not json"));
        assert_eq!(response.tool_calls[2].arguments, json!({}));
        assert_ne!(response.tool_calls[2].id, "a");
    }

    #[test]
    fn test_decode_length_and_empty_choices() {
        let body = json!({"choices": [{"message": {"content": "trunc"}, "finish_reason": "length"}]});
        let response = decode_response(ProviderKind::OpenAiCompatible, body).unwrap();
        assert_eq!(response.stop_reason, StopReason::Length);

        let err = decode_response(ProviderKind::OpenAiCompatible, json!({"choices": []})).unwrap_err();
        assert!(matches!(err, ProviderError::Upstream { .. }));
    }
}
