//! LLM client abstraction layer.
//!
//! This module provides:
//! - [`LlmClient`] trait: "given an ordered message log and optional tool
//!   descriptors, return the next assistant message"
//! - [`ProviderKind`], the closed set of vendor dialects
//! - [`ProviderRegistry`] for building a client from configuration
//!
//! Each dialect is a pair of pure functions (encode a canonical request,
//! decode a vendor response) in [`anthropic`] and [`openai`]; the HTTP
//! plumbing and retry policy are shared by every provider.

pub mod anthropic;
pub mod chat;
pub mod http;
pub mod openai;
pub mod retry;
pub mod zai;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, ProviderError};
use crate::gate::CreditGate;
use crate::tools::ToolDefinition;
use crate::Result;

pub use chat::{Dialect, HttpChatClient};
pub use retry::RetryPolicy;
pub use zai::ZaiClient;

use super::message::{Message, StopReason, ToolCallRequest};

/// Vendor family a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "anthropic-compatible", alias = "anthropic")]
    AnthropicCompatible,
    #[serde(rename = "openai-compatible", alias = "openai")]
    OpenAiCompatible,
    #[serde(rename = "zai-coding-plan", alias = "zai")]
    ZaiCodingPlan,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::AnthropicCompatible => "anthropic-compatible",
            ProviderKind::OpenAiCompatible => "openai-compatible",
            ProviderKind::ZaiCodingPlan => "zai-coding-plan",
        }
    }

    /// Model used when the config leaves `model` empty.
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::AnthropicCompatible => "claude-sonnet-4-5",
            ProviderKind::OpenAiCompatible => "gpt-4o",
            ProviderKind::ZaiCodingPlan => "glm-4.6",
        }
    }

    /// Environment variable consulted when `api_key` is empty.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::AnthropicCompatible => "ANTHROPIC_API_KEY",
            ProviderKind::OpenAiCompatible => "OPENAI_API_KEY",
            ProviderKind::ZaiCodingPlan => "ZAI_API_KEY",
        }
    }
}

impl Default for ProviderKind {
    fn default() -> Self {
        ProviderKind::AnthropicCompatible
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "anthropic-compatible" | "anthropic" => Ok(ProviderKind::AnthropicCompatible),
            "openai-compatible" | "openai" => Ok(ProviderKind::OpenAiCompatible),
            "zai-coding-plan" | "zai" => Ok(ProviderKind::ZaiCodingPlan),
            other => Err(Error::Config(format!("Unknown provider: {other}"))),
        }
    }
}

/// Generation parameters passed with every chat call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    /// Vendor stop sequences; a hit terminates the turn with `stop`.
    pub stop_sequences: Vec<String>,
}

impl GenerationParams {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: 16384,
            temperature: None,
            stop_sequences: Vec::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model_name().to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stop_sequences: config.stop_sequences.clone(),
        }
    }
}

/// Response from an LLM provider.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    /// Text content of the response.
    pub content: String,

    /// Reasoning content, when the vendor returns it separately.
    pub thinking: Option<String>,

    /// Tool calls requested by the LLM.
    pub tool_calls: Vec<ToolCallRequest>,

    /// Reason the response finished.
    pub stop_reason: StopReason,

    /// Token usage statistics.
    pub usage: Usage,
}

impl LlmResponse {
    /// Create a simple text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            thinking: None,
            tool_calls: vec![],
            stop_reason: StopReason::Stop,
            usage: Usage::default(),
        }
    }

    /// Create a response that only requests tools.
    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: String::new(),
            thinking: None,
            tool_calls: calls,
            stop_reason: StopReason::ToolUse,
            usage: Usage::default(),
        }
    }

    /// Check if response has tool calls.
    #[inline]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Convert into the canonical assistant message.
    pub fn into_message(self) -> Message {
        let mut message = Message::assistant_with_tools(self.content, self.tool_calls);
        message.thinking = self.thinking;
        message.with_stop_reason(self.stop_reason)
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// LLM client trait: one implementation per wire dialect.
///
/// Implementations own their retry policy: an `Err` returned here is final.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send messages and get the next assistant turn.
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> std::result::Result<LlmResponse, ProviderError>;

    /// Vendor family behind this client.
    fn provider(&self) -> ProviderKind;

    /// Model identifier passed to the vendor.
    fn model(&self) -> &str;
}

/// Provider registry: creates LLM clients from configuration.
///
/// # Example
///
/// ```ignore
/// let client = ProviderRegistry::create(&config, &gate)?;
/// let response = client.chat(&messages, &tools).await?;
/// ```
pub struct ProviderRegistry;

impl ProviderRegistry {
    /// Create an LLM client from configuration.
    ///
    /// The Z.AI family is only built when the credit gate admits it.
    pub fn create(config: &Config, gate: &CreditGate) -> Result<Arc<dyn LlmClient>> {
        let retry = RetryPolicy::from_config(&config.retry);
        let params = GenerationParams::from_config(config);
        let api_key = config.resolved_api_key();

        let client: Arc<dyn LlmClient> = match config.provider {
            ProviderKind::AnthropicCompatible => Arc::new(HttpChatClient::new(
                ProviderKind::AnthropicCompatible,
                Dialect::Anthropic,
                &config.api_base,
                &api_key,
                params,
                retry,
            )?),
            ProviderKind::OpenAiCompatible => Arc::new(HttpChatClient::new(
                ProviderKind::OpenAiCompatible,
                Dialect::OpenAi,
                &config.api_base,
                &api_key,
                params,
                retry,
            )?),
            ProviderKind::ZaiCodingPlan => Arc::new(zai::chat_client(
                config.zai.chat_api,
                &config.api_base,
                &api_key,
                params,
                retry,
                gate,
            )?),
        };

        Ok(client)
    }

    /// List available provider names.
    pub fn available() -> &'static [&'static str] {
        &["anthropic-compatible", "openai-compatible", "zai-coding-plan"]
    }
}

/// Scripted LLM client for testing.
#[cfg(test)]
pub(crate) struct FakeLlmClient {
    responses: std::sync::Mutex<std::collections::VecDeque<std::result::Result<LlmResponse, ProviderError>>>,
    seen: std::sync::Mutex<Vec<Vec<Message>>>,
    delay: Option<std::time::Duration>,
}

#[cfg(test)]
impl FakeLlmClient {
    /// Create with predefined text responses.
    pub fn new(responses: Vec<&str>) -> Self {
        Self::scripted(responses.into_iter().map(|s| Ok(LlmResponse::text(s))).collect())
    }

    /// Create with an arbitrary script of responses and failures.
    pub fn scripted(script: Vec<std::result::Result<LlmResponse, ProviderError>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(script.into()),
            seen: std::sync::Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Create with a single tool call followed by a text response.
    pub fn with_tool_call(name: &str, args: serde_json::Value, final_response: &str) -> Self {
        Self::scripted(vec![
            Ok(LlmResponse::tool_calls(vec![ToolCallRequest::new("tc_1", name, args)])),
            Ok(LlmResponse::text(final_response)),
        ])
    }

    /// Sleep before answering, to keep a call in flight.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of chat calls made so far.
    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Message log passed to the n-th call.
    pub fn request(&self, n: usize) -> Vec<Message> {
        self.seen.lock().unwrap()[n].clone()
    }
}

#[cfg(test)]
#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn chat(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> std::result::Result<LlmResponse, ProviderError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut responses = self.responses.lock().unwrap();
        responses.pop_front().unwrap_or_else(|| {
            Err(ProviderError::Upstream {
                provider: ProviderKind::AnthropicCompatible,
                status: None,
                message: "No more fake responses".to_string(),
            })
        })
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::AnthropicCompatible
    }

    fn model(&self) -> &str {
        "fake-model"
    }
}
