//! Chat client shared by every provider: one dialect, one HTTP endpoint.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::agent::message::Message;
use crate::error::ProviderError;
use crate::tools::ToolDefinition;
use crate::Result;

use super::http::{ApiClient, AuthStyle};
use super::{anthropic, openai, GenerationParams, LlmClient, LlmResponse, ProviderKind, RetryPolicy};

pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const ZAI_ANTHROPIC_API_BASE: &str = "https://api.z.ai/api/anthropic";
pub const ZAI_OPENAI_API_BASE: &str = "https://api.z.ai/api/coding/paas/v4";

/// Message shape spoken on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Anthropic,
    OpenAi,
}

impl Dialect {
    pub fn path(&self) -> &'static str {
        match self {
            Dialect::Anthropic => anthropic::MESSAGES_PATH,
            Dialect::OpenAi => openai::COMPLETIONS_PATH,
        }
    }

    pub fn encode(&self, messages: &[Message], tools: &[ToolDefinition], params: &GenerationParams) -> Value {
        match self {
            Dialect::Anthropic => anthropic::encode_request(messages, tools, params),
            Dialect::OpenAi => openai::encode_request(messages, tools, params),
        }
    }

    pub fn decode(&self, provider: ProviderKind, body: Value) -> std::result::Result<LlmResponse, ProviderError> {
        match self {
            Dialect::Anthropic => anthropic::decode_response(provider, body),
            Dialect::OpenAi => openai::decode_response(provider, body),
        }
    }

    /// Base URL used when the config leaves `api_base` empty.
    pub fn default_base(&self, provider: ProviderKind) -> &'static str {
        match (provider, self) {
            (ProviderKind::ZaiCodingPlan, Dialect::Anthropic) => ZAI_ANTHROPIC_API_BASE,
            (ProviderKind::ZaiCodingPlan, Dialect::OpenAi) => ZAI_OPENAI_API_BASE,
            (_, Dialect::Anthropic) => ANTHROPIC_API_BASE,
            (_, Dialect::OpenAi) => OPENAI_API_BASE,
        }
    }

    /// Anthropic's own API takes `x-api-key`; everyone else takes a bearer token.
    pub fn auth_style(&self, provider: ProviderKind) -> AuthStyle {
        match (provider, self) {
            (ProviderKind::AnthropicCompatible, Dialect::Anthropic) => AuthStyle::ApiKeyHeader,
            _ => AuthStyle::Bearer,
        }
    }
}

/// [`LlmClient`] over a single HTTP chat endpoint.
pub struct HttpChatClient {
    api: ApiClient,
    dialect: Dialect,
    params: GenerationParams,
}

impl HttpChatClient {
    pub fn new(
        provider: ProviderKind,
        dialect: Dialect,
        api_base: &str,
        api_key: &str,
        params: GenerationParams,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let base = if api_base.trim().is_empty() {
            dialect.default_base(provider)
        } else {
            api_base.trim()
        };
        let api = ApiClient::new(provider, base, api_key, dialect.auth_style(provider), retry)?;
        Ok(Self { api, dialect, params })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn base_url(&self) -> &str {
        self.api.base_url()
    }
}

#[async_trait]
impl LlmClient for HttpChatClient {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> std::result::Result<LlmResponse, ProviderError> {
        let body = self.dialect.encode(messages, tools, &self.params);
        debug!(
            provider = %self.api.provider(),
            model = %self.params.model,
            messages = messages.len(),
            tools = tools.len(),
            "chat request"
        );

        let provider = self.api.provider();
        let dialect = self.dialect;
        let api = &self.api;
        let body = &body;
        // Decode inside the retry so a malformed body is retried like any upstream failure.
        self.api
            .retry_policy()
            .run(provider, || async move {
                let value = api.post_once(dialect.path(), body).await?;
                dialect.decode(provider, value)
            })
            .await
    }

    fn provider(&self) -> ProviderKind {
        self.api.provider()
    }

    fn model(&self) -> &str {
        &self.params.model
    }
}
