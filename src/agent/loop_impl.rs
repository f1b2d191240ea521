//! Agent loop - drives a session from a prompt to a terminal message

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::events::{preview, AgentEvent, EventSink};
use super::llm::{LlmClient, Usage};
use super::message::{Message, StopReason};
use super::prompt;
use super::session::Session;
use crate::error::ProviderError;
use crate::tools::ToolRegistry;
use crate::Result;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    Stop,
    StepLimit,
    Cancelled,
    QuotaExhausted,
    AuthFailed,
    ProviderError,
}

impl Completion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Completion::Stop => "stop",
            Completion::StepLimit => "step_limit",
            Completion::Cancelled => "cancelled",
            Completion::QuotaExhausted => "quota_exhausted",
            Completion::AuthFailed => "auth_failed",
            Completion::ProviderError => "provider_error",
        }
    }
}

/// Result of one [`AgentLoop::run`].
#[derive(Debug, Clone)]
pub struct AgentReply {
    /// Terminal assistant message (also the last entry of the session log)
    pub message: Message,
    pub completion: Completion,
    /// Provider calls made
    pub steps: usize,
    pub usage: Usage,
}

impl AgentReply {
    pub fn content(&self) -> &str {
        &self.message.content
    }
}

/// The agent loop: provider calls and tool dispatch until a terminal message
pub struct AgentLoop {
    client: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    max_steps: usize,
    prompt_template: String,
}

impl AgentLoop {
    /// Create a new agent loop
    pub fn new(client: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>, max_steps: usize) -> Self {
        Self {
            client,
            tools,
            max_steps,
            prompt_template: prompt::DEFAULT_TEMPLATE.to_string(),
        }
    }

    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    pub fn client(&self) -> &Arc<dyn LlmClient> {
        &self.client
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Open a session whose log starts with the system prompt.
    pub fn new_session(&self, workspace: impl AsRef<Path>) -> Result<Session> {
        let session = Session::new(workspace)?;
        let system = prompt::build_system_prompt(&self.prompt_template, session.workspace(), &self.tools.definitions());
        Ok(session.with_system_prompt(system))
    }

    /// Run one user prompt to completion.
    ///
    /// Never fails: provider errors, the step limit, and cancellation all
    /// end in a terminal assistant message appended to the session.
    pub async fn run(&self, session: &mut Session, prompt: &str, sink: &dyn EventSink) -> AgentReply {
        let cancel = session.cancel_flag();
        cancel.reset();
        session.push(Message::user(prompt));

        let definitions = self.tools.definitions();
        let ctx = session.tool_context();
        let mut usage = Usage::default();
        let mut steps = 0;

        info!(session_id = %session.id(), provider = %self.client.provider(), "agent run started");

        let (message, completion) = loop {
            if cancel.is_cancelled() {
                break (
                    Message::terminal("Session cancelled. No further steps were run.", StopReason::Stop),
                    Completion::Cancelled,
                );
            }
            if steps >= self.max_steps {
                break (
                    Message::terminal(
                        format!(
                            "Step limit reached ({} steps) before the task finished. Send another prompt to continue.",
                            self.max_steps
                        ),
                        StopReason::Stop,
                    ),
                    Completion::StepLimit,
                );
            }

            steps += 1;
            sink.emit(session.id(), &AgentEvent::Processing { step: steps });
            debug!(session_id = %session.id(), step = steps, max_steps = self.max_steps, "calling provider");

            let response = match self.client.chat(session.messages(), &definitions).await {
                Ok(response) => response,
                Err(error) => break provider_failure(&error),
            };
            usage.add(&response.usage);

            if let Some(thinking) = response.thinking.as_deref().filter(|t| !t.is_empty()) {
                sink.emit(session.id(), &AgentEvent::Thinking { text: thinking.to_string() });
            }

            if !response.has_tool_calls() {
                let mut message = response.into_message();
                if message.stop_reason != Some(StopReason::Length) {
                    message.stop_reason = Some(StopReason::Stop);
                }
                break (message, Completion::Stop);
            }

            let message = response.into_message();
            let calls = message.tool_calls.clone();
            session.push(message);

            for call in &calls {
                sink.emit(
                    session.id(),
                    &AgentEvent::ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                );
            }

            let results = self.tools.dispatch(&calls, &ctx, &cancel).await;
            for (call, result) in calls.iter().zip(results) {
                let shown = if result.success {
                    result.content.as_str()
                } else {
                    result.error.as_deref().unwrap_or_default()
                };
                sink.emit(
                    session.id(),
                    &AgentEvent::ToolResult {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        success: result.success,
                        preview: preview(shown, 200),
                    },
                );
                session.push(Message::tool_result(call.id.clone(), &result));
            }
        };

        session.push(message.clone());
        sink.emit(session.id(), &AgentEvent::Finished { completion });
        info!(
            session_id = %session.id(),
            steps,
            completion = completion.as_str(),
            total_tokens = usage.total_tokens,
            "agent run finished"
        );

        AgentReply {
            message,
            completion,
            steps,
            usage,
        }
    }
}

fn provider_failure(error: &ProviderError) -> (Message, Completion) {
    warn!(error = %error, "provider call failed");
    let (text, completion) = match error {
        ProviderError::Quota { .. } => (
            format!(
                "The provider quota or rate limit is exhausted ({error}). \
                 Wait and send the prompt again; this session is still usable."
            ),
            Completion::QuotaExhausted,
        ),
        ProviderError::Auth { provider, .. } => (
            format!("Authentication with {provider} failed ({error}). Check api_key in config.yaml."),
            Completion::AuthFailed,
        ),
        ProviderError::BadRequest { provider, .. } => (
            format!("{provider} rejected the request ({error})."),
            Completion::ProviderError,
        ),
        ProviderError::Transport { .. } | ProviderError::Upstream { .. } => (
            format!("The provider could not be reached after retries ({error})."),
            Completion::ProviderError,
        ),
    };
    (Message::terminal(text, StopReason::Error), completion)
}
