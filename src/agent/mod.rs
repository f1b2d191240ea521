//! Agent module: core agent logic.
//!
//! This module contains:
//! - Canonical message types
//! - LLM client trait and the provider adapters
//! - Sessions, the system prompt, and progress events
//! - Agent loop for driving a prompt to a terminal message

pub mod events;
mod loop_impl;
pub mod message;
pub mod prompt;
pub mod session;

// LLM providers in submodule
pub mod llm;

// Re-exports for convenience
pub use events::{AgentEvent, EventSink, NullSink, StdoutSink};
pub use llm::{LlmClient, LlmResponse, ProviderKind, ProviderRegistry, Usage};
pub use loop_impl::{AgentLoop, AgentReply, Completion};
pub use message::{Message, Role, StopReason, ToolCallRequest};
pub use session::{CancelFlag, Session};
