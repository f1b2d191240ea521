//! Sessions: one conversation bound to one workspace.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::tools::ToolContext;
use crate::Result;

use super::message::{Message, Role};

/// Shared cancelled flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// In-memory conversation state.
#[derive(Debug)]
pub struct Session {
    id: String,
    workspace: PathBuf,
    messages: Vec<Message>,
    cancel: CancelFlag,
    created_at: DateTime<Utc>,
}

impl Session {
    /// Create a session rooted at `workspace`, creating the directory if
    /// needed and resolving it to an absolute path.
    pub fn new(workspace: impl AsRef<Path>) -> Result<Self> {
        let workspace = workspace.as_ref();
        std::fs::create_dir_all(workspace).map_err(|e| {
            Error::Config(format!("Cannot create workspace {}: {e}", workspace.display()))
        })?;
        let workspace = workspace.canonicalize()?;

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace,
            messages: Vec::new(),
            cancel: CancelFlag::new(),
            created_at: Utc::now(),
        })
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.messages.insert(0, Message::system(prompt));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Append to the log. The log is never rewritten mid-turn.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Drop the conversation, keeping the system prompt.
    pub fn clear(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
    }

    /// Handle for cancelling this session from elsewhere.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn tool_context(&self) -> ToolContext {
        ToolContext::new(self.workspace.clone())
    }
}
