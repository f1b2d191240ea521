//! Error types for Mini-Agent

use std::time::Duration;
use thiserror::Error;

use crate::agent::llm::ProviderKind;

/// Result type alias for Mini-Agent operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Mini-Agent
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Z.AI tools are disabled: set `{key}: true` in config.yaml to enable them")]
    CreditGate { key: &'static str },

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

/// Uniform failure taxonomy surfaced by every provider adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("{provider}: authentication failed: {message}")]
    Auth { provider: ProviderKind, message: String },

    #[error("{provider}: quota or rate limit reached: {message}")]
    Quota {
        provider: ProviderKind,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("{provider}: request rejected: {message}")]
    BadRequest { provider: ProviderKind, message: String },

    #[error("{provider}: transport failure: {message}")]
    Transport { provider: ProviderKind, message: String },

    #[error("{provider}: upstream failure{}: {message}", status_suffix(.status))]
    Upstream {
        provider: ProviderKind,
        status: Option<u16>,
        message: String,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl ProviderError {
    /// Whether the retry policy may attempt the call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Quota { .. }
                | ProviderError::Transport { .. }
                | ProviderError::Upstream { .. }
        )
    }

    pub fn provider(&self) -> ProviderKind {
        match self {
            ProviderError::Auth { provider, .. }
            | ProviderError::Quota { provider, .. }
            | ProviderError::BadRequest { provider, .. }
            | ProviderError::Transport { provider, .. }
            | ProviderError::Upstream { provider, .. } => *provider,
        }
    }

    /// Vendor-reported retry-after, only ever present on quota errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::Quota { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
