//! Configuration management
//!
//! The config document is YAML (or JSON when the file ends in `.json`).
//! Every key is optional; `${VAR}` placeholders in credentials and base
//! URLs are substituted from the environment at load time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::agent::llm::zai::ZaiChatApi;
use crate::agent::llm::ProviderKind;
use crate::error::Error;
use crate::Result;

/// Overrides `workspace_dir` from the environment.
pub const WORKSPACE_ENV: &str = "MINI_AGENT_WORKSPACE";

const ENV_PLACEHOLDER: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Provider family
    #[serde(default)]
    pub provider: ProviderKind,

    /// Base URL; empty means the provider's default
    #[serde(default)]
    pub api_base: String,

    /// Model identifier; empty means the provider's default
    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: Option<f32>,

    /// Vendor stop sequences
    #[serde(default)]
    pub stop_sequences: Vec<String>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub zai: ZaiConfig,

    #[serde(default)]
    pub rpc: RpcConfig,

    /// Default session root
    #[serde(default)]
    pub workspace_dir: Option<PathBuf>,
}

/// Provider retry settings. Delays are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub initial_delay: f64,
    pub max_delay: f64,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_delay: 1.0,
            max_delay: 60.0,
            exponential_base: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Provider calls allowed per prompt
    pub max_steps: usize,
    pub system_prompt_path: Option<PathBuf>,
    /// Default per-tool timeout
    pub tool_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            system_prompt_path: None,
            tool_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub enable_file_tools: bool,
    pub enable_bash: bool,
    pub enable_zai_search: bool,
    pub enable_zai_llm: bool,
    pub bash_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enable_file_tools: true,
            enable_bash: true,
            enable_zai_search: false,
            enable_zai_llm: false,
            bash_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZaiConfig {
    /// Falls back to `api_key` (zai provider) or `ZAI_API_KEY`
    pub api_key: String,
    pub web_api_base: String,
    pub search_engine: String,
    pub chat_api: ZaiChatApi,
}

impl Default for ZaiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            web_api_base: String::new(),
            search_engine: "search-prime".to_string(),
            chat_api: ZaiChatApi::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub ws_addr: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            ws_addr: "127.0.0.1:8765".to_string(),
        }
    }
}

fn default_max_tokens() -> u32 {
    16384
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            api_base: String::new(),
            model: String::new(),
            api_key: String::new(),
            max_tokens: default_max_tokens(),
            temperature: None,
            stop_sequences: Vec::new(),
            retry: RetryConfig::default(),
            agent: AgentConfig::default(),
            tools: ToolsConfig::default(),
            zai: ZaiConfig::default(),
            rpc: RpcConfig::default(),
            workspace_dir: None,
        }
    }
}

impl Config {
    /// Model passed to the vendor.
    pub fn model_name(&self) -> &str {
        if self.model.trim().is_empty() {
            self.provider.default_model()
        } else {
            &self.model
        }
    }

    /// `api_key`, else the provider's conventional environment variable.
    pub fn resolved_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }
        std::env::var(self.provider.api_key_env()).unwrap_or_default()
    }

    /// Key for the Z.AI web endpoints.
    pub fn zai_api_key(&self) -> String {
        if !self.zai.api_key.is_empty() {
            return self.zai.api_key.clone();
        }
        if self.provider == ProviderKind::ZaiCodingPlan && !self.api_key.is_empty() {
            return self.api_key.clone();
        }
        std::env::var(ProviderKind::ZaiCodingPlan.api_key_env()).unwrap_or_default()
    }

    /// Session root: CLI flag, then `MINI_AGENT_WORKSPACE`, then
    /// `workspace_dir`, then the current directory.
    pub fn workspace(&self, cli: Option<&Path>) -> PathBuf {
        if let Some(dir) = cli {
            return dir.to_path_buf();
        }
        if let Some(dir) = env_workspace() {
            return dir;
        }
        self.workspace_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Reject settings that can never work.
    pub fn validate(&self) -> Result<()> {
        if !self.retry.exponential_base.is_finite() || self.retry.exponential_base < 1.0 {
            return Err(Error::Config(format!(
                "retry.exponential_base must be >= 1.0, got {}",
                self.retry.exponential_base
            )));
        }
        if self.retry.initial_delay < 0.0 || self.retry.max_delay < 0.0 {
            return Err(Error::Config("retry delays must not be negative".to_string()));
        }
        if self.max_tokens == 0 {
            return Err(Error::Config("max_tokens must be greater than 0".to_string()));
        }
        if self.resolved_api_key().trim().is_empty() {
            return Err(Error::Config(format!(
                "Missing API key for {}: set api_key in config.yaml or export {}",
                self.provider,
                self.provider.api_key_env()
            )));
        }
        Ok(())
    }

    fn substitute_placeholders(&mut self) {
        self.api_key = substitute_env(&self.api_key);
        self.api_base = substitute_env(&self.api_base);
        self.zai.api_key = substitute_env(&self.zai.api_key);
    }
}

fn env_workspace() -> Option<PathBuf> {
    std::env::var_os(WORKSPACE_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Get the user config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mini-agent")
        .join("config")
}

/// Config files to try, in priority order.
///
/// An explicit path is the only candidate when given.
pub fn candidate_paths(explicit: Option<&Path>, workspace: &Path) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }
    vec![
        workspace.join("mini_agent").join("config").join("config.yaml"),
        workspace.join("config.yaml"),
        config_dir().join("config.yaml"),
    ]
}

/// Workspace used to look for config before the config itself is read.
pub fn bootstrap_workspace(cli: Option<&Path>) -> PathBuf {
    cli.map(Path::to_path_buf)
        .or_else(env_workspace)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Replace `${VAR}` with the variable's value; unset variables become empty.
pub fn substitute_env(input: &str) -> String {
    if !input.contains("${") {
        return input.to_string();
    }
    let Ok(pattern) = regex::Regex::new(ENV_PLACEHOLDER) else {
        return input.to_string();
    };
    pattern
        .replace_all(input, |caps: &regex::Captures| std::env::var(&caps[1]).unwrap_or_default())
        .into_owned()
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Parse a config document; placeholders are substituted, nothing is validated.
pub fn parse(content: &str, json: bool) -> Result<Config> {
    let mut config: Config = if json {
        serde_json::from_str(content)?
    } else if content.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(content)?
    };
    config.substitute_placeholders();
    Ok(config)
}

/// Read one config file.
pub fn load_from(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;
    parse(&content, is_json(path))
        .map_err(|e| Error::Config(format!("Failed to parse {}: {e}", path.display())))
}

/// Load the first config file that exists, returning it with its path.
pub fn load(explicit: Option<&Path>, workspace: &Path) -> Result<(Config, PathBuf)> {
    let candidates = candidate_paths(explicit, workspace);
    let Some(path) = candidates.iter().find(|p| p.is_file()) else {
        let looked = candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(Error::Config(format!("Config not found; looked in: {looked}")));
    };

    debug!(path = %path.display(), "loading config");
    let config = load_from(path)?;
    Ok((config, path.clone()))
}
