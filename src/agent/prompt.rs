//! System prompt builder.
//!
//! The template is embedded by default and may be replaced through
//! `agent.system_prompt_path`. Placeholders: `{workspace}`, `{tools}`,
//! `{date}`.

use std::path::Path;

use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

pub const DEFAULT_TEMPLATE: &str = r#"You are Mini-Agent, a coding and research assistant that works through tools.

## Current Date
{date}

## Workspace
Your workspace is: `{workspace}`

File paths are relative to the workspace. Paths that leave the workspace
are rejected, so do not retry them.

## Tools
{tools}

## Guidelines
- Use a tool when it gets you a fact faster than guessing.
- Read a file before editing it.
- Web search returns summaries; read a page only when you need its body.
- Do not repeat a tool call whose result you already have.
- When the task is done, answer plainly without calling more tools."#;

/// Load the template from `path`, or the embedded default.
pub fn load_template(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read system prompt {}: {e}", path.display()))
        }),
        None => Ok(DEFAULT_TEMPLATE.to_string()),
    }
}

/// Fill the template for one session.
pub fn build_system_prompt(template: &str, workspace: &Path, tools: &[ToolDefinition]) -> String {
    let tools_section = if tools.is_empty() {
        "No tools are available in this session; answer directly.".to_string()
    } else {
        let mut lines = Vec::with_capacity(tools.len());
        for tool in tools {
            let summary = tool.description.lines().next().unwrap_or_default();
            lines.push(format!("- `{}` - {}", tool.name, summary));
        }
        lines.join("\n")
    };

    template
        .replace("{date}", &chrono::Local::now().format("%Y-%m-%d (%A)").to_string())
        .replace("{workspace}", &workspace.display().to_string())
        .replace("{tools}", &tools_section)
}
