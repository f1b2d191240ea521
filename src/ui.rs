use std::path::Path;

use colored::*;
use serde_json::Value;
use terminal_size::{terminal_size, Height, Width};

use crate::agent::events::preview;

fn rule() -> String {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    "─".repeat(width.0 as usize)
}

pub fn print_banner(model: &str, provider: &str, workspace: &Path) {
    let line = rule();
    println!("{}", line.black().bold());

    let name = "Mini-Agent".cyan().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  {} {}", name, version);
    println!("{}", format!("  {}  •  {}", model, provider).cyan());
    println!("  {}", workspace.to_string_lossy().black().bold());
    println!("  {}", "/help for commands, /exit to quit".black().bold());

    println!("{}", line.black().bold());
}

pub fn print_help() {
    println!("  {}      leave the session", "/exit".cyan());
    println!("  {}     forget the conversation, keep the system prompt", "/clear".cyan());
    println!("  {}   show the number of logged messages", "/history".cyan());
    println!("  {}      this list", "/help".cyan());
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    println!("  {} {}", "❌".red().bold(), msg.red());
}

pub fn print_thinking(msg: &str) {
    println!("  {} {}", "∴".magenta(), preview(msg, 160).dimmed());
}

pub fn print_tool_call(name: &str, arguments: &Value) {
    let args = match arguments {
        Value::Object(map) if map.is_empty() => String::new(),
        other => preview(&other.to_string(), 120),
    };
    println!("  {} {} {}", "→".blue().bold(), name.blue().bold(), args.dimmed());
}

pub fn print_tool_result(name: &str, success: bool, summary: &str) {
    if success {
        println!("  {} {} {}", "✓".green(), name.green(), summary.dimmed());
    } else {
        println!("  {} {} {}", "✗".red(), name.red(), summary.red());
    }
}

pub fn print_assistant(text: &str) {
    println!("\n{}", text);
}
