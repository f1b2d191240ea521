//! Write-only progress events emitted by the agent loop.

use serde::Serialize;
use serde_json::Value;

use crate::ui;

use super::loop_impl::Completion;

/// Progress of one agent run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// About to call the provider for step `step` (1-based).
    Processing { step: usize },
    Thinking { text: String },
    ToolCall { id: String, name: String, arguments: Value },
    ToolResult { id: String, name: String, success: bool, preview: String },
    Finished { completion: Completion },
}

/// Receives events; implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, session_id: &str, event: &AgentEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _session_id: &str, _event: &AgentEvent) {}
}

/// Terminal progress for the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink {
    pub verbose: bool,
}

impl EventSink for StdoutSink {
    fn emit(&self, _session_id: &str, event: &AgentEvent) {
        match event {
            AgentEvent::Processing { step } if self.verbose => ui::print_step(&format!("Step {step}")),
            AgentEvent::Processing { .. } => {}
            AgentEvent::Thinking { text } => ui::print_thinking(text),
            AgentEvent::ToolCall { name, arguments, .. } => ui::print_tool_call(name, arguments),
            AgentEvent::ToolResult { name, success, preview, .. } => ui::print_tool_result(name, *success, preview),
            AgentEvent::Finished { completion } => {
                if *completion != Completion::Stop {
                    ui::print_warning(&format!("Run ended: {}", completion.as_str()));
                }
            }
        }
    }
}

/// Collects events in memory.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub events: std::sync::Mutex<Vec<AgentEvent>>,
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn emit(&self, _session_id: &str, event: &AgentEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Short single-line preview of tool output.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let mut out: String = flat.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization() {
        let event = AgentEvent::ToolResult {
            id: "tc_1".into(),
            name: "bash".into(),
            success: true,
            preview: "exit code: 0".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "tool_result");
        assert_eq!(value["success"], true);

        let value = serde_json::to_value(AgentEvent::Finished { completion: Completion::QuotaExhausted }).unwrap();
        assert_eq!(value, json!({"kind": "finished", "completion": "quota_exhausted"}));
    }

    #[test]
    fn test_preview_flattens_and_cuts() {
        assert_eq!(preview("a\n  b", 10), "a b");
        assert_eq!(preview("abcdef", 3), "abc…");
    }
}
