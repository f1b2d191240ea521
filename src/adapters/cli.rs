//! CLI adapter: single task and interactive REPL.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use super::Channel;
use crate::agent::{AgentLoop, AgentReply, Completion, Role, Session, StdoutSink};
use crate::error::Error;
use crate::{ui, Result};

/// Exit status after an interrupt.
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, PartialEq, Eq)]
enum ReplCommand {
    Exit,
    Clear,
    History,
    Help,
    Unknown(String),
}

fn parse_command(input: &str) -> Option<ReplCommand> {
    let lowered = input.to_lowercase();
    match lowered.as_str() {
        "/exit" | "/quit" | "exit" | "quit" | "q" => Some(ReplCommand::Exit),
        "/clear" => Some(ReplCommand::Clear),
        "/history" => Some(ReplCommand::History),
        "/help" => Some(ReplCommand::Help),
        other if other.starts_with('/') => Some(ReplCommand::Unknown(input.to_string())),
        _ => None,
    }
}

/// CLI channel bound to one session.
pub struct CliChannel {
    agent: Arc<AgentLoop>,
    session: Session,
    sink: StdoutSink,
    busy: Arc<AtomicBool>,
}

impl CliChannel {
    pub fn new(agent: Arc<AgentLoop>, workspace: &Path) -> Result<Self> {
        let session = agent.new_session(workspace)?;
        Ok(Self {
            agent,
            session,
            sink: StdoutSink::default(),
            busy: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.sink.verbose = verbose;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Ctrl-C cancels the running prompt; at an idle prompt it exits with 130.
    pub fn install_interrupt_handler(&self) -> Result<()> {
        let cancel = self.session.cancel_flag();
        let busy = self.busy.clone();
        ctrlc::set_handler(move || {
            if busy.load(Ordering::SeqCst) && !cancel.is_cancelled() {
                cancel.cancel();
                eprintln!("\nCancelling, press Ctrl+C again to quit");
            } else {
                eprintln!();
                std::process::exit(EXIT_INTERRUPTED);
            }
        })
        .map_err(|e| Error::Other(format!("Failed to install Ctrl+C handler: {e}")))
    }

    /// Run one prompt on the session.
    pub async fn run_once(&mut self, prompt: &str) -> AgentReply {
        self.busy.store(true, Ordering::SeqCst);
        let reply = self.agent.run(&mut self.session, prompt, &self.sink).await;
        self.busy.store(false, Ordering::SeqCst);
        reply
    }

    /// Run the interactive REPL until exit or EOF.
    pub async fn run_interactive(&mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            print!("\n> ");
            std::io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let input = line.trim();
            if input.is_empty() {
                continue;
            }

            if let Some(command) = parse_command(input) {
                if !self.apply(command) {
                    break;
                }
                continue;
            }

            let reply = self.run_once(input).await;
            match reply.completion {
                Completion::Stop | Completion::StepLimit | Completion::Cancelled => {
                    ui::print_assistant(reply.content())
                }
                _ => ui::print_error(reply.content()),
            }
        }

        Ok(())
    }

    /// Apply a REPL command. Returns false when the REPL should end.
    fn apply(&mut self, command: ReplCommand) -> bool {
        match command {
            ReplCommand::Exit => {
                println!("Bye!");
                return false;
            }
            ReplCommand::Clear => {
                self.session.clear();
                ui::print_success("Conversation cleared");
            }
            ReplCommand::History => {
                let messages = self.session.messages();
                let turns = messages.iter().filter(|m| m.role == Role::User).count();
                ui::print_step(&format!("{} messages, {} user turns", messages.len(), turns));
            }
            ReplCommand::Help => ui::print_help(),
            ReplCommand::Unknown(cmd) => ui::print_warning(&format!("Unknown command: {cmd}")),
        }
        true
    }
}

impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(mut self) -> Result<()> {
        self.run_interactive().await
    }
}
