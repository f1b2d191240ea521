//! Mini-Agent CLI entry point

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mini_agent::adapters::cli::{CliChannel, EXIT_INTERRUPTED};
use mini_agent::adapters::rpc::RpcServer;
use mini_agent::adapters::{Channel, ChannelRegistry, StdioChannel, WsChannel};
use mini_agent::agent::{prompt, AgentLoop, Completion, ProviderRegistry};
use mini_agent::config::{self, Config};
use mini_agent::gate::{self, CreditGate};
use mini_agent::tools::ToolRegistry;
use mini_agent::ui;

#[derive(Parser)]
#[command(name = "mini-agent")]
#[command(about = "Minimal coding agent for Anthropic-, OpenAI- and Z.AI-compatible models")]
#[command(version)]
struct Cli {
    /// Session root (overrides MINI_AGENT_WORKSPACE and workspace_dir)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Config file (skips the default search path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Run one prompt and exit
    #[arg(short, long)]
    task: Option<String>,

    /// Show every step
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-RPC on stdio, or on a WebSocket with --ws
    Serve {
        /// Listen address for the WebSocket transport
        #[arg(long, value_name = "ADDR")]
        ws: Option<Option<String>>,
    },

    /// Show the resolved configuration
    Status,
}

/// Everything resolved at startup.
struct Runtime {
    config: Config,
    workspace: PathBuf,
    agent: Arc<AgentLoop>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Stdout carries RPC frames in serve mode.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("mini-agent: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Some(Commands::Status) => {
            print_status(&cli)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Serve { ref ws }) => {
            let runtime = startup(&cli)?;
            let server = Arc::new(RpcServer::new(runtime.agent));
            match ws {
                Some(addr) => {
                    let addr = addr.clone().unwrap_or_else(|| runtime.config.rpc.ws_addr.clone());
                    WsChannel::new(server, addr).start().await?;
                }
                None => StdioChannel::new(server).start().await?,
            }
            Ok(ExitCode::SUCCESS)
        }
        None => {
            let runtime = startup(&cli)?;
            let mut channel = CliChannel::new(runtime.agent.clone(), &runtime.workspace)
                .context("Failed to open session")?
                .verbose(cli.verbose);
            channel.install_interrupt_handler()?;

            if let Some(task) = &cli.task {
                let reply = channel.run_once(task).await;
                return Ok(match reply.completion {
                    Completion::Stop | Completion::StepLimit => {
                        ui::print_assistant(reply.content());
                        ExitCode::SUCCESS
                    }
                    Completion::Cancelled => ExitCode::from(EXIT_INTERRUPTED as u8),
                    _ => {
                        ui::print_error(reply.content());
                        ExitCode::FAILURE
                    }
                });
            }

            let client = runtime.agent.client();
            ui::print_banner(client.model(), client.provider().as_str(), channel.session().workspace());
            channel.start().await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Config, gate, provider, tools, agent; in that order.
fn startup(cli: &Cli) -> Result<Runtime> {
    let probe = config::bootstrap_workspace(cli.workspace.as_deref());
    let (config, path) = config::load(cli.config.as_deref(), &probe)?;
    let gate = gate::init_from(&config::candidate_paths(cli.config.as_deref(), &probe));
    config.validate()?;

    let workspace = config.workspace(cli.workspace.as_deref());
    info!(config = %path.display(), workspace = %workspace.display(), provider = %config.provider, "starting");

    let client = ProviderRegistry::create(&config, &gate)?;
    let tools = ToolRegistry::from_config(&config, &gate)?;
    let template = prompt::load_template(config.agent.system_prompt_path.as_deref())?;

    let agent = AgentLoop::new(client, Arc::new(tools), config.agent.max_steps).with_prompt_template(template);

    Ok(Runtime {
        config,
        workspace,
        agent: Arc::new(agent),
    })
}

fn print_status(cli: &Cli) -> Result<()> {
    let probe = config::bootstrap_workspace(cli.workspace.as_deref());
    let (config, path) = config::load(cli.config.as_deref(), &probe)?;
    let gate = CreditGate::resolve(&config::candidate_paths(cli.config.as_deref(), &probe));

    let on_off = |flag: bool| if flag { "enabled" } else { "disabled" };
    let key = if config.resolved_api_key().is_empty() { "not set" } else { "✓" };

    println!("Mini-Agent Status\n");
    println!("Config:    {}", path.display());
    println!("Workspace: {}", config.workspace(cli.workspace.as_deref()).display());
    println!("Provider:  {}", config.provider);
    println!("Model:     {}", config.model_name());
    println!(
        "API base:  {}",
        if config.api_base.is_empty() { "(provider default)" } else { &config.api_base }
    );
    println!("API key:   {}", key);
    println!("Max steps: {}", config.agent.max_steps);
    println!("Z.AI search: {}", on_off(gate.search_enabled()));
    println!("Z.AI LLM:    {}", on_off(gate.llm_enabled()));

    println!("\nTools:");
    match ToolRegistry::from_config(&config, &gate) {
        Ok(tools) => {
            for name in tools.tool_names() {
                println!("  {name}");
            }
        }
        Err(e) => println!("  unavailable: {e}"),
    }

    println!("\nChannels:");
    for name in ChannelRegistry::available() {
        println!("  {:<6} {}", name, ChannelRegistry::description(name));
    }
    Ok(())
}
