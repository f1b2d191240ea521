//! Front-ends that drive the agent loop.
//!
//! - **cli**: single task or interactive REPL on the terminal
//! - **stdio**: line-delimited JSON-RPC 2.0 on stdin/stdout
//! - **ws**: JSON-RPC 2.0 over WebSocket
//!
//! The JSON-RPC method table lives in [`rpc`] and is shared by both
//! transports.

pub mod cli;
pub mod rpc;
pub mod stdio;
pub mod ws;

use std::future::Future;
use std::sync::Arc;

use rpc::RpcServer;

/// A front-end that owns the process until it finishes.
pub trait Channel: Send {
    /// Channel name ("cli", "stdio", "ws").
    fn name(&self) -> &str;

    /// Serve until the user or the peer ends the channel.
    fn start(self) -> impl Future<Output = crate::Result<()>> + Send;
}

/// JSON-RPC on the process's stdin/stdout.
pub struct StdioChannel {
    server: Arc<RpcServer>,
}

impl StdioChannel {
    pub fn new(server: Arc<RpcServer>) -> Self {
        Self { server }
    }
}

impl Channel for StdioChannel {
    fn name(&self) -> &str {
        "stdio"
    }

    async fn start(self) -> crate::Result<()> {
        stdio::serve_stdio(self.server).await
    }
}

/// JSON-RPC on a WebSocket listener.
pub struct WsChannel {
    server: Arc<RpcServer>,
    addr: String,
}

impl WsChannel {
    pub fn new(server: Arc<RpcServer>, addr: impl Into<String>) -> Self {
        Self {
            server,
            addr: addr.into(),
        }
    }
}

impl Channel for WsChannel {
    fn name(&self) -> &str {
        "ws"
    }

    async fn start(self) -> crate::Result<()> {
        ws::serve(self.server, &self.addr).await
    }
}

/// Metadata about the available channels.
pub struct ChannelRegistry;

impl ChannelRegistry {
    pub fn available() -> &'static [&'static str] {
        &["cli", "stdio", "ws"]
    }

    pub fn description(name: &str) -> &'static str {
        match name {
            "cli" => "Interactive command line interface",
            "stdio" => "JSON-RPC 2.0 over stdin/stdout (mini-agent serve)",
            "ws" => "JSON-RPC 2.0 over WebSocket (mini-agent serve --ws)",
            _ => "Unknown channel",
        }
    }
}
