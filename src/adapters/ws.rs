//! JSON-RPC over WebSocket: one text frame per message.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use super::rpc::RpcServer;
use crate::error::Error;
use crate::Result;

/// Bind `addr` and serve until the listener fails.
pub async fn serve(server: Arc<RpcServer>, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Rpc(format!("Cannot listen on {addr}: {e}")))?;
    info!("JSON-RPC listening on ws://{}", listener.local_addr()?);
    serve_listener(server, listener).await
}

/// Accept connections on an already bound listener.
pub async fn serve_listener(server: Arc<RpcServer>, listener: TcpListener) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(server, stream, peer).await {
                debug!(%peer, "WebSocket connection ended: {}", e);
            }
        });
    }
}

async fn handle_connection(server: Arc<RpcServer>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| Error::Rpc(format!("WebSocket handshake failed: {e}")))?;
    info!(%peer, "WebSocket client connected");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        let frame = text.as_str().to_owned();
                        let server = server.clone();
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            if let Some(response) = server.handle_frame(&frame, &tx).await {
                                let _ = tx.send(response);
                            }
                        });
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        warn!(%peer, "ignoring binary frame");
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!(%peer, "WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(%peer, "WebSocket error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            Some(frame) = rx.recv() => {
                ws_sender
                    .send(WsMessage::Text(frame.into()))
                    .await
                    .map_err(|e| Error::Rpc(format!("WebSocket send failed: {e}")))?;
            }
        }
    }

    Ok(())
}
