//! Line-delimited JSON-RPC over stdin/stdout.
//!
//! Stdout carries protocol frames only; logs go to stderr.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::rpc::{parse_error, RpcServer};
use crate::error::Error;
use crate::Result;

/// Serve until the reader reaches EOF, then drain in-flight requests.
pub async fn serve<R, W>(server: Arc<RpcServer>, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            writer.write_all(frame.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut requests = JoinSet::new();
    let mut frames = reader.split(b'\n');
    loop {
        let raw = match frames.next_segment().await {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(e) => {
                warn!("stdin read failed: {}", e);
                break;
            }
        };
        let line = match String::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                let _ = tx.send(parse_error(&format!("frame is not valid UTF-8: {e}")));
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let server = server.clone();
        let tx = tx.clone();
        // Each request runs on its own task so prompts on distinct sessions
        // overlap and `cancel` is never stuck behind a running prompt.
        requests.spawn(async move {
            if let Some(response) = server.handle_frame(&line, &tx).await {
                let _ = tx.send(response);
            }
        });
    }
    debug!("stdin closed, waiting for {} request(s)", requests.len());
    while requests.join_next().await.is_some() {}

    drop(tx);
    writer_task
        .await
        .map_err(|e| Error::Rpc(format!("stdout writer failed: {e}")))??;
    Ok(())
}

/// Serve on the process's stdin and stdout.
pub async fn serve_stdio(server: Arc<RpcServer>) -> Result<()> {
    info!("JSON-RPC listening on stdio");
    serve(server, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}
