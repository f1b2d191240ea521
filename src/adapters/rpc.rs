//! JSON-RPC 2.0 editor protocol.
//!
//! Transport-independent: a transport feeds one frame at a time to
//! [`RpcServer::handle_frame`] and writes whatever arrives on its outbound
//! channel (responses and `session/update` notifications).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::agent::{AgentEvent, AgentLoop, CancelFlag, EventSink, Message, Session};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: u32 = 1;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// A prompt is already running on the session.
pub const SESSION_BUSY: i64 = -32000;

/// Frames queued for the transport's writer.
pub type Outbound = mpsc::UnboundedSender<String>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }
}

#[derive(Debug, Serialize)]
struct Response<'a> {
    jsonrpc: &'static str,
    id: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

fn encode_response(id: &Value, outcome: Result<Value, RpcError>) -> String {
    let (result, error) = match outcome {
        Ok(value) => (Some(value), None),
        Err(e) => (None, Some(e)),
    };
    let response = Response {
        jsonrpc: JSONRPC_VERSION,
        id,
        result,
        error,
    };
    serde_json::to_string(&response).unwrap_or_else(|e| {
        format!(
            r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{INTERNAL_ERROR},"message":"failed to encode response: {e}"}}}}"#
        )
    })
}

/// Error response for a frame that could not be read as JSON.
pub fn parse_error(detail: &str) -> String {
    encode_response(
        &Value::Null,
        Err(RpcError::new(PARSE_ERROR, format!("Parse error: {detail}"))),
    )
}

fn notification(method: &str, params: Value) -> String {
    json!({"jsonrpc": JSONRPC_VERSION, "method": method, "params": params}).to_string()
}

/// Forwards agent events as `session/update` notifications.
pub struct RpcSink {
    out: Outbound,
}

impl RpcSink {
    pub fn new(out: Outbound) -> Self {
        Self { out }
    }
}

impl EventSink for RpcSink {
    fn emit(&self, session_id: &str, event: &AgentEvent) {
        let frame = notification("session/update", json!({"sessionId": session_id, "update": event}));
        if self.out.send(frame).is_err() {
            debug!(session_id, "dropping session update: transport closed");
        }
    }
}

struct SessionEntry {
    session: tokio::sync::Mutex<Session>,
    cancel: CancelFlag,
}

/// Session table and method dispatch.
pub struct RpcServer {
    agent: Arc<AgentLoop>,
    sessions: Mutex<HashMap<String, Arc<SessionEntry>>>,
}

impl RpcServer {
    pub fn new(agent: Arc<AgentLoop>) -> Self {
        Self {
            agent,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one inbound frame. Returns the response frame, or `None` for
    /// notifications.
    pub async fn handle_frame(&self, frame: &str, out: &Outbound) -> Option<String> {
        let value: Value = match serde_json::from_str(frame) {
            Ok(v) => v,
            Err(e) => return Some(parse_error(&e.to_string())),
        };

        let Value::Object(request) = value else {
            return Some(encode_response(
                &Value::Null,
                Err(RpcError::new(INVALID_REQUEST, "Request must be a JSON object")),
            ));
        };

        let id = request.get("id").cloned();
        let reply_id = id.clone().unwrap_or(Value::Null);

        if request.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Some(encode_response(
                &reply_id,
                Err(RpcError::new(INVALID_REQUEST, "jsonrpc must be \"2.0\"")),
            ));
        }
        let Some(method) = request.get("method").and_then(Value::as_str) else {
            return Some(encode_response(
                &reply_id,
                Err(RpcError::new(INVALID_REQUEST, "Missing method")),
            ));
        };
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        debug!(method, "rpc request");
        let outcome = self.dispatch(method, &params, out).await;

        match id {
            Some(id) => Some(encode_response(&id, outcome)),
            None => {
                if let Err(e) = outcome {
                    warn!(method, code = e.code, error = %e.message, "rpc notification failed");
                }
                None
            }
        }
    }

    async fn dispatch(&self, method: &str, params: &Value, out: &Outbound) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize()),
            "newSession" | "session/new" => self.new_session(params),
            "prompt" | "session/prompt" => self.prompt(params, out).await,
            "cancel" | "session/cancel" => self.cancel(params),
            "cleanup" => Ok(self.cleanup()),
            other => Err(RpcError::new(METHOD_NOT_FOUND, format!("Method not found: {other}"))),
        }
    }

    fn initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "agentInfo": {
                "name": "mini-agent",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "agentCapabilities": {
                "loadSession": false,
                "promptCapabilities": {"image": false, "audio": false, "embeddedContext": false},
            },
            "provider": self.agent.client().provider().as_str(),
            "model": self.agent.client().model(),
            "tools": self.agent.tools().tool_names(),
        })
    }

    fn new_session(&self, params: &Value) -> Result<Value, RpcError> {
        let cwd = params
            .get("cwd")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| RpcError::invalid_params("newSession requires a non-empty 'cwd'"))?;

        let session = self
            .agent
            .new_session(cwd)
            .map_err(|e| RpcError::new(INTERNAL_ERROR, format!("Cannot create session in {cwd}: {e}")))?;
        let id = session.id().to_string();
        let workspace = session.workspace().display().to_string();

        let entry = Arc::new(SessionEntry {
            cancel: session.cancel_flag(),
            session: tokio::sync::Mutex::new(session),
        });
        self.lock_sessions().insert(id.clone(), entry);

        info!(session_id = %id, workspace = %workspace, "session created");
        Ok(json!({"sessionId": id, "cwd": workspace}))
    }

    async fn prompt(&self, params: &Value, out: &Outbound) -> Result<Value, RpcError> {
        let id = session_id(params)?;
        let text = prompt_text(params)?;
        let entry = self.entry(id)?;

        let Ok(mut session) = entry.session.try_lock() else {
            return Err(RpcError::new(
                SESSION_BUSY,
                format!("Session {id} already has a prompt in flight"),
            ));
        };

        let sink = RpcSink::new(out.clone());
        let reply = self.agent.run(&mut session, &text, &sink).await;

        Ok(json!({
            "stopReason": reply.completion.as_str(),
            "message": {
                "role": "assistant",
                "content": reply.message.content,
            },
            "steps": reply.steps,
            "usage": reply.usage,
        }))
    }

    fn cancel(&self, params: &Value) -> Result<Value, RpcError> {
        let id = session_id(params)?;
        let entry = self.entry(id)?;
        entry.cancel.cancel();
        info!(session_id = %id, "session cancelled");
        Ok(json!({"cancelled": true}))
    }

    fn cleanup(&self) -> Value {
        let drained: Vec<_> = self.lock_sessions().drain().collect();
        for (_, entry) in &drained {
            entry.cancel.cancel();
        }
        info!(sessions = drained.len(), "sessions released");
        json!({"sessionsClosed": drained.len()})
    }

    /// Snapshot of a session log; waits for any in-flight prompt.
    pub async fn history(&self, id: &str) -> Option<Vec<Message>> {
        let entry = self.lock_sessions().get(id).cloned()?;
        let session = entry.session.lock().await;
        Some(session.messages().to_vec())
    }

    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    fn entry(&self, id: &str) -> Result<Arc<SessionEntry>, RpcError> {
        self.lock_sessions()
            .get(id)
            .cloned()
            .ok_or_else(|| RpcError::invalid_params(format!("Unknown session: {id}")))
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<SessionEntry>>> {
        // A panic while holding the lock leaves the map itself intact.
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn session_id(params: &Value) -> Result<&str, RpcError> {
    params
        .get("sessionId")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params("Missing 'sessionId'"))
}

/// `prompt` is a string or a list of content blocks; text blocks are joined.
fn prompt_text(params: &Value) -> Result<String, RpcError> {
    match params.get("prompt") {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Array(blocks)) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            if parts.is_empty() {
                Err(RpcError::invalid_params("'prompt' has no text blocks"))
            } else {
                Ok(parts.join("\n"))
            }
        }
        _ => Err(RpcError::invalid_params("Missing 'prompt'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::FakeLlmClient;
    use crate::agent::Role;
    use crate::tools::ToolRegistry;
    use std::time::Duration;
    use tempfile::TempDir;

    fn server(client: FakeLlmClient) -> Arc<RpcServer> {
        let tools = Arc::new(ToolRegistry::new(Duration::from_secs(5)));
        Arc::new(RpcServer::new(Arc::new(AgentLoop::new(Arc::new(client), tools, 10))))
    }

    fn channel() -> (Outbound, mpsc::UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    async fn call(server: &RpcServer, out: &Outbound, frame: Value) -> Value {
        let response = server.handle_frame(&frame.to_string(), out).await.unwrap();
        serde_json::from_str(&response).unwrap()
    }

    async fn open_session(server: &RpcServer, out: &Outbound, dir: &TempDir) -> String {
        let response = call(
            server,
            out,
            json!({"jsonrpc": "2.0", "id": 1, "method": "newSession", "params": {"cwd": dir.path().join("ws")}}),
        )
        .await;
        response["result"]["sessionId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let server = server(FakeLlmClient::new(vec![]));
        let (out, _rx) = channel();

        let resp: Value = serde_json::from_str(&server.handle_frame("{nope", &out).await.unwrap()).unwrap();
        assert_eq!(resp["error"]["code"], PARSE_ERROR);
        assert_eq!(resp["id"], Value::Null);

        let resp = call(&server, &out, json!([1, 2])).await;
        assert_eq!(resp["error"]["code"], INVALID_REQUEST);

        let resp = call(&server, &out, json!({"jsonrpc": "1.0", "id": 3, "method": "initialize"})).await;
        assert_eq!(resp["error"]["code"], INVALID_REQUEST);

        let resp = call(&server, &out, json!({"jsonrpc": "2.0", "id": 4, "method": "fly"})).await;
        assert_eq!(resp["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(resp["id"], 4);

        let resp = call(&server, &out, json!({"jsonrpc": "2.0", "id": 5, "method": "newSession", "params": {}})).await;
        assert_eq!(resp["error"]["code"], INVALID_PARAMS);

        let resp = call(
            &server,
            &out,
            json!({"jsonrpc": "2.0", "id": 6, "method": "prompt", "params": {"sessionId": "missing", "prompt": "x"}}),
        )
        .await;
        assert_eq!(resp["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_initialize_has_no_side_effects() {
        let server = server(FakeLlmClient::new(vec![]));
        let (out, _rx) = channel();
        let resp = call(&server, &out, json!({"jsonrpc": "2.0", "id": 0, "method": "initialize"})).await;
        assert_eq!(resp["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(resp["result"]["agentInfo"]["name"], "mini-agent");
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn test_prompt_returns_terminal_message_and_updates() {
        let tmp = TempDir::new().unwrap();
        let server = server(FakeLlmClient::new(vec!["OK"]));
        let (out, mut rx) = channel();
        let id = open_session(&server, &out, &tmp).await;
        assert!(tmp.path().join("ws").is_dir());

        let resp = call(
            &server,
            &out,
            json!({"jsonrpc": "2.0", "id": 2, "method": "session/prompt",
                   "params": {"sessionId": id, "prompt": [{"type": "text", "text": "say exactly: OK"}]}}),
        )
        .await;
        assert_eq!(resp["result"]["stopReason"], "stop");
        assert_eq!(resp["result"]["message"]["content"], "OK");

        let update: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(update["method"], "session/update");
        assert_eq!(update["params"]["update"]["kind"], "processing");
    }

    #[tokio::test]
    async fn test_second_prompt_while_busy_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let server = server(FakeLlmClient::new(vec!["first answer", "second answer"]).with_delay(Duration::from_millis(150)));
        let (out, _rx) = channel();
        let id = open_session(&server, &out, &tmp).await;

        let prompt = |n: u64, text: &str| {
            json!({"jsonrpc": "2.0", "id": n, "method": "prompt", "params": {"sessionId": id, "prompt": text}})
        };

        let first = {
            let server = server.clone();
            let out = out.clone();
            let frame = prompt(10, "one").to_string();
            tokio::spawn(async move { server.handle_frame(&frame, &out).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let busy = call(&server, &out, prompt(11, "two")).await;
        assert_eq!(busy["error"]["code"], SESSION_BUSY);

        let first: Value = serde_json::from_str(&first.await.unwrap().unwrap()).unwrap();
        assert_eq!(first["result"]["message"]["content"], "first answer");

        let retry = call(&server, &out, prompt(12, "two")).await;
        assert_eq!(retry["result"]["message"]["content"], "second answer");

        let log = server.history(&id).await.unwrap();
        let first_end = log.iter().position(|m| m.content == "first answer").unwrap();
        assert_eq!(log[first_end + 1].role, Role::User);
        assert_eq!(log[first_end + 1].content, "two");
        assert_eq!(log.iter().filter(|m| m.role == Role::User).count(), 2);
    }

    #[tokio::test]
    async fn test_cancel_and_cleanup() {
        let tmp = TempDir::new().unwrap();
        let server = server(FakeLlmClient::new(vec![]));
        let (out, _rx) = channel();
        let id = open_session(&server, &out, &tmp).await;

        let resp = call(
            &server,
            &out,
            json!({"jsonrpc": "2.0", "id": 2, "method": "cancel", "params": {"sessionId": id}}),
        )
        .await;
        assert_eq!(resp["result"]["cancelled"], true);

        // notifications get no response
        let none = server
            .handle_frame(
                &json!({"jsonrpc": "2.0", "method": "session/cancel", "params": {"sessionId": id}}).to_string(),
                &out,
            )
            .await;
        assert!(none.is_none());

        let resp = call(&server, &out, json!({"jsonrpc": "2.0", "id": 3, "method": "cleanup"})).await;
        assert_eq!(resp["result"]["sessionsClosed"], 1);
        assert_eq!(server.session_count(), 0);
    }
}
