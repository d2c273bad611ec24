//! Low-level CDP (Chrome DevTools Protocol) WebSocket client.
//!
//! Connects to a Chromium DevTools endpoint and provides JSON-RPC command /
//! response correlation plus event dispatch. Targets are driven through the
//! flat session protocol: [`CdpClient::attach_page`] attaches to a target via
//! `Target.attachToTarget {flatten: true}` and yields a [`CdpSession`] whose
//! commands carry the session id and whose events are routed to a dedicated
//! channel.
//!
//! Several sessions can share one connection; the client is cheaply clonable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::CdpError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Default per-command deadline. Callers with longer operations (navigation,
/// screenshots of heavy pages) pass their own timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A CDP event received from the browser.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// The event method name (e.g. "Page.lifecycleEvent").
    pub method: String,
    /// The event parameters.
    pub params: Value,
    /// Session the event belongs to; `None` for browser-level events.
    pub session_id: Option<String>,
}

#[derive(Debug, Clone)]
struct CdpResponse {
    result: Option<Value>,
    error: Option<CdpResponseError>,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct CdpResponseError {
    code: i64,
    message: String,
    data: Option<String>,
}

/// Routes incoming events to the subscriber for their session.
#[derive(Default)]
struct EventRouter {
    root: Option<mpsc::UnboundedSender<CdpEvent>>,
    sessions: HashMap<String, mpsc::UnboundedSender<CdpEvent>>,
}

/// CDP WebSocket client with flat-session multiplexing.
#[derive(Clone)]
pub struct CdpClient {
    next_id: Arc<AtomicU64>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<CdpResponse>>>>,
    writer: Arc<Mutex<WsSink>>,
    router: Arc<Mutex<EventRouter>>,
}

impl CdpClient {
    /// Connect to a DevTools WebSocket endpoint (browser- or page-level).
    pub async fn connect(ws_url: &str) -> Result<Self, CdpError> {
        tracing::debug!(url = %ws_url, "connecting to DevTools WebSocket");

        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| CdpError::ConnectionFailed {
                url: ws_url.to_string(),
                reason: e.to_string(),
            })?;

        let (writer, reader) = ws_stream.split();

        let client = Self {
            next_id: Arc::new(AtomicU64::new(1)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            writer: Arc::new(Mutex::new(writer)),
            router: Arc::new(Mutex::new(EventRouter::default())),
        };

        let pending = Arc::clone(&client.pending);
        let router = Arc::clone(&client.router);
        tokio::spawn(async move {
            Self::read_loop(reader, pending, router).await;
        });

        Ok(client)
    }

    /// Subscribe to browser-level events (no session id). Replaces any
    /// previous root subscriber.
    pub async fn subscribe_root(&self) -> mpsc::UnboundedReceiver<CdpEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.router.lock().await.root = Some(tx);
        rx
    }

    /// Send a browser-level CDP command and wait for its response.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        self.send_inner(None, method, params, DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    /// Send a browser-level command with an explicit timeout.
    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CdpError> {
        self.send_inner(None, method, params, timeout).await
    }

    /// Attach to a page target with the flat session protocol and return a
    /// session whose events are routed to its own channel.
    pub async fn attach_page(&self, target_id: &str) -> Result<CdpSession, CdpError> {
        let result = self
            .send(
                "Target.attachToTarget",
                serde_json::json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = result
            .get("sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CdpError::Transport {
                detail: "Target.attachToTarget did not return a sessionId".to_string(),
            })?
            .to_string();

        let (tx, rx) = mpsc::unbounded_channel();
        self.router
            .lock()
            .await
            .sessions
            .insert(session_id.clone(), tx);

        Ok(CdpSession {
            client: self.clone(),
            session_id,
            target_id: target_id.to_string(),
            events: rx,
        })
    }

    async fn send_inner(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CdpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut cmd = serde_json::json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(sid) = session_id {
            cmd["sessionId"] = Value::String(sid.to_string());
        }
        let json = cmd.to_string();

        tracing::trace!(id, method = %method, session = ?session_id, "sending CDP command");

        // Register the pending response before sending to avoid races.
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        {
            let mut writer = self.writer.lock().await;
            writer
                .send(Message::Text(json.into()))
                .await
                .map_err(|e| CdpError::Transport {
                    detail: format!("failed to send WebSocket message: {e}"),
                })?;
        }

        let response = tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| CdpError::CommandTimeout {
                method: method.to_string(),
                duration: timeout,
            })?
            .map_err(|_| CdpError::Transport {
                detail: "response channel closed unexpectedly".to_string(),
            })?;

        if let Some(err) = response.error {
            return Err(CdpError::Protocol {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn drop_session(&self, session_id: &str) {
        self.router.lock().await.sessions.remove(session_id);
    }

    /// Background task reading WebSocket frames.
    ///
    /// Frames with an `id` are responses to pending commands; frames with a
    /// `method` are events and get routed by `sessionId`.
    async fn read_loop(
        mut reader: WsSource,
        pending: Arc<Mutex<HashMap<u64, oneshot::Sender<CdpResponse>>>>,
        router: Arc<Mutex<EventRouter>>,
    ) {
        while let Some(msg_result) = reader.next().await {
            let msg = match msg_result {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket read error, stopping reader");
                    break;
                }
            };

            let text = match msg {
                Message::Text(t) => t.to_string(),
                Message::Binary(b) => match String::from_utf8(b.to_vec()) {
                    Ok(s) => s,
                    Err(_) => continue,
                },
                Message::Close(_) => {
                    tracing::debug!("WebSocket closed by remote");
                    break;
                }
                _ => continue,
            };

            let json: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse CDP message as JSON");
                    continue;
                }
            };

            if let Some(id) = json.get("id").and_then(|v| v.as_u64()) {
                let response = CdpResponse {
                    result: json.get("result").cloned(),
                    error: json
                        .get("error")
                        .and_then(|e| serde_json::from_value(e.clone()).ok()),
                };
                let mut pending_guard = pending.lock().await;
                if let Some(tx) = pending_guard.remove(&id) {
                    let _ = tx.send(response);
                } else {
                    tracing::trace!(id, "response for unknown command id");
                }
            } else if let Some(method) = json.get("method").and_then(|v| v.as_str()) {
                let event = CdpEvent {
                    method: method.to_string(),
                    params: json.get("params").cloned().unwrap_or(Value::Null),
                    session_id: json
                        .get("sessionId")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                };
                let router_guard = router.lock().await;
                let delivered = match event.session_id.as_deref() {
                    Some(sid) => router_guard
                        .sessions
                        .get(sid)
                        .map(|tx| tx.send(event.clone()).is_ok())
                        .unwrap_or(false),
                    None => false,
                };
                if !delivered {
                    if let Some(root) = &router_guard.root {
                        let _ = root.send(event);
                    }
                }
            }
        }

        // Cancel all pending commands when the connection drops.
        let mut pending_guard = pending.lock().await;
        for (_, tx) in pending_guard.drain() {
            let _ = tx.send(CdpResponse {
                result: None,
                error: Some(CdpResponseError {
                    code: -1,
                    message: "WebSocket connection closed".to_string(),
                    data: None,
                }),
            });
        }
        router.lock().await.sessions.clear();
    }
}

/// A flat CDP session attached to one page target.
pub struct CdpSession {
    client: CdpClient,
    session_id: String,
    target_id: String,
    events: mpsc::UnboundedReceiver<CdpEvent>,
}

impl CdpSession {
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Send a command scoped to this session.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        self.client
            .send_inner(
                Some(&self.session_id),
                method,
                params,
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await
    }

    /// Send a session command with an explicit timeout.
    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CdpError> {
        self.client
            .send_inner(Some(&self.session_id), method, params, timeout)
            .await
    }

    /// Receive the next event for this session. `None` means the connection
    /// dropped.
    pub async fn recv_event(&mut self) -> Option<CdpEvent> {
        self.events.recv().await
    }

    /// Enable a CDP domain (many domains require this before emitting events).
    pub async fn enable_domain(&self, domain: &str) -> Result<(), CdpError> {
        self.send(&format!("{domain}.enable"), serde_json::json!({}))
            .await?;
        Ok(())
    }

    /// Detach from the target and stop routing its events.
    pub async fn detach(self) -> Result<(), CdpError> {
        let res = self
            .client
            .send(
                "Target.detachFromTarget",
                serde_json::json!({ "sessionId": self.session_id }),
            )
            .await;
        self.client.drop_session(&self.session_id).await;
        res.map(|_| ())
    }
}

/// Parse a CDP event JSON frame into its components (used by tests).
pub fn parse_cdp_event(json: &Value) -> Option<CdpEvent> {
    if json.get("id").is_some() {
        return None;
    }
    let method = json.get("method")?.as_str()?.to_string();
    Some(CdpEvent {
        method,
        params: json.get("params").cloned().unwrap_or(Value::Null),
        session_id: json
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_event_with_session() {
        let json = serde_json::json!({
            "method": "Network.responseReceived",
            "params": { "requestId": "1" },
            "sessionId": "SESSION1"
        });
        let event = parse_cdp_event(&json).unwrap();
        assert_eq!(event.method, "Network.responseReceived");
        assert_eq!(event.session_id.as_deref(), Some("SESSION1"));
        assert_eq!(event.params["requestId"], "1");
    }

    #[test]
    fn parse_event_rejects_response() {
        let json = serde_json::json!({ "id": 1, "result": {} });
        assert!(parse_cdp_event(&json).is_none());
    }

    #[test]
    fn parse_event_without_params() {
        let json = serde_json::json!({ "method": "Page.loadEventFired" });
        let event = parse_cdp_event(&json).unwrap();
        assert_eq!(event.params, Value::Null);
        assert!(event.session_id.is_none());
    }
}
