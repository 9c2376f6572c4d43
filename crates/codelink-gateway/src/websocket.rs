//! WebSocket connection handling: admission, registry, heartbeat and the
//! per-connection read loop.
//!
//! Each connection gets a writer task fed by an [`Outbound`] channel, so
//! handlers and the heartbeat never contend for the socket sink. Handlers
//! are awaited inline in the read loop, which serializes message handling
//! per connection while different connections proceed in parallel.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use codelink_core::{ServerEnvelope, ServerMessage, CLOSE_POLICY_VIOLATION};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::handlers;
use crate::AppState;

/// Server ping cadence
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Handle for sending frames to one connection's writer task
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Message>,
}

impl Outbound {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    /// Send a protocol message, wrapped in a timestamped envelope
    pub async fn send(&self, message: ServerMessage) {
        let envelope = ServerEnvelope::new(message);
        match serde_json::to_string(&envelope) {
            Ok(json) => {
                let _ = self.tx.send(Message::Text(json)).await;
            }
            Err(e) => warn!(error = %e, "Failed to serialize outbound message"),
        }
    }

    /// Send a raw frame; returns false once the connection is gone
    pub(crate) async fn frame(&self, frame: Message) -> bool {
        self.tx.send(frame).await.is_ok()
    }
}

struct ConnectionEntry {
    outbound: Outbound,
    session_id: Option<String>,
}

/// Owned table of live connections and their session bindings
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<HashMap<String, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn register(&self, connection_id: &str, outbound: Outbound) {
        self.inner.lock().expect("registry lock poisoned").insert(
            connection_id.to_string(),
            ConnectionEntry {
                outbound,
                session_id: None,
            },
        );
    }

    pub fn deregister(&self, connection_id: &str) {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .remove(connection_id);
    }

    /// Bind a connection to the session its messages target
    pub fn bind(&self, connection_id: &str, session_id: &str) {
        if let Some(entry) = self
            .inner
            .lock()
            .expect("registry lock poisoned")
            .get_mut(connection_id)
        {
            entry.session_id = Some(session_id.to_string());
        }
    }

    pub fn session_of(&self, connection_id: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .get(connection_id)
            .and_then(|entry| entry.session_id.clone())
    }

    /// Unbind every connection attached to a deleted session, returning
    /// their outbound handles so they can be notified.
    pub fn unbind_session(&self, session_id: &str) -> Vec<Outbound> {
        let mut notified = Vec::new();
        for entry in self
            .inner
            .lock()
            .expect("registry lock poisoned")
            .values_mut()
        {
            if entry.session_id.as_deref() == Some(session_id) {
                entry.session_id = None;
                notified.push(entry.outbound.clone());
            }
        }
        notified
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `/ws` upgrade endpoint
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();

    if !state.admission.try_acquire(addr.ip()) {
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: "Connection limit exceeded".into(),
            })))
            .await;
        return;
    }

    let connection_id = Uuid::new_v4().to_string();
    info!(connection_id, %addr, "Client connected");

    let (tx, mut rx) = mpsc::channel::<Message>(256);
    let out = Outbound::new(tx);
    state.registry.register(&connection_id, out.clone());

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let closing = matches!(frame, Message::Close(_));
            if sender.send(frame).await.is_err() || closing {
                break;
            }
        }
    });

    out.send(ServerMessage::Connected {
        connection_id: connection_id.clone(),
    })
    .await;

    let last_seen = Arc::new(Mutex::new(Instant::now()));
    let heartbeat = tokio::spawn(heartbeat_loop(out.clone(), Arc::clone(&last_seen)));

    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(connection_id, error = %e, "Socket read error");
                break;
            }
        };
        *last_seen.lock().expect("heartbeat lock poisoned") = Instant::now();

        match frame {
            Message::Text(text) => {
                handlers::dispatch(&state, &connection_id, &text, &out).await;
            }
            Message::Ping(data) => {
                let _ = out.frame(Message::Pong(data)).await;
            }
            Message::Pong(_) => {}
            Message::Close(_) => break,
            Message::Binary(_) => {
                out.send(ServerMessage::Error {
                    error: "Binary frames are not supported".to_string(),
                    code: Some("protocol_error".to_string()),
                })
                .await;
            }
        }
    }

    heartbeat.abort();
    state.registry.deregister(&connection_id);
    state.admission.release(addr.ip());
    drop(out);
    let _ = writer.await;
    info!(connection_id, "Client disconnected");
}

/// Ping on a fixed cadence; a connection that shows no traffic for a full
/// cycle after a ping is considered dead and closed.
async fn heartbeat_loop(out: Outbound, last_seen: Arc<Mutex<Instant>>) {
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    interval.tick().await;
    let mut ping_sent: Option<Instant> = None;
    loop {
        interval.tick().await;
        if let Some(sent) = ping_sent {
            let seen = *last_seen.lock().expect("heartbeat lock poisoned");
            if seen < sent {
                debug!("Heartbeat deadline missed, closing connection");
                let _ = out.frame(Message::Close(None)).await;
                return;
            }
        }
        if !out.frame(Message::Ping(Vec::new())).await {
            return;
        }
        ping_sent = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound() -> (Outbound, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(16);
        (Outbound::new(tx), rx)
    }

    #[tokio::test]
    async fn test_registry_bind_and_lookup() {
        let registry = ConnectionRegistry::default();
        let (out, _rx) = outbound();

        registry.register("c1", out);
        assert!(registry.session_of("c1").is_none());

        registry.bind("c1", "s1");
        assert_eq!(registry.session_of("c1").as_deref(), Some("s1"));

        registry.deregister("c1");
        assert!(registry.session_of("c1").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unbind_session_clears_all_bindings() {
        let registry = ConnectionRegistry::default();
        let (out1, _rx1) = outbound();
        let (out2, _rx2) = outbound();
        let (out3, _rx3) = outbound();

        registry.register("c1", out1);
        registry.register("c2", out2);
        registry.register("c3", out3);
        registry.bind("c1", "s1");
        registry.bind("c2", "s1");
        registry.bind("c3", "s2");

        let notified = registry.unbind_session("s1");
        assert_eq!(notified.len(), 2);
        assert!(registry.session_of("c1").is_none());
        assert!(registry.session_of("c2").is_none());
        assert_eq!(registry.session_of("c3").as_deref(), Some("s2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_connection_closed_after_one_missed_cycle() {
        let (out, mut rx) = outbound();
        let last_seen = Arc::new(Mutex::new(Instant::now()));
        tokio::spawn(heartbeat_loop(out, last_seen));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Message::Ping(_)));
        // No traffic arrives before the next cycle
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, Message::Close(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_answered_pings_keep_the_connection_open() {
        let (out, mut rx) = outbound();
        let last_seen = Arc::new(Mutex::new(Instant::now()));
        tokio::spawn(heartbeat_loop(out, Arc::clone(&last_seen)));

        for _ in 0..3 {
            let frame = rx.recv().await.unwrap();
            assert!(matches!(frame, Message::Ping(_)), "connection was closed");
            *last_seen.lock().unwrap() = Instant::now();
        }
    }

    #[tokio::test]
    async fn test_outbound_wraps_messages_in_envelopes() {
        let (out, mut rx) = outbound();
        out.send(ServerMessage::Pong).await;

        let frame = rx.recv().await.unwrap();
        let Message::Text(json) = frame else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "pong");
        assert!(value["timestamp"].is_string());
    }
}
