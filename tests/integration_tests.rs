//! Integration tests for codelink
//!
//! These tests verify end-to-end behavior across crates: the session store,
//! the relay loop, gateway dispatch, and the WebSocket path with a real
//! server and client.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use codelink_claude::client::{ModelEvent, ModelSource, StreamRequest};
use codelink_claude::{RelayConfig, StreamRelay, ToolConfig, ToolExecutor};
use codelink_core::{ClientMessage, Message, ServerEnvelope, ServerMessage, SessionStore};
use codelink_gateway::{create_router, AdmissionConfig, AppState};
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tower::util::ServiceExt;

// ==================== Test Helpers ====================

/// Plays back one scripted event stream per turn
struct ScriptedSource {
    scripts: Mutex<VecDeque<Vec<anyhow::Result<ModelEvent>>>>,
}

impl ScriptedSource {
    fn new(scripts: Vec<Vec<anyhow::Result<ModelEvent>>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
        }
    }
}

#[async_trait::async_trait]
impl ModelSource for ScriptedSource {
    async fn stream(
        &self,
        _request: StreamRequest,
    ) -> anyhow::Result<mpsc::Receiver<anyhow::Result<ModelEvent>>> {
        let script = self
            .scripts
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| vec![Ok(ModelEvent::MessageStop { usage: None })]);

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for event in script {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

fn stop() -> anyhow::Result<ModelEvent> {
    Ok(ModelEvent::MessageStop { usage: None })
}

async fn gateway_state(
    store_dir: &TempDir,
    scripts: Vec<Vec<anyhow::Result<ModelEvent>>>,
    admission: AdmissionConfig,
) -> Arc<AppState> {
    let store = Arc::new(SessionStore::new(store_dir.path()).await.unwrap());
    let relay = Arc::new(StreamRelay::new(
        Arc::new(ScriptedSource::new(scripts)),
        Arc::clone(&store),
        ToolExecutor::new(ToolConfig::default()),
        RelayConfig::default(),
    ));
    Arc::new(AppState::new(store, relay, admission))
}

/// Serve the gateway on an ephemeral port
async fn spawn_gateway(state: Arc<AppState>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn ws_connect(addr: SocketAddr) -> WsClient {
    let (stream, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();
    stream
}

/// Next protocol envelope, skipping control frames
async fn next_envelope(stream: &mut WsClient) -> serde_json::Value {
    loop {
        match stream.next().await.expect("stream ended").unwrap() {
            WsFrame::Text(text) => return serde_json::from_str(&text).unwrap(),
            WsFrame::Ping(_) | WsFrame::Pong(_) => {}
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

async fn send_json(stream: &mut WsClient, value: serde_json::Value) {
    stream.send(WsFrame::Text(value.to_string())).await.unwrap();
}

// ==================== Session Store ====================

mod store {
    use super::*;

    #[tokio::test]
    async fn test_sessions_survive_restart() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = SessionStore::new(dir.path()).await.unwrap();
            let session = store.create("/projects/app").await.unwrap();
            store
                .add_message(&session.id, Message::user("remember me"))
                .await
                .unwrap();
            session.id
        };

        let store = SessionStore::new(dir.path()).await.unwrap();
        let session = store.get(&id).await.unwrap();
        assert_eq!(session.conversation_history.len(), 1);
        assert_eq!(session.conversation_history[0].content, "remember me");
        assert_eq!(session.metadata.total_messages, 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path()).await.unwrap();
        let session = store.create("/p").await.unwrap();

        store.delete(&session.id).await.unwrap();
        store.delete(&session.id).await.unwrap();
        assert!(store.get(&session.id).await.is_err());
    }
}

// ==================== End-to-End over WebSocket ====================

mod websocket {
    use super::*;

    #[tokio::test]
    async fn test_init_session_and_ping() {
        let dir = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let state = gateway_state(&dir, vec![], AdmissionConfig::default()).await;
        let addr = spawn_gateway(state).await;
        let mut client = ws_connect(addr).await;

        let connected = next_envelope(&mut client).await;
        assert_eq!(connected["type"], "connected");
        assert!(connected["connection_id"].is_string());
        assert!(connected["timestamp"].is_string());

        send_json(
            &mut client,
            serde_json::json!({"type": "init_session", "project_path": project.path()}),
        )
        .await;
        let initialized = next_envelope(&mut client).await;
        assert_eq!(initialized["type"], "session_initialized");
        assert_eq!(initialized["message_count"], 0);

        send_json(&mut client, serde_json::json!({"type": "ping"})).await;
        let pong = next_envelope(&mut client).await;
        assert_eq!(pong["type"], "pong");
    }

    #[tokio::test]
    async fn test_tool_turn_streams_in_order() {
        let dir = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        std::fs::write(project.path().join("main.rs"), "fn main() {}").unwrap();

        let scripts = vec![
            vec![
                Ok(ModelEvent::ToolUseStart {
                    id: "tu_1".to_string(),
                    name: "list_files".to_string(),
                }),
                Ok(ModelEvent::ToolUseDelta {
                    partial_json: r#"{"path":"."}"#.to_string(),
                }),
                Ok(ModelEvent::ToolUseStop),
                stop(),
            ],
            vec![
                Ok(ModelEvent::TextDelta("One file found.".to_string())),
                stop(),
            ],
        ];
        let state = gateway_state(&dir, scripts, AdmissionConfig::default()).await;
        let addr = spawn_gateway(state).await;
        let mut client = ws_connect(addr).await;
        next_envelope(&mut client).await;

        send_json(
            &mut client,
            serde_json::json!({"type": "init_session", "project_path": project.path()}),
        )
        .await;
        next_envelope(&mut client).await;

        send_json(
            &mut client,
            serde_json::json!({"type": "message", "content": "list files"}),
        )
        .await;

        let execution = next_envelope(&mut client).await;
        assert_eq!(execution["type"], "tool_execution");
        assert_eq!(execution["tool"], "list_files");

        let result = next_envelope(&mut client).await;
        assert_eq!(result["type"], "tool_result");
        assert!(result["result"].as_str().unwrap().contains("main.rs"));
        assert!(result.get("error").is_none());

        let first_complete = next_envelope(&mut client).await;
        assert_eq!(first_complete["type"], "message_complete");

        let delta = next_envelope(&mut client).await;
        assert_eq!(delta["type"], "content_delta");
        assert_eq!(delta["delta"], "One file found.");

        let second_complete = next_envelope(&mut client).await;
        assert_eq!(second_complete["type"], "message_complete");
    }

    #[tokio::test]
    async fn test_turn_persists_for_resume() {
        let dir = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let scripts = vec![vec![
            Ok(ModelEvent::TextDelta("Done.".to_string())),
            stop(),
        ]];
        let state = gateway_state(&dir, scripts, AdmissionConfig::default()).await;
        let addr = spawn_gateway(state).await;

        let mut client = ws_connect(addr).await;
        next_envelope(&mut client).await;
        send_json(
            &mut client,
            serde_json::json!({"type": "init_session", "project_path": project.path()}),
        )
        .await;
        let initialized = next_envelope(&mut client).await;
        let session_id = initialized["session_id"].as_str().unwrap().to_string();

        send_json(
            &mut client,
            serde_json::json!({"type": "message", "content": "do it"}),
        )
        .await;
        next_envelope(&mut client).await; // content_delta
        next_envelope(&mut client).await; // message_complete
        drop(client);

        // A fresh connection resumes the session with the turn persisted
        let mut client = ws_connect(addr).await;
        next_envelope(&mut client).await;
        send_json(
            &mut client,
            serde_json::json!({"type": "init_session", "session_id": session_id}),
        )
        .await;
        let resumed = next_envelope(&mut client).await;
        assert_eq!(resumed["message_count"], 2);

        send_json(
            &mut client,
            serde_json::json!({"type": "get_session", "session_id": session_id}),
        )
        .await;
        let data = next_envelope(&mut client).await;
        assert_eq!(data["type"], "session_data");
        let history = data["session"]["conversation_history"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1]["content"], "Done.");
    }

    #[tokio::test]
    async fn test_unknown_message_gets_error_reply() {
        let dir = TempDir::new().unwrap();
        let state = gateway_state(&dir, vec![], AdmissionConfig::default()).await;
        let addr = spawn_gateway(state).await;
        let mut client = ws_connect(addr).await;
        next_envelope(&mut client).await;

        send_json(&mut client, serde_json::json!({"type": "subscribe"})).await;
        let error = next_envelope(&mut client).await;
        assert_eq!(error["type"], "error");
        assert_eq!(error["code"], "protocol_error");
    }

    #[tokio::test]
    async fn test_sixth_connection_is_refused() {
        let dir = TempDir::new().unwrap();
        let state = gateway_state(&dir, vec![], AdmissionConfig::default()).await;
        let addr = spawn_gateway(state).await;

        let mut held = Vec::new();
        for _ in 0..5 {
            let mut client = ws_connect(addr).await;
            let connected = next_envelope(&mut client).await;
            assert_eq!(connected["type"], "connected");
            held.push(client);
        }

        let mut rejected = ws_connect(addr).await;
        match rejected.next().await.expect("expected a frame").unwrap() {
            WsFrame::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1008);
            }
            other => panic!("expected a policy-violation close, got {:?}", other),
        }
    }
}

// ==================== Client against a live gateway ====================

mod client {
    use super::*;
    use codelink_client::{ConnectionConfig, ConnectionManager, ConnectionStatus, WsTransport};

    #[tokio::test]
    async fn test_manager_connects_and_initializes_session() {
        let dir = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let state = gateway_state(&dir, vec![], AdmissionConfig::default()).await;
        let addr = spawn_gateway(state).await;

        let config = ConnectionConfig::new(format!("ws://{}/ws", addr));
        let (manager, mut events) = ConnectionManager::connect(Arc::new(WsTransport), config);

        let mut status = manager.status();
        status
            .wait_for(|s| *s == ConnectionStatus::Connected)
            .await
            .unwrap();

        let connected = events.recv().await.unwrap();
        assert!(matches!(connected.message, ServerMessage::Connected { .. }));

        manager
            .init_session(None, Some(project.path().display().to_string()), None)
            .await;
        let initialized = events.recv().await.unwrap();
        match initialized.message {
            ServerMessage::SessionInitialized { message_count, .. } => {
                assert_eq!(message_count, 0);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        manager.disconnect().await;
        status
            .wait_for(|s| *s == ConnectionStatus::Disconnected)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_offline_send_is_delivered_after_connect() {
        let dir = TempDir::new().unwrap();
        let state = gateway_state(&dir, vec![], AdmissionConfig::default()).await;
        let addr = spawn_gateway(state).await;

        let mut config = ConnectionConfig::new(format!("ws://{}/ws", addr));
        config.reconnect.initial = std::time::Duration::from_millis(10);
        let (manager, mut events) = ConnectionManager::connect(Arc::new(WsTransport), config);

        // Queued immediately, likely before the socket is up
        manager.send(ClientMessage::Ping).await;

        // The queued ping is flushed on connect and answered
        let mut saw_pong = false;
        for _ in 0..3 {
            match events.recv().await {
                Some(ServerEnvelope {
                    message: ServerMessage::Pong,
                    ..
                }) => {
                    saw_pong = true;
                    break;
                }
                Some(_) => {}
                None => break,
            }
        }
        assert!(saw_pong);
        manager.disconnect().await;
    }
}

// ==================== REST surface ====================

mod api {
    use super::*;

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = TempDir::new().unwrap();
        let state = gateway_state(&dir, vec![], AdmissionConfig::default()).await;

        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["service"], "codelink-gateway");
    }
}
