//! Codelink Gateway - WebSocket transport for mobile clients.
//!
//! Exposes the session protocol over a `/ws` upgrade endpoint with
//! per-address admission control and heartbeat supervision, plus a small
//! REST surface for health checks.

pub mod admission;
pub mod handlers;
pub mod websocket;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use codelink_claude::StreamRelay;
use codelink_core::SessionStore;
use tower_http::trace::TraceLayer;

pub use admission::{AdmissionConfig, AdmissionControl};
pub use websocket::{ConnectionRegistry, Outbound};

/// Shared gateway state
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub relay: Arc<StreamRelay>,
    pub admission: AdmissionControl,
    pub registry: ConnectionRegistry,
}

impl AppState {
    pub fn new(store: Arc<SessionStore>, relay: Arc<StreamRelay>, admission: AdmissionConfig) -> Self {
        Self {
            store,
            relay,
            admission: AdmissionControl::new(admission),
            registry: ConnectionRegistry::default(),
        }
    }
}

/// Build the gateway router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()` so admission
/// control can see peer addresses.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(websocket::ws_handler))
        .route("/api/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "codelink-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use codelink_claude::client::{ModelEvent, ModelSource, StreamRequest};
    use codelink_claude::{RelayConfig, ToolConfig, ToolExecutor};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    struct SilentSource;

    #[async_trait::async_trait]
    impl ModelSource for SilentSource {
        async fn stream(
            &self,
            _request: StreamRequest,
        ) -> anyhow::Result<mpsc::Receiver<anyhow::Result<ModelEvent>>> {
            let (tx, rx) = mpsc::channel(1);
            drop(tx);
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SessionStore::new(dir.path()).await.unwrap());
        let relay = Arc::new(StreamRelay::new(
            Arc::new(SilentSource),
            Arc::clone(&store),
            ToolExecutor::new(ToolConfig::default()),
            RelayConfig::default(),
        ));
        let state = Arc::new(AppState::new(store, relay, AdmissionConfig::default()));

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
    }
}
