//! Wire protocol shared by the gateway and the client connection manager.
//!
//! Both the WebSocket binding and any alternate streaming binding carry the
//! same envelopes: inbound frames are `{type, ...fields}`, outbound frames
//! additionally carry a `timestamp`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{Session, SessionSummary, TokenUsage};

/// Client-initiated intentional disconnect; no reconnection is attempted.
pub const CLOSE_NORMAL: u16 = 1000;
/// Admission-control rejection.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Optional client details sent with `init_session`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

/// Client -> Gateway messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Create a new session (`project_path`) or resume one (`session_id`)
    InitSession {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<ClientMetadata>,
    },
    /// User message for the bound session
    Message { content: String },
    ListSessions,
    GetSession { session_id: String },
    DeleteSession { session_id: String },
    Ping,
}

/// Gateway -> Client messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        connection_id: String,
    },
    SessionInitialized {
        session_id: String,
        project_path: String,
        has_context: bool,
        message_count: usize,
    },
    SessionData {
        session: Session,
    },
    ContentDelta {
        delta: String,
    },
    ToolExecution {
        tool: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    MessageComplete {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tokens_used: Option<TokenUsage>,
    },
    SessionsList {
        sessions: Vec<SessionSummary>,
        count: usize,
    },
    SessionDeleted {
        session_id: String,
    },
    SlashCommandResponse {
        command: String,
        response: String,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    Pong,
}

/// Outbound envelope: the tagged message plus a send timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEnvelope {
    #[serde(flatten)]
    pub message: ServerMessage,
    pub timestamp: DateTime<Utc>,
}

impl ServerEnvelope {
    pub fn new(message: ServerMessage) -> Self {
        Self {
            message,
            timestamp: Utc::now(),
        }
    }
}
