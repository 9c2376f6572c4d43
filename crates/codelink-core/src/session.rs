//! Session, message and tool call entities

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Token usage for a single assistant message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u32,
    pub output: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        u64::from(self.input) + u64::from(self.output)
    }
}

/// One sandboxed operation requested by the model within a turn.
///
/// A tool call transitions pending -> (result | error) and never reopens;
/// `result` and `error` are mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name
    pub name: String,
    /// Tool input as JSON
    pub input: serde_json::Value,
    /// Result content, set on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Error text, set on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the call was requested
    pub timestamp: DateTime<Utc>,
}

impl ToolCall {
    /// Create a pending tool call
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: serde_json::json!({}),
            result: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Record the executor outcome. A call that already has an outcome is
    /// left untouched.
    pub fn complete(&mut self, outcome: std::result::Result<String, String>) {
        if self.result.is_some() || self.error.is_some() {
            return;
        }
        match outcome {
            Ok(result) => self.result = Some(result),
            Err(error) => self.error = Some(error),
        }
    }

    /// Whether an outcome has been recorded
    pub fn is_complete(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }
}

/// A message in a session's conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message ID
    pub id: String,
    /// Role of the sender
    pub role: MessageRole,
    /// Message content (append-only while streaming)
    pub content: String,
    /// Creation timestamp
    pub timestamp: DateTime<Utc>,
    /// Tool calls made during this assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Token usage, set once the turn completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<TokenUsage>,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: MessageRole::User,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: Vec::new(),
            tokens_used: None,
        }
    }

    /// Create an empty assistant message placeholder that streaming deltas
    /// are appended to.
    pub fn assistant_placeholder() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: MessageRole::Assistant,
            content: String::new(),
            timestamp: Utc::now(),
            tool_calls: Vec::new(),
            tokens_used: None,
        }
    }

    /// Append a streaming text delta
    pub fn append_delta(&mut self, delta: &str) {
        self.content.push_str(delta);
    }

    /// Set token usage
    pub fn with_tokens(mut self, usage: TokenUsage) -> Self {
        self.tokens_used = Some(usage);
        self
    }
}

/// Session metadata counters and optional client details
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub total_messages: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

/// A persistent conversation scoped to one project directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session ID
    pub id: String,
    /// Absolute path of the project this session operates on
    pub project_path: PathBuf,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Bumped on every store mutation
    pub last_active_at: DateTime<Utc>,
    /// Ordered conversation history, append-only except for explicit clear
    pub conversation_history: Vec<Message>,
    /// Optional project-context preamble injected on the first turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_context: Option<String>,
    pub metadata: SessionMetadata,
}

impl Session {
    /// Create a new session with empty history
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            project_path: project_path.into(),
            created_at: now,
            last_active_at: now,
            conversation_history: Vec::new(),
            claude_context: None,
            metadata: SessionMetadata::default(),
        }
    }

    /// Bandwidth-friendly summary that omits the full history
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            project_path: self.project_path.clone(),
            created_at: self.created_at,
            last_active_at: self.last_active_at,
            message_count: self.conversation_history.len(),
            total_tokens_used: self.metadata.total_tokens_used,
        }
    }
}

/// Session summary returned by `list_sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub project_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens_used: Option<u64>,
}
