//! Codelink Core - Session data model and persistence
//!
//! This crate provides the fundamental types for the session protocol:
//! - Session, Message and ToolCall entities
//! - Wire protocol envelopes shared by gateway and client
//! - Durable session store (in-memory cache + one record per session on disk)

pub mod error;
pub mod protocol;
pub mod session;
pub mod store;

pub use error::{Error, Result};
pub use protocol::{
    ClientMessage, ClientMetadata, ServerEnvelope, ServerMessage, CLOSE_NORMAL,
    CLOSE_POLICY_VIOLATION,
};
pub use session::{Message, MessageRole, Session, SessionMetadata, SessionSummary, TokenUsage, ToolCall};
pub use store::{SessionStore, SessionUpdate, INACTIVE_SESSION_MAX_AGE_DAYS};
