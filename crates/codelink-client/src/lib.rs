//! Codelink Client - connection management for gateway clients.
//!
//! [`ConnectionManager`] owns the lifecycle: connect, heartbeat, reconnect
//! with exponential backoff, and an offline queue that preserves messages
//! across outages. The transport is pluggable; [`WsTransport`] is the
//! WebSocket binding.

pub mod backoff;
pub mod connection;
pub mod queue;
pub mod transport;

pub use backoff::ReconnectConfig;
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionStatus};
pub use queue::{OfflineQueue, QueueConfig, QueuedMessage};
pub use transport::{Transport, TransportConn, TransportEvent, WsTransport};
