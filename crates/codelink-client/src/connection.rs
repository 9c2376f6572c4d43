//! Connection manager: state machine, reconnection and delivery.
//!
//! A background driver task owns the live connection. Callers talk to it
//! through a command channel and observe state through a watch channel;
//! messages sent while the link is down land in the offline queue and are
//! flushed in order on reconnect. An intentional `disconnect()` closes with
//! the normal-closure code and stops the driver for good; any other
//! connection loss triggers exponential-backoff reconnection.

use std::sync::Arc;
use std::time::Duration;

use codelink_core::{ClientMessage, ClientMetadata, ServerEnvelope, CLOSE_NORMAL};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::backoff::ReconnectConfig;
use crate::queue::{OfflineQueue, QueueConfig};
use crate::transport::{Transport, TransportConn, TransportEvent};

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnection attempts exhausted
    Error,
}

/// Connection manager settings
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Gateway URL, e.g. `ws://host:port/ws`
    pub url: String,
    pub reconnect: ReconnectConfig,
    /// Client ping cadence
    pub heartbeat_interval: Duration,
    /// How long after a ping the server may stay silent
    pub pong_grace: Duration,
    pub queue: QueueConfig,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            heartbeat_interval: Duration::from_secs(30),
            pong_grace: Duration::from_secs(5),
            queue: QueueConfig::default(),
        }
    }
}

enum Command {
    Send(ClientMessage),
    Disconnect,
}

struct Shared {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    queue: OfflineQueue,
    status: watch::Sender<ConnectionStatus>,
}

/// Handle to a managed gateway connection
pub struct ConnectionManager {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
}

impl ConnectionManager {
    /// Start connecting. Returns the manager and the stream of server
    /// envelopes; dropping the receiver shuts the connection down.
    pub fn connect(
        transport: Arc<dyn Transport>,
        config: ConnectionConfig,
    ) -> (Self, mpsc::Receiver<ServerEnvelope>) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);

        let shared = Arc::new(Shared {
            queue: OfflineQueue::new(config.queue.clone()),
            config,
            transport,
            status: status_tx,
        });
        tokio::spawn(drive(Arc::clone(&shared), command_rx, event_tx));

        (
            Self {
                shared,
                commands: command_tx,
            },
            event_rx,
        )
    }

    /// Watchable connection state
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Messages currently waiting in the offline queue
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Send a message, queueing it if the connection is down
    pub async fn send(&self, message: ClientMessage) {
        if *self.shared.status.borrow() == ConnectionStatus::Connected {
            if let Err(e) = self.commands.try_send(Command::Send(message)) {
                if let Command::Send(message) = e.into_inner() {
                    self.shared.queue.enqueue(message);
                }
            }
            return;
        }
        self.shared.queue.enqueue(message);
    }

    pub async fn init_session(
        &self,
        session_id: Option<String>,
        project_path: Option<String>,
        metadata: Option<ClientMetadata>,
    ) {
        self.send(ClientMessage::InitSession {
            session_id,
            project_path,
            metadata,
        })
        .await;
    }

    pub async fn send_message(&self, content: impl Into<String>) {
        self.send(ClientMessage::Message {
            content: content.into(),
        })
        .await;
    }

    pub async fn list_sessions(&self) {
        self.send(ClientMessage::ListSessions).await;
    }

    pub async fn get_session(&self, session_id: impl Into<String>) {
        self.send(ClientMessage::GetSession {
            session_id: session_id.into(),
        })
        .await;
    }

    pub async fn delete_session(&self, session_id: impl Into<String>) {
        self.send(ClientMessage::DeleteSession {
            session_id: session_id.into(),
        })
        .await;
    }

    /// Intentional disconnect: closes with the normal-closure code and
    /// disables reconnection.
    pub async fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect).await;
    }
}

enum ConnectionEnd {
    /// Intentional close, no reconnection
    Closed,
    /// Connection lost, reconnect with backoff
    Lost,
}

async fn drive(
    shared: Arc<Shared>,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<ServerEnvelope>,
) {
    let mut attempt: u32 = 0;
    loop {
        let _ = shared.status.send(if attempt == 0 {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Reconnecting
        });

        match shared.transport.connect(&shared.config.url).await {
            Ok(mut conn) => {
                attempt = 0;
                let _ = shared.status.send(ConnectionStatus::Connected);
                info!(url = %shared.config.url, "Connected");

                match run_connection(&shared, conn.as_mut(), &mut commands, &events).await {
                    ConnectionEnd::Closed => {
                        let _ = shared.status.send(ConnectionStatus::Disconnected);
                        info!("Disconnected");
                        return;
                    }
                    ConnectionEnd::Lost => debug!("Connection lost"),
                }
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Connection attempt failed");
            }
        }

        attempt += 1;
        if let Some(max) = shared.config.reconnect.max_attempts {
            if attempt > max {
                error!(attempts = max, "Reconnection attempts exhausted");
                let _ = shared.status.send(ConnectionStatus::Error);
                return;
            }
        }

        let delay = shared.config.reconnect.delay_for_attempt(attempt);
        let _ = shared.status.send(ConnectionStatus::Reconnecting);
        debug!(attempt, ?delay, "Backing off before reconnect");

        let deadline = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                command = commands.recv() => match command {
                    None | Some(Command::Disconnect) => {
                        let _ = shared.status.send(ConnectionStatus::Disconnected);
                        return;
                    }
                    Some(Command::Send(message)) => shared.queue.enqueue(message),
                },
            }
        }
    }
}

async fn run_connection(
    shared: &Shared,
    conn: &mut dyn TransportConn,
    commands: &mut mpsc::Receiver<Command>,
    events: &mpsc::Sender<ServerEnvelope>,
) -> ConnectionEnd {
    // Deliver everything queued while we were offline, oldest first
    while let Some(item) = shared.queue.pop() {
        let json = match serde_json::to_string(&item.message) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Dropping unserializable queued message");
                continue;
            }
        };
        if conn.send_text(json).await.is_err() {
            shared.queue.record_failure(item);
            return ConnectionEnd::Lost;
        }
    }

    let mut heartbeat = tokio::time::interval(shared.config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                None | Some(Command::Disconnect) => {
                    let _ = conn.close(CLOSE_NORMAL).await;
                    return ConnectionEnd::Closed;
                }
                Some(Command::Send(message)) => {
                    match serde_json::to_string(&message) {
                        Ok(json) => {
                            if conn.send_text(json).await.is_err() {
                                shared.queue.enqueue(message);
                                return ConnectionEnd::Lost;
                            }
                        }
                        Err(e) => warn!(error = %e, "Unserializable outbound message"),
                    }
                }
            },

            event = conn.next_event() => {
                let event = match event {
                    None => return ConnectionEnd::Lost,
                    Some(Err(e)) => {
                        debug!(error = %format!("{:#}", e), "Socket error");
                        return ConnectionEnd::Lost;
                    }
                    Some(Ok(event)) => event,
                };
                // Any inbound traffic proves the link is alive
                pong_deadline = None;

                match event {
                    TransportEvent::Text(text) => {
                        match serde_json::from_str::<ServerEnvelope>(&text) {
                            Ok(envelope) => {
                                if events.send(envelope).await.is_err() {
                                    let _ = conn.close(CLOSE_NORMAL).await;
                                    return ConnectionEnd::Closed;
                                }
                            }
                            Err(e) => warn!(error = %e, "Unparseable server message"),
                        }
                    }
                    TransportEvent::Pong => {}
                    TransportEvent::Closed { code } => {
                        return if code == Some(CLOSE_NORMAL) {
                            ConnectionEnd::Closed
                        } else {
                            ConnectionEnd::Lost
                        };
                    }
                }
            },

            _ = heartbeat.tick() => {
                if conn.send_ping().await.is_err() {
                    return ConnectionEnd::Lost;
                }
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + shared.config.pong_grace);
                }
            },

            _ = async {
                match pong_deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            }, if pong_deadline.is_some() => {
                warn!("Heartbeat pong missed, dropping connection");
                return ConnectionEnd::Lost;
            },
        }
    }
}
