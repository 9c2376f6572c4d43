//! Pluggable transport under the connection manager.
//!
//! The manager only speaks [`Transport`] / [`TransportConn`], so the
//! WebSocket binding here is interchangeable with any other bidirectional
//! frame transport, and tests drive the manager with scripted connections.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Frames the connection manager cares about
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Text(String),
    Pong,
    Closed { code: Option<u16> },
}

/// Connection factory
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn TransportConn>>;
}

/// One live bidirectional connection
#[async_trait]
pub trait TransportConn: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;
    async fn send_ping(&mut self) -> Result<()>;
    /// Next inbound event; `None` once the connection is gone
    async fn next_event(&mut self) -> Option<Result<TransportEvent>>;
    async fn close(&mut self, code: u16) -> Result<()>;
}

/// WebSocket transport binding
#[derive(Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn TransportConn>> {
        let (stream, _response) = connect_async(url)
            .await
            .with_context(|| format!("Cannot connect to {}", url))?;
        Ok(Box::new(WsConn { stream }))
    }
}

struct WsConn {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportConn for WsConn {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .context("Send failed")
    }

    async fn send_ping(&mut self) -> Result<()> {
        self.stream
            .send(Message::Ping(Vec::new()))
            .await
            .context("Ping failed")
    }

    async fn next_event(&mut self) -> Option<Result<TransportEvent>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(anyhow::anyhow!("Socket read failed: {}", e))),
            };
            match frame {
                Message::Text(text) => return Some(Ok(TransportEvent::Text(text))),
                Message::Pong(_) => return Some(Ok(TransportEvent::Pong)),
                Message::Ping(data) => {
                    // Answer server pings in place
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(anyhow::anyhow!("Pong failed: {}", e)));
                    }
                }
                Message::Close(frame) => {
                    return Some(Ok(TransportEvent::Closed {
                        code: frame.map(|f| f.code.into()),
                    }))
                }
                Message::Binary(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self, code: u16) -> Result<()> {
        self.stream
            .close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: "".into(),
            }))
            .await
            .context("Close failed")
    }
}
