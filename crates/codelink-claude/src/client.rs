//! Anthropic streaming client
//!
//! Uses the secrecy crate to protect API keys in memory. The raw SSE stream
//! is normalized into [`ModelEvent`]s so the relay never sees wire details.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use codelink_core::TokenUsage;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Default timeout for establishing the stream
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Events produced by a model event source, in emission order
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// Chunk of assistant text
    TextDelta(String),
    /// A tool-use block began
    ToolUseStart { id: String, name: String },
    /// Partial structured input for the current tool-use block
    ToolUseDelta { partial_json: String },
    /// The current tool-use block is complete
    ToolUseStop,
    /// The assistant turn is complete
    MessageStop { usage: Option<TokenUsage> },
}

/// One prompt entry sent to the model
#[derive(Debug, Clone, Serialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

/// Tool made available to the model
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A single turn's outbound request
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub messages: Vec<PromptMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// Black-box model event source. The production implementation streams from
/// the Anthropic API; tests substitute scripted sources.
#[async_trait]
pub trait ModelSource: Send + Sync {
    /// Open a stream for one turn. Stream-level failures arrive as `Err`
    /// items on the channel; the channel closes when the turn ends.
    async fn stream(&self, request: StreamRequest) -> Result<mpsc::Receiver<Result<ModelEvent>>>;
}

/// Configuration for the Anthropic client
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// Base URL for the API
    pub base_url: String,
    /// Model identifier
    pub model: String,
    /// Per-turn completion budget
    pub max_tokens: u32,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com/v1".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
        }
    }
}

/// Streaming Anthropic API client
#[derive(Clone)]
pub struct AnthropicClient {
    api_key: SecretString,
    config: AnthropicConfig,
    client: reqwest::Client,
}

impl AnthropicClient {
    /// Create a new client with default settings
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_config(api_key, AnthropicConfig::default())
    }

    /// Create a new client with custom configuration
    pub fn with_config(api_key: impl Into<String>, config: AnthropicConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            api_key: SecretString::new(api_key.into()),
            config,
            client,
        }
    }
}

#[async_trait]
impl ModelSource for AnthropicClient {
    async fn stream(&self, request: StreamRequest) -> Result<mpsc::Receiver<Result<ModelEvent>>> {
        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": request.messages,
            "tools": request.tools,
            "stream": true,
        });

        let response = self
            .client
            .post(format!("{}/messages", self.config.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(anyhow!("Anthropic API error ({}): {}", status, error));
        }

        let (tx, rx) = mpsc::channel(64);
        let mut bytes = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();
            let mut usage = TokenUsage::default();
            let mut in_tool_block = false;

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(anyhow!("Stream read failed: {}", e))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(event) = next_sse_event(&mut buffer) {
                    let Some(data) = sse_data(&event) else {
                        continue;
                    };
                    let wire = match serde_json::from_str::<WireEvent>(data) {
                        Ok(wire) => wire,
                        Err(e) => {
                            debug!("Skipping unrecognized stream event: {}", e);
                            continue;
                        }
                    };

                    let forwarded = match wire {
                        WireEvent::MessageStart { message } => {
                            if let Some(wire_usage) = message.usage {
                                usage.input = wire_usage.input_tokens;
                            }
                            Ok(None)
                        }
                        WireEvent::ContentBlockStart { content_block } => match content_block {
                            WireContentBlock::ToolUse { id, name } => {
                                in_tool_block = true;
                                Ok(Some(ModelEvent::ToolUseStart { id, name }))
                            }
                            WireContentBlock::Text { .. } => Ok(None),
                        },
                        WireEvent::ContentBlockDelta { delta } => match delta {
                            WireDelta::TextDelta { text } => Ok(Some(ModelEvent::TextDelta(text))),
                            WireDelta::InputJsonDelta { partial_json } => {
                                Ok(Some(ModelEvent::ToolUseDelta { partial_json }))
                            }
                        },
                        WireEvent::ContentBlockStop {} => {
                            if std::mem::take(&mut in_tool_block) {
                                Ok(Some(ModelEvent::ToolUseStop))
                            } else {
                                Ok(None)
                            }
                        }
                        WireEvent::MessageDelta { usage: wire_usage } => {
                            if let Some(wire_usage) = wire_usage {
                                usage.output = wire_usage.output_tokens;
                            }
                            Ok(None)
                        }
                        WireEvent::MessageStop => {
                            Ok(Some(ModelEvent::MessageStop { usage: Some(usage) }))
                        }
                        WireEvent::Ping => Ok(None),
                        WireEvent::Error { error } => Err(anyhow!("Model stream error: {}", error)),
                    };

                    match forwarded {
                        Ok(None) => {}
                        Ok(Some(event)) => {
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Drain one complete `\n\n`-terminated SSE event from the buffer
fn next_sse_event(buffer: &mut String) -> Option<String> {
    let end = buffer.find("\n\n")?;
    let event: String = buffer.drain(..end + 2).collect();
    Some(event)
}

/// Extract the `data:` payload from an SSE event
fn sse_data(event: &str) -> Option<&str> {
    event.lines().find_map(|line| line.strip_prefix("data: "))
}

// Wire-level Anthropic stream events. Unknown fields are ignored so minor
// API additions do not break parsing.

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart {
        message: WireMessageStart,
    },
    ContentBlockStart {
        content_block: WireContentBlock,
    },
    ContentBlockDelta {
        delta: WireDelta,
    },
    ContentBlockStop {},
    MessageDelta {
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct WireMessageStart {
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireContentBlock {
    Text {
        #[serde(default)]
        #[allow(dead_code)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}
