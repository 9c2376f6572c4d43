//! Agentic stream relay.
//!
//! Drives one user message to completion: streams the assistant turn,
//! executes requested tools, feeds tool output back to the model and repeats
//! until a turn produces zero tool calls. Tool failures are data recorded on
//! the ToolCall, never errors; the only failure callers can observe is a
//! single [`RelayEvent::Error`] on the sink.

use anyhow::{bail, Result};
use codelink_core::{Message, Session, SessionStore, TokenUsage, ToolCall};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::client::{ModelEvent, ModelSource, PromptMessage, StreamRequest, ToolDefinition};
use crate::tools::{tool_definitions, ToolExecutor};

/// Events the relay emits to its sink, in stream order
#[derive(Debug, Clone)]
pub enum RelayEvent {
    ContentDelta {
        delta: String,
    },
    ToolExecution {
        tool: String,
        input: Value,
    },
    ToolResult {
        tool: String,
        result: Option<String>,
        error: Option<String>,
    },
    MessageComplete {
        message_id: String,
        tokens_used: Option<TokenUsage>,
    },
    Error {
        error: String,
    },
}

/// Relay tuning knobs
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Ceiling on turns in one tool-use chain. A misbehaving model that
    /// keeps requesting tools is cut off here.
    pub max_turns: u32,
    /// How many trailing history entries are sent to the model
    pub history_window: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_turns: 25,
            history_window: 10,
        }
    }
}

/// Turns model streams into client-visible events and drives tool execution
pub struct StreamRelay {
    source: Arc<dyn ModelSource>,
    store: Arc<SessionStore>,
    executor: ToolExecutor,
    config: RelayConfig,
}

impl StreamRelay {
    pub fn new(
        source: Arc<dyn ModelSource>,
        store: Arc<SessionStore>,
        executor: ToolExecutor,
        config: RelayConfig,
    ) -> Self {
        Self {
            source,
            store,
            executor,
            config,
        }
    }

    /// Process one user message to completion. All failures surface as a
    /// single [`RelayEvent::Error`] on the sink; this never returns an error
    /// to the caller.
    pub async fn run(&self, session_id: &str, user_text: &str, sink: &mpsc::Sender<RelayEvent>) {
        if let Err(e) = self.run_inner(session_id, user_text, sink).await {
            error!(session_id, error = %format!("{:#}", e), "Relay turn aborted");
            let _ = sink
                .send(RelayEvent::Error {
                    error: format!("{:#}", e),
                })
                .await;
        }
    }

    async fn run_inner(
        &self,
        session_id: &str,
        user_text: &str,
        sink: &mpsc::Sender<RelayEvent>,
    ) -> Result<()> {
        let session = self.store.get(session_id).await?;
        let project_root = session.project_path.clone();

        self.store
            .add_message(session_id, Message::user(user_text))
            .await?;

        let tools = tool_definitions();
        let mut turn = 0u32;

        loop {
            turn += 1;
            if turn > self.config.max_turns {
                bail!(
                    "Turn limit of {} reached without the model completing",
                    self.config.max_turns
                );
            }
            debug!(session_id, turn, "Starting relay turn");

            let session = self.store.get(session_id).await?;
            let request = build_request(&session, &tools, self.config.history_window);

            let mut events = self.source.stream(request).await?;
            let mut assistant = Message::assistant_placeholder();
            let mut usage = None;

            while let Some(event) = events.recv().await {
                match event? {
                    ModelEvent::TextDelta(delta) => {
                        assistant.append_delta(&delta);
                        let _ = sink.send(RelayEvent::ContentDelta { delta }).await;
                    }
                    ModelEvent::ToolUseStart { id: _, name } => {
                        assistant.tool_calls.push(ToolCall::new(name));
                    }
                    ModelEvent::ToolUseDelta { partial_json } => {
                        if let Some(call) = assistant.tool_calls.last_mut() {
                            merge_tool_input(&mut call.input, &partial_json);
                        }
                    }
                    ModelEvent::ToolUseStop => {
                        let Some(call) = assistant.tool_calls.last_mut() else {
                            continue;
                        };
                        let _ = sink
                            .send(RelayEvent::ToolExecution {
                                tool: call.name.clone(),
                                input: call.input.clone(),
                            })
                            .await;

                        let outcome = self
                            .executor
                            .execute(&call.name, &call.input, &project_root)
                            .await;
                        call.complete(outcome);

                        let _ = sink
                            .send(RelayEvent::ToolResult {
                                tool: call.name.clone(),
                                result: call.result.clone(),
                                error: call.error.clone(),
                            })
                            .await;
                    }
                    ModelEvent::MessageStop { usage: turn_usage } => {
                        usage = turn_usage;
                        let _ = sink
                            .send(RelayEvent::MessageComplete {
                                message_id: assistant.id.clone(),
                                tokens_used: usage,
                            })
                            .await;
                    }
                }
            }

            if let Some(usage) = usage {
                assistant = assistant.with_tokens(usage);
            }

            let tool_calls = assistant.tool_calls.clone();
            self.store.add_message(session_id, assistant).await?;

            if tool_calls.is_empty() {
                info!(session_id, turns = turn, "Relay chain complete");
                return Ok(());
            }

            // Feed tool output back so the model can react to it
            self.store
                .add_message(session_id, Message::user(render_tool_results(&tool_calls)))
                .await?;
        }
    }
}

/// Build the outbound prompt from the trailing history window. The project
/// context preamble is injected only on the very first turn of a session.
fn build_request(session: &Session, tools: &[ToolDefinition], window: usize) -> StreamRequest {
    let history = &session.conversation_history;
    let start = history.len().saturating_sub(window);

    let mut messages: Vec<PromptMessage> = history[start..]
        .iter()
        .map(|message| PromptMessage {
            role: message.role.as_str().to_string(),
            content: if message.content.is_empty() {
                render_tool_requests(&message.tool_calls)
            } else {
                message.content.clone()
            },
        })
        .collect();

    if history.len() == 1 {
        if let (Some(context), Some(first)) = (&session.claude_context, messages.first_mut()) {
            first.content = format!("{}\n\n{}", context, first.content);
        }
    }

    StreamRequest {
        messages,
        tools: tools.to_vec(),
    }
}

/// Incrementally merge one structured-input fragment into a tool call's
/// input. Malformed fragments are logged and skipped, never fatal.
fn merge_tool_input(input: &mut Value, fragment: &str) {
    match serde_json::from_str::<Value>(fragment) {
        Ok(Value::Object(incoming)) => {
            if let Value::Object(existing) = input {
                existing.extend(incoming);
            } else {
                *input = Value::Object(incoming);
            }
        }
        Ok(other) => {
            warn!(fragment = %other, "Skipping non-object tool input fragment");
        }
        Err(e) => {
            warn!(error = %e, "Skipping malformed tool input fragment");
        }
    }
}

fn render_tool_requests(tool_calls: &[ToolCall]) -> String {
    if tool_calls.is_empty() {
        return "(empty)".to_string();
    }
    let names: Vec<&str> = tool_calls.iter().map(|c| c.name.as_str()).collect();
    format!("(requested tools: {})", names.join(", "))
}

/// Render the synthetic user entry that carries tool output back to the model
fn render_tool_results(tool_calls: &[ToolCall]) -> String {
    let mut rendered = String::from("Tool results:");
    for call in tool_calls {
        rendered.push('\n');
        match (&call.result, &call.error) {
            (Some(result), _) => rendered.push_str(&format!("[{}]\n{}", call.name, result)),
            (_, Some(error)) => rendered.push_str(&format!("[{}] error: {}", call.name, error)),
            _ => rendered.push_str(&format!("[{}] (no output)", call.name)),
        }
    }
    rendered
}
