//! Inbound message dispatch.
//!
//! Every handler reports failures as an `error` reply on the offending
//! connection; nothing here tears the connection down. Messages starting
//! with `/` are intercepted as slash commands and never reach the model.

use std::path::Path;
use std::sync::Arc;

use codelink_core::{
    ClientMessage, ClientMetadata, Error as CoreError, ServerMessage, Session, SessionUpdate,
};
use codelink_claude::RelayEvent;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::websocket::Outbound;
use crate::AppState;

pub async fn dispatch(state: &Arc<AppState>, connection_id: &str, text: &str, out: &Outbound) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(connection_id, error = %e, "Unparseable inbound message");
            out.send(ServerMessage::Error {
                error: format!("Unrecognized message: {}", e),
                code: Some("protocol_error".to_string()),
            })
            .await;
            return;
        }
    };

    match message {
        ClientMessage::InitSession {
            session_id,
            project_path,
            metadata,
        } => match init_session(state, session_id, project_path, metadata).await {
            Ok(session) => {
                state.registry.bind(connection_id, &session.id);
                out.send(ServerMessage::SessionInitialized {
                    session_id: session.id,
                    project_path: session.project_path.display().to_string(),
                    has_context: session.claude_context.is_some(),
                    message_count: session.conversation_history.len(),
                })
                .await;
            }
            Err(e) => send_error(out, &e).await,
        },

        ClientMessage::Message { content } => {
            let Some(session_id) = state.registry.session_of(connection_id) else {
                out.send(ServerMessage::Error {
                    error: "No session bound; send init_session first".to_string(),
                    code: Some("no_session".to_string()),
                })
                .await;
                return;
            };

            let trimmed = content.trim();
            if trimmed.starts_with('/') {
                handle_slash_command(state, &session_id, trimmed, out).await;
                return;
            }

            // Bridge relay events onto the connection for the whole turn chain
            let (tx, mut rx) = mpsc::channel::<RelayEvent>(256);
            let bridge_out = out.clone();
            let bridge = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    bridge_out.send(relay_event_to_message(event)).await;
                }
            });

            state.relay.run(&session_id, &content, &tx).await;
            drop(tx);
            let _ = bridge.await;
        }

        ClientMessage::ListSessions => match state.store.list().await {
            Ok(sessions) => {
                let count = sessions.len();
                out.send(ServerMessage::SessionsList { sessions, count }).await;
            }
            Err(e) => send_error(out, &e).await,
        },

        ClientMessage::GetSession { session_id } => match state.store.get(&session_id).await {
            Ok(session) => out.send(ServerMessage::SessionData { session }).await,
            Err(e) => send_error(out, &e).await,
        },

        ClientMessage::DeleteSession { session_id } => {
            match state.store.delete(&session_id).await {
                Ok(()) => {
                    // Other connections bound to this session lose the binding
                    for peer in state.registry.unbind_session(&session_id) {
                        peer.send(ServerMessage::SessionDeleted {
                            session_id: session_id.clone(),
                        })
                        .await;
                    }
                    out.send(ServerMessage::SessionDeleted { session_id }).await;
                }
                Err(e) => send_error(out, &e).await,
            }
        }

        ClientMessage::Ping => out.send(ServerMessage::Pong).await,
    }
}

/// Resolve `init_session` into a session: resume by id, or create for a
/// project path, loading the project context preamble if one exists.
async fn init_session(
    state: &AppState,
    session_id: Option<String>,
    project_path: Option<String>,
    metadata: Option<ClientMetadata>,
) -> codelink_core::Result<Session> {
    let (id, created) = match (session_id, project_path) {
        (Some(id), _) => (id, false),
        (None, Some(path)) => {
            let session = state.store.create(&path).await?;
            (session.id, true)
        }
        (None, None) => {
            return Err(CoreError::Protocol(
                "init_session requires session_id or project_path".to_string(),
            ))
        }
    };

    let mut session = state.store.get(&id).await?;

    let claude_context = if created {
        load_project_context(&session.project_path).await
    } else {
        None
    };
    let metadata = metadata.unwrap_or_default();

    if claude_context.is_some() || metadata.client_version.is_some() || metadata.platform.is_some()
    {
        session = state
            .store
            .update(
                &id,
                SessionUpdate {
                    claude_context,
                    client_version: metadata.client_version,
                    platform: metadata.platform,
                },
            )
            .await?;
    }

    Ok(session)
}

/// Read the project's CLAUDE.md as the context preamble, if present
async fn load_project_context(project_path: &Path) -> Option<String> {
    tokio::fs::read_to_string(project_path.join("CLAUDE.md"))
        .await
        .ok()
        .filter(|content| !content.trim().is_empty())
}

async fn handle_slash_command(state: &AppState, session_id: &str, command: &str, out: &Outbound) {
    let name = command.split_whitespace().next().unwrap_or(command);
    let response = match name {
        "/help" => concat!(
            "Available commands:\n",
            "/help - show this help\n",
            "/stats - show session statistics\n",
            "/clear - clear conversation history"
        )
        .to_string(),

        "/stats" => match state.store.get(session_id).await {
            Ok(session) => format!(
                "Session {}\nProject: {}\nMessages: {}\nTokens used: {}\nCreated: {}\nLast active: {}",
                session.id,
                session.project_path.display(),
                session.metadata.total_messages,
                session.metadata.total_tokens_used.unwrap_or(0),
                session.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                session.last_active_at.format("%Y-%m-%d %H:%M:%S UTC"),
            ),
            Err(e) => {
                send_error(out, &e).await;
                return;
            }
        },

        "/clear" => match state.store.clear_history(session_id).await {
            Ok(()) => "Conversation history cleared".to_string(),
            Err(e) => {
                send_error(out, &e).await;
                return;
            }
        },

        other => format!("Unknown command '{}'. Available: /help, /stats, /clear", other),
    };

    out.send(ServerMessage::SlashCommandResponse {
        command: name.to_string(),
        response,
    })
    .await;
}

fn relay_event_to_message(event: RelayEvent) -> ServerMessage {
    match event {
        RelayEvent::ContentDelta { delta } => ServerMessage::ContentDelta { delta },
        RelayEvent::ToolExecution { tool, input } => ServerMessage::ToolExecution { tool, input },
        RelayEvent::ToolResult {
            tool,
            result,
            error,
        } => ServerMessage::ToolResult {
            tool,
            result,
            error,
        },
        RelayEvent::MessageComplete {
            message_id,
            tokens_used,
        } => ServerMessage::MessageComplete {
            message_id,
            tokens_used,
        },
        RelayEvent::Error { error } => ServerMessage::Error {
            error,
            code: Some("stream_error".to_string()),
        },
    }
}

async fn send_error(out: &Outbound, error: &CoreError) {
    warn!(error = %error, "Request failed");
    out.send(ServerMessage::Error {
        error: error.to_string(),
        code: Some(error_code(error).to_string()),
    })
    .await;
}

fn error_code(error: &CoreError) -> &'static str {
    match error {
        CoreError::SessionNotFound(_) => "session_not_found",
        CoreError::InvalidSessionId(_) | CoreError::InvalidPath(_) => "bad_request",
        CoreError::Protocol(_) => "protocol_error",
        _ => "internal_error",
    }
}
