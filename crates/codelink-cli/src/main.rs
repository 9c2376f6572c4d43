//! Codelink CLI

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codelink_claude::{AnthropicClient, AnthropicConfig, RelayConfig, StreamRelay, ToolExecutor};
use codelink_core::SessionStore;
use codelink_gateway::{create_router, AdmissionConfig, AppState};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Initialize logging with the specified verbosity level
fn init_logging(verbose: u8, quiet: bool, json: bool) -> Result<()> {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter =
        EnvFilter::from_default_env().add_directive(format!("codelink={}", level).parse()?);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose >= 2)
        .with_file(verbose >= 3)
        .with_line_number(verbose >= 3);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "codelink")]
#[command(about = "Session gateway for remote coding-assistant clients")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Session storage directory
    #[arg(
        long,
        env = "CODELINK_DATA_DIR",
        default_value = "~/.codelink/sessions"
    )]
    data_dir: String,

    /// Increase verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output logs as JSON (for machine parsing)
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebSocket gateway
    Serve {
        #[arg(long, env = "CODELINK_HOST", default_value = "0.0.0.0")]
        host: String,

        #[arg(short, long, env = "CODELINK_PORT", default_value = "8765")]
        port: u16,

        /// Model identifier override
        #[arg(long, env = "CODELINK_MODEL")]
        model: Option<String>,

        /// Turn ceiling per user message
        #[arg(long, default_value = "25")]
        max_turns: u32,
    },
    /// Session management
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List stored sessions
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one session with its recent messages
    Show {
        session_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Delete a session
    Delete { session_id: String },
    /// Remove sessions inactive for 30 days
    Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet, cli.log_json)?;

    let data_dir = PathBuf::from(shellexpand::tilde(&cli.data_dir).to_string());
    let store = Arc::new(SessionStore::new(&data_dir).await?);

    match cli.command {
        Commands::Serve {
            host,
            port,
            model,
            max_turns,
        } => {
            serve(store, host, port, model, max_turns).await?;
        }

        Commands::Sessions { action } => match action {
            SessionsAction::List { json } => {
                let sessions = store.list().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&sessions)?);
                } else if sessions.is_empty() {
                    println!("No sessions");
                } else {
                    for session in sessions {
                        println!(
                            "{}  {}  {} messages  last active {}",
                            session.id,
                            session.project_path.display(),
                            session.message_count,
                            session.last_active_at.format("%Y-%m-%d %H:%M"),
                        );
                    }
                }
            }

            SessionsAction::Show { session_id, json } => {
                let session = store.get(&session_id).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&session)?);
                } else {
                    println!("Session {}", session.id);
                    println!("  Project: {}", session.project_path.display());
                    println!("  Created: {}", session.created_at.format("%Y-%m-%d %H:%M"));
                    println!(
                        "  Last active: {}",
                        session.last_active_at.format("%Y-%m-%d %H:%M")
                    );
                    println!("  Messages: {}", session.conversation_history.len());
                    if let Some(tokens) = session.metadata.total_tokens_used {
                        println!("  Tokens used: {}", tokens);
                    }
                    for message in session.conversation_history.iter().rev().take(10).rev() {
                        let mut preview: String = message.content.chars().take(80).collect();
                        if preview.len() < message.content.len() {
                            preview.push_str("...");
                        }
                        println!("  [{}] {}", message.role.as_str(), preview);
                    }
                }
            }

            SessionsAction::Delete { session_id } => {
                store.delete(&session_id).await?;
                println!("Deleted session {}", session_id);
            }

            SessionsAction::Cleanup => {
                let removed = store.cleanup_old_sessions().await?;
                println!("Removed {} inactive sessions", removed);
            }
        },
    }

    Ok(())
}

async fn serve(
    store: Arc<SessionStore>,
    host: String,
    port: u16,
    model: Option<String>,
    max_turns: u32,
) -> Result<()> {
    let api_key = std::env::var("CODELINK_API_KEY")
        .context("CODELINK_API_KEY must be set to start the gateway")?;

    let mut model_config = AnthropicConfig::default();
    if let Some(model) = model {
        model_config.model = model;
    }
    info!(model = %model_config.model, "Using model");

    let client = AnthropicClient::with_config(api_key, model_config);
    let relay = Arc::new(StreamRelay::new(
        Arc::new(client),
        Arc::clone(&store),
        ToolExecutor::default(),
        RelayConfig {
            max_turns,
            ..RelayConfig::default()
        },
    ));
    let state = Arc::new(AppState::new(store, relay, AdmissionConfig::default()));
    let app = create_router(state);

    println!("Starting gateway on ws://{}:{}/ws", host, port);
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
