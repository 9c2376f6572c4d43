//! Durable session store.
//!
//! Sessions are cached in memory and persisted as one JSON record per
//! session id. Record-per-session keeps a corrupt or concurrently-written
//! record from touching unrelated sessions and makes deletion O(1).
//!
//! All conversation growth goes through [`SessionStore::add_message`];
//! callers never mutate history directly. Each session entry carries its own
//! async mutex, so writes to one session are serialized while different
//! sessions proceed fully in parallel.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::session::{Message, Session, SessionSummary};

/// Sessions idle longer than this are removed by the cleanup sweep.
pub const INACTIVE_SESSION_MAX_AGE_DAYS: i64 = 30;

/// Partial session update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub claude_context: Option<String>,
    pub client_version: Option<String>,
    pub platform: Option<String>,
}

/// Session records with an in-memory cache over per-session disk records
pub struct SessionStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        info!("Session store initialized at {}", dir.display());
        Ok(Self {
            dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Allocate and persist a new session with empty history
    pub async fn create(&self, project_path: impl Into<PathBuf>) -> Result<Session> {
        let session = Session::new(project_path);
        self.persist(&session).await?;

        let snapshot = session.clone();
        self.cache
            .write()
            .await
            .insert(session.id.clone(), Arc::new(Mutex::new(session)));

        info!(
            "Created session {} for project {}",
            snapshot.id,
            snapshot.project_path.display()
        );
        Ok(snapshot)
    }

    /// Fetch a session snapshot, loading from disk on cache miss
    pub async fn get(&self, id: &str) -> Result<Session> {
        let entry = self.entry(id).await?;
        let session = entry.lock().await;
        Ok(session.clone())
    }

    /// Merge fields into a session and bump `last_active_at`
    pub async fn update(&self, id: &str, update: SessionUpdate) -> Result<Session> {
        let entry = self.entry(id).await?;
        let mut session = entry.lock().await;

        if let Some(context) = update.claude_context {
            session.claude_context = Some(context);
        }
        if let Some(version) = update.client_version {
            session.metadata.client_version = Some(version);
        }
        if let Some(platform) = update.platform {
            session.metadata.platform = Some(platform);
        }
        session.last_active_at = Utc::now();

        self.persist(&session).await?;
        Ok(session.clone())
    }

    /// Append a message to the conversation history. This is the single
    /// writer path for conversation growth.
    pub async fn add_message(&self, id: &str, message: Message) -> Result<()> {
        let entry = self.entry(id).await?;
        let mut session = entry.lock().await;

        if let Some(usage) = &message.tokens_used {
            let running = session.metadata.total_tokens_used.unwrap_or(0);
            session.metadata.total_tokens_used = Some(running + usage.total());
        }
        session.conversation_history.push(message);
        session.metadata.total_messages += 1;
        session.last_active_at = Utc::now();

        self.persist(&session).await
    }

    /// Explicitly clear the conversation history (the `/clear` command)
    pub async fn clear_history(&self, id: &str) -> Result<()> {
        let entry = self.entry(id).await?;
        let mut session = entry.lock().await;

        session.conversation_history.clear();
        session.last_active_at = Utc::now();

        self.persist(&session).await
    }

    /// Enumerate all durable records as summaries, most recently active first
    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut summaries = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.get(id).await {
                Ok(session) => summaries.push(session.summary()),
                Err(e) => {
                    warn!("Skipping unreadable session record {}: {}", path.display(), e);
                }
            }
        }

        summaries.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(summaries)
    }

    /// Remove a session from cache and disk. Deleting an unknown id is a
    /// safe no-op.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.cache.write().await.remove(id);

        let Ok(path) = self.record_path(id) else {
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!("Deleted session {}", id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Delete sessions idle for more than 30 days, returning the count
    pub async fn cleanup_old_sessions(&self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(INACTIVE_SESSION_MAX_AGE_DAYS);
        let mut deleted = 0;

        for summary in self.list().await? {
            if summary.last_active_at < cutoff {
                self.delete(&summary.id).await?;
                deleted += 1;
            }
        }

        if deleted > 0 {
            info!("Cleaned up {} inactive sessions", deleted);
        }
        Ok(deleted)
    }

    async fn entry(&self, id: &str) -> Result<Arc<Mutex<Session>>> {
        if let Some(entry) = self.cache.read().await.get(id) {
            return Ok(entry.clone());
        }

        let session = self.load(id).await?;
        let mut cache = self.cache.write().await;
        // Another task may have loaded the record while we were on disk
        Ok(cache
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(session)))
            .clone())
    }

    /// Session ids are UUIDs; anything else cannot name a record and, more
    /// importantly, cannot escape the store directory.
    fn record_path(&self, id: &str) -> Result<PathBuf> {
        Uuid::parse_str(id).map_err(|_| Error::InvalidSessionId(id.to_string()))?;
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn persist(&self, session: &Session) -> Result<()> {
        let path = self.record_path(&session.id)?;
        let data = serde_json::to_vec_pretty(session)?;
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Session> {
        let path = self
            .record_path(id)
            .map_err(|_| Error::SessionNotFound(id.to_string()))?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::SessionNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }
}
