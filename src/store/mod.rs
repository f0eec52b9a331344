//! Session store seam
//!
//! The orchestrator never reads the store during an in-flight session (the
//! config snapshot is taken at admission); it only hands over the session and
//! a transition event on every state change. The store is injected, so the
//! orchestrator is testable with the in-memory implementation.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::orchestrator::{RecordingSession, SessionEvent};

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a stage transition along with the full session snapshot.
    async fn record_transition(
        &self,
        session: &RecordingSession,
        event: &SessionEvent,
    ) -> Result<()>;

    /// Latest recorded snapshot for a session, if any.
    async fn get(&self, id: Uuid) -> Option<RecordingSession>;
}

/// In-memory store for tests and monitoring.
#[derive(Default)]
pub struct InMemorySessionStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<Uuid, RecordingSession>,
    events: Vec<SessionEvent>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, in order.
    pub async fn events(&self) -> Vec<SessionEvent> {
        self.inner.lock().await.events.clone()
    }

    /// Events for one session, in order.
    pub async fn events_for(&self, id: Uuid) -> Vec<SessionEvent> {
        self.inner
            .lock()
            .await
            .events
            .iter()
            .filter(|e| e.session_id == id)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn record_transition(
        &self,
        session: &RecordingSession,
        event: &SessionEvent,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(session.id, session.clone());
        inner.events.push(event.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Option<RecordingSession> {
        self.inner.lock().await.sessions.get(&id).cloned()
    }
}

/// Append-only JSON-lines event log, the shipping stand-in for the external
/// configuration/session store. Keeps the latest snapshot per session in
/// memory for status lookups.
pub struct JsonlSessionStore {
    path: PathBuf,
    inner: Mutex<MemoryInner>,
}

impl JsonlSessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            inner: Mutex::new(MemoryInner::default()),
        }
    }
}

#[async_trait::async_trait]
impl SessionStore for JsonlSessionStore {
    async fn record_transition(
        &self,
        session: &RecordingSession,
        event: &SessionEvent,
    ) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.sessions.insert(session.id, session.clone());
            inner.events.push(event.clone());
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_vec(event).context("serialize session event")?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("open event log {}", self.path.display()))?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Option<RecordingSession> {
        self.inner.lock().await.sessions.get(&id).cloned()
    }
}
