use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::events::SessionEvent;
use super::retry::{self, StageOutcome};
use super::session::{RecordingSession, SessionStage, StreamConfig};
use crate::capture::{CaptureBackend, CaptureError, CaptureRequest};
use crate::config::{RetrySettings, Settings};
use crate::process::{AudioProcessor, ProcessingError, TagMetadata};
use crate::store::SessionStore;
use crate::transfer::{TransferAck, TransferAgent, TransferError};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const RAW_FILE_NAME: &str = "raw.mp3";

#[derive(Debug, Error)]
pub enum AdmissionError {
    /// All concurrency slots are taken. Terminal for this admission attempt
    /// only; the caller may re-trigger the whole session later.
    #[error("concurrent recording limit reached")]
    ResourceExhausted,
}

enum Terminal {
    Completed,
    Failed(String),
    Cancelled,
}

struct ActiveSession {
    state: Arc<RwLock<RecordingSession>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Sequences capture → process → transfer for each admitted session and is
/// the only writer of session state. Components are injected so tests run
/// with doubles and an in-memory store.
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    work_dir: PathBuf,
    cleanup_after_transfer: bool,
    retry: RetrySettings,
    gate: Arc<Semaphore>,
    capture: Arc<dyn CaptureBackend>,
    processor: Arc<dyn AudioProcessor>,
    transfer: Arc<dyn TransferAgent>,
    store: Arc<dyn SessionStore>,
    events: broadcast::Sender<SessionEvent>,
    sessions: RwLock<HashMap<Uuid, Arc<ActiveSession>>>,
}

impl Orchestrator {
    pub fn new(
        settings: &Settings,
        capture: Arc<dyn CaptureBackend>,
        processor: Arc<dyn AudioProcessor>,
        transfer: Arc<dyn TransferAgent>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                work_dir: settings.recorder.work_dir.clone(),
                cleanup_after_transfer: settings.orchestrator.cleanup_after_transfer,
                retry: settings.retry.clone(),
                gate: Arc::new(Semaphore::new(settings.orchestrator.max_concurrent_recordings)),
                capture,
                processor,
                transfer,
                store,
                events,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Admit a new session, or fail fast when the gate is saturated. Never
    /// blocks and never queues; queueing is the trigger source's concern.
    pub async fn start_session(
        &self,
        config: StreamConfig,
        duration_limit: Option<Duration>,
    ) -> Result<Uuid, AdmissionError> {
        let permit = self
            .inner
            .gate
            .clone()
            .try_acquire_owned()
            .map_err(|_| AdmissionError::ResourceExhausted)?;

        let session = RecordingSession::new(config);
        let id = session.id;
        info!("Admitted session {} for stream '{}'", id, session.config.name);

        let entry = Arc::new(ActiveSession {
            state: Arc::new(RwLock::new(session)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        });

        {
            let mut sessions = self.inner.sessions.write().await;
            sessions.insert(id, Arc::clone(&entry));
        }

        Inner::transition(&self.inner, &entry.state, SessionStage::Scheduled, None).await;

        let inner = Arc::clone(&self.inner);
        let task_entry = Arc::clone(&entry);
        let handle = tokio::spawn(async move {
            Inner::run_session(inner, id, task_entry, permit, duration_limit).await;
        });
        *entry.task.lock().await = Some(handle);

        Ok(id)
    }

    /// Request cancellation of a non-terminal session. The token interrupts
    /// whatever the session task is blocked on. Returns false if the session
    /// is not active.
    pub async fn cancel_session(&self, id: Uuid) -> bool {
        let sessions = self.inner.sessions.read().await;
        match sessions.get(&id) {
            Some(entry) => {
                info!("Cancellation requested for session {id}");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Read-only copy of a session, active or terminal.
    pub async fn session_status(&self, id: Uuid) -> Option<RecordingSession> {
        {
            let sessions = self.inner.sessions.read().await;
            if let Some(entry) = sessions.get(&id) {
                return Some(entry.state.read().await.clone());
            }
        }
        self.inner.store.get(id).await
    }

    /// Read-only copies of all non-terminal sessions.
    pub async fn active_sessions(&self) -> Vec<RecordingSession> {
        let entries: Vec<Arc<ActiveSession>> = {
            let sessions = self.inner.sessions.read().await;
            sessions.values().cloned().collect()
        };
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            out.push(entry.state.read().await.clone());
        }
        out
    }

    /// Subscribe to the session event stream (store and monitoring consumers
    /// subscribe independently).
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Cancel every active session and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        let entries: Vec<Arc<ActiveSession>> = {
            let sessions = self.inner.sessions.read().await;
            sessions.values().cloned().collect()
        };
        if entries.is_empty() {
            return;
        }

        info!("Shutting down, cancelling {} active session(s)", entries.len());
        let mut handles = Vec::new();
        for entry in entries {
            entry.cancel.cancel();
            if let Some(handle) = entry.task.lock().await.take() {
                handles.push(handle);
            }
        }
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Session task panicked during shutdown: {e}");
            }
        }
    }
}

impl Inner {
    async fn run_session(
        inner: Arc<Inner>,
        id: Uuid,
        entry: Arc<ActiveSession>,
        permit: tokio::sync::OwnedSemaphorePermit,
        duration_limit: Option<Duration>,
    ) {
        let terminal = Self::drive(&inner, &entry, duration_limit).await;

        // The slot is released on every path, before the terminal record
        // goes out, so a waiting trigger can re-admit immediately.
        {
            let mut sessions = inner.sessions.write().await;
            sessions.remove(&id);
        }
        drop(permit);

        let state = &entry.state;
        match terminal {
            Terminal::Completed => {
                Self::transition(&inner, state, SessionStage::Completed, None).await;
                info!("Session {id} completed");
            }
            Terminal::Failed(reason) => {
                Self::transition(&inner, state, SessionStage::Failed, Some(reason)).await;
                let s = state.read().await;
                if let Some(path) = &s.artifact_path {
                    warn!(
                        "Session {id} failed; keeping {} for manual recovery",
                        path.display()
                    );
                }
            }
            Terminal::Cancelled => {
                // Same cleanup guarantee as a failure: partial files are
                // retained, never silently lost.
                Self::transition(&inner, state, SessionStage::Cancelled, None).await;
                info!("Session {id} cancelled");
            }
        }
    }

    async fn drive(
        inner: &Arc<Inner>,
        entry: &Arc<ActiveSession>,
        duration_limit: Option<Duration>,
    ) -> Terminal {
        let state = &entry.state;
        let cancel = &entry.cancel;

        let (id, config, started_at, work_dir, output_name) = {
            let s = state.read().await;
            (
                s.id,
                s.config.clone(),
                s.started_at,
                s.work_dir(&inner.work_dir),
                s.output_name(),
            )
        };
        let raw_path = work_dir.join(RAW_FILE_NAME);
        let artifact_path = work_dir.join(&output_name);

        // ---- capture ----
        Self::transition(inner, state, SessionStage::Capturing, None).await;

        let request = CaptureRequest {
            session_id: id,
            stream_url: config.stream_url.clone(),
            output_path: raw_path.clone(),
            duration_limit,
        };
        let backend = Arc::clone(&inner.capture);
        let (retries, outcome) = retry::run_stage(&inner.retry.capture, cancel, "capture", || {
            capture_once(Arc::clone(&backend), request.clone(), cancel.clone())
        })
        .await;
        state.write().await.attempts.capture = retries;

        match outcome {
            StageOutcome::Ok(()) => {
                let mut s = state.write().await;
                s.artifact_path = Some(raw_path.clone());
            }
            StageOutcome::Failed(reason) => return Terminal::Failed(reason),
            StageOutcome::Cancelled => return Terminal::Cancelled,
        }

        // ---- processing ----
        Self::transition(inner, state, SessionStage::Processing, None).await;

        let tags = TagMetadata {
            artist: config.artist.clone(),
            album: config.album.clone(),
            album_artist: config.album_artist.clone(),
        };
        let processor = Arc::clone(&inner.processor);
        let (retries, outcome) = retry::run_stage(&inner.retry.process, cancel, "process", || {
            let processor = Arc::clone(&processor);
            let raw = raw_path.clone();
            let out = artifact_path.clone();
            let tags = tags.clone();
            let artwork = config.artwork_path.clone();
            let cancel = cancel.clone();
            async move {
                tokio::select! {
                    result = processor.process(&raw, &out, &tags, artwork.as_deref(), started_at) => result,
                    // Abandon the in-flight attempt; the runner reports
                    // Cancelled, this error is never surfaced.
                    _ = cancel.cancelled() => Err(ProcessingError::Invalid("cancelled".to_string())),
                }
            }
        })
        .await;
        state.write().await.attempts.process = retries;

        match outcome {
            StageOutcome::Ok(path) => {
                let mut s = state.write().await;
                s.artifact_path = Some(path);
            }
            StageOutcome::Failed(reason) => {
                // The raw capture stays on disk for a future manual run.
                return Terminal::Failed(reason);
            }
            StageOutcome::Cancelled => return Terminal::Cancelled,
        }

        // ---- transfer ----
        Self::transition(inner, state, SessionStage::Transferring, None).await;

        let transfer = Arc::clone(&inner.transfer);
        let (retries, outcome) = retry::run_stage(&inner.retry.transfer, cancel, "transfer", || {
            let transfer = Arc::clone(&transfer);
            let artifact = artifact_path.clone();
            let destination = config.destination.clone();
            let key = config.ssh_key_path.clone();
            let cancel = cancel.clone();
            async move {
                tokio::select! {
                    result = transfer.send(&artifact, &destination, key.as_deref()) => result,
                    _ = cancel.cancelled() => Err(TransferError::Connection("cancelled".to_string())),
                }
            }
        })
        .await;
        state.write().await.attempts.transfer = retries;

        let ack: TransferAck = match outcome {
            StageOutcome::Ok(ack) => ack,
            StageOutcome::Failed(reason) => {
                // A file that could not be delivered is never discarded.
                return Terminal::Failed(reason);
            }
            StageOutcome::Cancelled => return Terminal::Cancelled,
        };

        // ---- finalize ----
        {
            let mut s = state.write().await;
            s.transfer_confirmed = true;
        }
        info!(
            "Session {id} delivered {} bytes to {} in {:.2}s",
            ack.bytes,
            ack.remote_path,
            ack.elapsed.as_secs_f64()
        );

        Self::cleanup_after_success(inner, &raw_path, &artifact_path).await;
        Terminal::Completed
    }

    /// Local cleanup once the remote end has acknowledged receipt. The
    /// artifact is removed only when the policy says so; the raw capture is
    /// always dropped on success.
    async fn cleanup_after_success(inner: &Arc<Inner>, raw_path: &Path, artifact_path: &Path) {
        if raw_path != artifact_path {
            if let Err(e) = tokio::fs::remove_file(raw_path).await {
                warn!("Could not remove raw capture {}: {e}", raw_path.display());
            }
        }
        if inner.cleanup_after_transfer {
            if let Err(e) = tokio::fs::remove_file(artifact_path).await {
                warn!("Could not remove artifact {}: {e}", artifact_path.display());
            }
            if let Some(dir) = artifact_path.parent() {
                // Best effort: fails while the directory still has content.
                let _ = tokio::fs::remove_dir(dir).await;
            }
        }
    }

    /// Apply a stage transition and publish it: broadcast to subscribers and
    /// hand the snapshot to the injected store. Store failures are logged,
    /// never propagated into the session.
    async fn transition(
        inner: &Arc<Inner>,
        state: &Arc<RwLock<RecordingSession>>,
        next: SessionStage,
        error: Option<String>,
    ) {
        let snapshot = {
            let mut s = state.write().await;
            debug_assert!(
                s.stage == next || s.stage.can_transition(next),
                "illegal transition {} -> {}",
                s.stage,
                next
            );
            s.stage = next;
            s.error = error;
            if next.is_terminal() {
                s.ended_at = Some(Local::now());
            }
            s.clone()
        };

        info!("Session {} stage changed to: {}", snapshot.id, snapshot.stage);

        let event = SessionEvent::for_session(&snapshot);
        let _ = inner.events.send(event.clone());
        if let Err(e) = inner.store.record_transition(&snapshot, &event).await {
            error!("Failed to persist transition for session {}: {e}", snapshot.id);
        }
    }
}

/// One capture attempt. Exactly one recorder process is associated with the
/// session at any time: the handle lives on this stack frame and the previous
/// attempt's process has always exited before the retry loop calls us again.
async fn capture_once(
    backend: Arc<dyn CaptureBackend>,
    request: CaptureRequest,
    cancel: CancellationToken,
) -> Result<(), CaptureError> {
    let mut handle = backend.start(request).await?;
    tokio::select! {
        result = handle.wait() => result,
        _ = cancel.cancelled() => {
            // Interrupt the blocked wait and tear the process group down.
            handle.stop().await
        }
    }
}
