use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable snapshot of a stream definition, taken at trigger time. A
/// concurrent edit to the live configuration never affects an in-flight
/// session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    pub stream_url: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub artwork_path: Option<PathBuf>,
    /// Output file name pattern; `{name}`, `{date}` and `{timestamp}` are
    /// substituted at session start.
    #[serde(default = "default_output_pattern")]
    pub output_pattern: String,
    /// `user@host[:port]:/path` delivery target.
    pub destination: String,
    /// Private key for delivery; the transfer agent's default when absent.
    pub ssh_key_path: Option<PathBuf>,
}

fn default_output_pattern() -> String {
    "{name}_{date}.mp3".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    Scheduled,
    Capturing,
    Processing,
    Transferring,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStage::Completed | SessionStage::Failed | SessionStage::Cancelled
        )
    }

    /// Holding a concurrency slot and doing work.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionStage::Capturing | SessionStage::Processing | SessionStage::Transferring
        )
    }

    /// Legal forward edges. Retry loops re-enter the failed stage rather than
    /// transitioning, so a stage never appears twice in the event stream.
    pub fn can_transition(self, next: SessionStage) -> bool {
        use SessionStage::*;
        match (self, next) {
            (Scheduled, Capturing) => true,
            (Capturing, Processing) => true,
            (Processing, Transferring) => true,
            (Transferring, Completed) => true,
            (from, Failed) | (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStage::Scheduled => "scheduled",
            SessionStage::Capturing => "capturing",
            SessionStage::Processing => "processing",
            SessionStage::Transferring => "transferring",
            SessionStage::Completed => "completed",
            SessionStage::Failed => "failed",
            SessionStage::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Retries consumed so far, per stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAttempts {
    pub capture: u32,
    pub process: u32,
    pub transfer: u32,
}

/// One end-to-end attempt to capture, process and deliver a recording. Owned
/// exclusively by the orchestrator while active; other components only ever
/// see read-only copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSession {
    pub id: Uuid,
    pub config: StreamConfig,
    pub stage: SessionStage,
    pub started_at: DateTime<Local>,
    pub ended_at: Option<DateTime<Local>>,
    pub attempts: StageAttempts,
    /// The working file: the raw capture once capture completes, then the
    /// processed artifact. Deleted only after the transfer is confirmed and
    /// the cleanup policy permits.
    pub artifact_path: Option<PathBuf>,
    /// Last failure reason; cleared on stage success.
    pub error: Option<String>,
    /// Set only from an explicit transfer acknowledgment.
    pub transfer_confirmed: bool,
}

impl RecordingSession {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            stage: SessionStage::Scheduled,
            started_at: Local::now(),
            ended_at: None,
            attempts: StageAttempts::default(),
            artifact_path: None,
            error: None,
            transfer_confirmed: false,
        }
    }

    /// Working directory for this session, partitioned by id so no two
    /// sessions ever share a path.
    pub fn work_dir(&self, base: &Path) -> PathBuf {
        base.join(self.id.to_string())
    }

    pub fn output_name(&self) -> String {
        render_output_name(&self.config.output_pattern, &self.config.name, self.started_at)
    }
}

pub fn render_output_name(pattern: &str, name: &str, started_at: DateTime<Local>) -> String {
    let rendered = pattern
        .replace("{name}", name)
        .replace("{date}", &started_at.format("%Y-%m-%d").to_string())
        .replace("{timestamp}", &started_at.format("%Y%m%d_%H%M%S").to_string());
    if rendered.to_ascii_lowercase().ends_with(".mp3") {
        rendered
    } else {
        format!("{rendered}.mp3")
    }
}
