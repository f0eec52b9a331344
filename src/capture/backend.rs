use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Everything a backend needs to start recording one stream.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Session that owns this capture; scopes the output path.
    pub session_id: Uuid,
    pub stream_url: String,
    /// Unique per-session path the raw bytes are written to.
    pub output_path: PathBuf,
    /// Hard stop after this long; expiry is a successful end-of-capture.
    pub duration_limit: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Running,
    /// Ended cleanly: stream closed, duration limit reached, or stop requested.
    Stopped,
    /// Exited unexpectedly before the limit.
    Crashed,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// URL scheme is not in the allow-list. Never retried.
    #[error("unsupported protocol: {0}")]
    ProtocolUnsupported(String),

    /// Connection failure or unexpected recorder exit, with the observed
    /// diagnostic. Retryable.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The recorder binary could not be executed at all. Never retried.
    #[error("failed to spawn recorder: {0}")]
    Spawn(String),
}

impl CaptureError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CaptureError::Connection(_))
    }
}

/// Capture backend trait
///
/// Implementations:
/// - `FfmpegCapture`: spawns an ffmpeg child in its own process group
/// - test doubles simulating success, timeout and crash
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Validate the request and start exactly one recorder for it.
    async fn start(&self, request: CaptureRequest)
        -> Result<Box<dyn CaptureHandle>, CaptureError>;
}

/// Control surface for a single running capture.
#[async_trait::async_trait]
pub trait CaptureHandle: Send {
    /// Wait for the capture to end on its own. `Ok(())` is a successful
    /// end-of-capture; an unexpected exit surfaces as `Connection`.
    async fn wait(&mut self) -> Result<(), CaptureError>;

    /// Terminate the recorder and everything it spawned.
    async fn stop(&mut self) -> Result<(), CaptureError>;

    fn status(&mut self) -> CaptureStatus;
}

/// Extract the scheme from a stream URL, lowercased.
pub fn url_scheme(url: &str) -> Option<String> {
    url.split_once("://").map(|(scheme, _)| scheme.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_extraction() {
        assert_eq!(url_scheme("http://radio.example/live"), Some("http".into()));
        assert_eq!(url_scheme("RTMP://host/app"), Some("rtmp".into()));
        assert_eq!(url_scheme("not a url"), None);
    }

    #[test]
    fn only_connection_errors_retry() {
        assert!(CaptureError::Connection("timed out".into()).is_retryable());
        assert!(!CaptureError::ProtocolUnsupported("file".into()).is_retryable());
        assert!(!CaptureError::Spawn("no such file".into()).is_retryable());
    }
}
