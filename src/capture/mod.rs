//! Stream capture
//!
//! One external recorder subprocess per active session, behind a capability
//! interface so the orchestrator can be tested without spawning anything:
//! - `CaptureBackend` starts a capture and hands back a `CaptureHandle`
//! - `CaptureHandle` supports wait/stop/status on the running recorder
//! - `FfmpegCapture` is the production backend (ffmpeg child process)

pub mod backend;
pub mod ffmpeg;

pub use backend::{CaptureBackend, CaptureError, CaptureHandle, CaptureRequest, CaptureStatus};
pub use ffmpeg::FfmpegCapture;
