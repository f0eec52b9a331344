pub mod capture;
pub mod config;
pub mod orchestrator;
pub mod process;
pub mod store;
pub mod transfer;

pub use capture::{
    CaptureBackend, CaptureError, CaptureHandle, CaptureRequest, CaptureStatus, FfmpegCapture,
};
pub use config::Settings;
pub use orchestrator::{
    AdmissionError, Orchestrator, RecordingSession, RetryPolicy, SessionEvent, SessionStage,
    StageAttempts, StreamConfig,
};
pub use process::{AudioConverter, AudioProcessor, FfmpegConverter, PostProcessor, ProcessingError};
pub use store::{InMemorySessionStore, JsonlSessionStore, SessionStore};
pub use transfer::{Destination, SftpTransfer, TransferAck, TransferAgent, TransferError};
