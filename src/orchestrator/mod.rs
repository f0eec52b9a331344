//! Session orchestration
//!
//! The state machine and concurrency gate that turns one trigger into a
//! capture → process → transfer pipeline: fail-fast admission against a
//! shared semaphore, one task per session as the single writer of its state,
//! bounded per-stage retries with exponential backoff, cancellation that
//! interrupts blocked waits, and a cleanup guarantee that never silently
//! discards an undelivered artifact.

pub mod events;
pub mod orchestrator;
pub mod retry;
pub mod session;

pub use events::SessionEvent;
pub use orchestrator::{AdmissionError, Orchestrator};
pub use retry::{Retryable, RetryPolicy};
pub use session::{RecordingSession, SessionStage, StageAttempts, StreamConfig};
