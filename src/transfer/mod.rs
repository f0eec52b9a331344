//! Artifact delivery
//!
//! Moves finished artifacts to the remote store over SFTP with key-based
//! authentication. Errors are classified retryable vs terminal; the
//! orchestrator owns the retry loop. The agent never deletes the local file,
//! keeping "transfer succeeded" separate from "local copy removed".

pub mod agent;
pub mod sftp;

pub use agent::{Destination, TransferAck, TransferAgent, TransferError};
pub use sftp::SftpTransfer;
