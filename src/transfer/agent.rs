use std::path::Path;
use std::time::Duration;

use thiserror::Error;

/// Explicit acknowledgment of a completed transfer, distinct from "the call
/// returned". The orchestrator sets `transfer_confirmed` from this and
/// nothing else.
#[derive(Debug, Clone)]
pub struct TransferAck {
    pub remote_path: String,
    pub bytes: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum TransferError {
    /// Destination string could not be parsed. Never retried.
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    /// The remote end rejected our key. Never retried.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The remote path could not be created or written. Never retried.
    #[error("remote path rejected: {0}")]
    RemotePath(String),

    /// Network-level failure. Retryable.
    #[error("transfer failed: {0}")]
    Connection(String),

    /// The attempt exceeded its own deadline. Retryable.
    #[error("transfer attempt timed out after {0:?}")]
    Timeout(Duration),
}

impl TransferError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Connection(_) | TransferError::Timeout(_)
        )
    }
}

/// Parsed `user@host:/path` or `user@host:port:/path` destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub username: String,
    pub host: String,
    pub port: u16,
    pub remote_path: String,
}

impl Destination {
    pub fn parse(destination: &str) -> Result<Self, TransferError> {
        let invalid =
            || TransferError::InvalidDestination(format!("expected user@host:/path, got '{destination}'"));

        let (user_host, remote_path) = destination.rsplit_once(':').ok_or_else(invalid)?;
        let (username, host_port) = user_host.split_once('@').ok_or_else(invalid)?;
        if username.is_empty() || host_port.is_empty() || remote_path.is_empty() {
            return Err(invalid());
        }

        // An explicit port looks like host:2222; anything non-numeric after
        // the colon is treated as part of the hostname.
        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port_str)) => match port_str.parse::<u16>() {
                Ok(port) => (host.to_string(), port),
                Err(_) => (host_port.to_string(), 22),
            },
            None => (host_port.to_string(), 22),
        };

        Ok(Self {
            username: username.to_string(),
            host,
            port,
            remote_path: remote_path.to_string(),
        })
    }

    /// Full remote file path; a trailing `/` means "directory, keep the local
    /// file name".
    pub fn remote_file_for(&self, local: &Path) -> String {
        if self.remote_path.ends_with('/') {
            let name = local
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            format!("{}{}", self.remote_path, name)
        } else {
            self.remote_path.clone()
        }
    }
}

/// Delivery seam. The production implementation speaks SFTP; tests substitute
/// doubles that acknowledge, time out, or reject.
#[async_trait::async_trait]
pub trait TransferAgent: Send + Sync {
    /// Deliver `artifact` to `destination`, authenticating with `key` (or the
    /// agent's configured default when `None`).
    async fn send(
        &self,
        artifact: &Path,
        destination: &str,
        key: Option<&Path>,
    ) -> Result<TransferAck, TransferError>;
}
