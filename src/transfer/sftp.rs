use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Instant;

use ssh2::Session;
use tracing::{debug, info};

use super::agent::{Destination, TransferAck, TransferAgent, TransferError};
use crate::config::TransferSettings;

/// SFTP transfer with public-key authentication only. Password and
/// interactive auth are never attempted.
pub struct SftpTransfer {
    settings: TransferSettings,
}

impl SftpTransfer {
    pub fn new(settings: TransferSettings) -> Self {
        Self { settings }
    }

    fn resolve_key(&self, key: Option<&Path>) -> Result<PathBuf, TransferError> {
        let raw = key
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.settings.ssh_key_path.clone());
        let expanded = PathBuf::from(shellexpand::tilde(&raw).into_owned());
        if expanded.exists() {
            Ok(expanded)
        } else {
            Err(TransferError::Auth(format!(
                "private key not found: {}",
                expanded.display()
            )))
        }
    }
}

#[async_trait::async_trait]
impl TransferAgent for SftpTransfer {
    async fn send(
        &self,
        artifact: &Path,
        destination: &str,
        key: Option<&Path>,
    ) -> Result<TransferAck, TransferError> {
        let dest = Destination::parse(destination)?;
        let key_path = self.resolve_key(key)?;
        let artifact = artifact.to_path_buf();
        let settings = self.settings.clone();
        let attempt_timeout = settings.attempt_timeout();

        let task = tokio::task::spawn_blocking(move || {
            blocking_send(&artifact, &dest, &key_path, &settings)
        });

        // The blocking session carries its own libssh2 timeout; this outer
        // deadline bounds the whole attempt including DNS and connect.
        match tokio::time::timeout(attempt_timeout, task).await {
            Err(_) => Err(TransferError::Timeout(attempt_timeout)),
            Ok(Err(join)) => Err(TransferError::Connection(format!(
                "transfer task failed: {join}"
            ))),
            Ok(Ok(result)) => result,
        }
    }
}

fn blocking_send(
    artifact: &Path,
    dest: &Destination,
    key_path: &Path,
    settings: &TransferSettings,
) -> Result<TransferAck, TransferError> {
    let started = Instant::now();

    let addr = (dest.host.as_str(), dest.port)
        .to_socket_addrs()
        .map_err(|e| TransferError::Connection(format!("resolve {}: {e}", dest.host)))?
        .next()
        .ok_or_else(|| TransferError::Connection(format!("no address for {}", dest.host)))?;

    let tcp = TcpStream::connect_timeout(&addr, settings.connect_timeout())
        .map_err(|e| TransferError::Connection(format!("connect {addr}: {e}")))?;

    let mut session =
        Session::new().map_err(|e| TransferError::Connection(format!("session init: {e}")))?;
    session.set_timeout(settings.attempt_timeout().as_millis().min(u32::MAX as u128) as u32);
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| TransferError::Connection(format!("handshake: {e}")))?;

    session
        .userauth_pubkey_file(&dest.username, None, key_path, None)
        .map_err(|e| TransferError::Auth(e.to_string()))?;
    if !session.authenticated() {
        return Err(TransferError::Auth(format!(
            "key not accepted for {}@{}",
            dest.username, dest.host
        )));
    }

    let sftp = session
        .sftp()
        .map_err(|e| TransferError::Connection(format!("sftp subsystem: {e}")))?;

    let remote_file = dest.remote_file_for(artifact);
    ensure_remote_dirs(&sftp, &remote_file);

    let mut remote = sftp
        .create(Path::new(&remote_file))
        .map_err(|e| TransferError::RemotePath(format!("{remote_file}: {e}")))?;

    let mut local = std::fs::File::open(artifact)
        .map_err(|e| TransferError::Connection(format!("{}: {e}", artifact.display())))?;
    let bytes = std::io::copy(&mut local, &mut remote)
        .map_err(|e| TransferError::Connection(format!("write {remote_file}: {e}")))?;
    drop(remote);

    let elapsed = started.elapsed();
    info!(
        "Transferred {} to {}@{}:{} ({} bytes in {:.2}s)",
        artifact.display(),
        dest.username,
        dest.host,
        remote_file,
        bytes,
        elapsed.as_secs_f64()
    );

    Ok(TransferAck {
        remote_path: remote_file,
        bytes,
        elapsed,
    })
}

/// Create missing parent directories, best effort: a failure here surfaces
/// later as a create error on the file itself.
fn ensure_remote_dirs(sftp: &ssh2::Sftp, remote_file: &str) {
    let Some(parent) = Path::new(remote_file).parent() else {
        return;
    };

    let mut current = PathBuf::new();
    for component in parent.components() {
        current.push(component);
        if current.as_os_str().is_empty() || current == Path::new("/") {
            continue;
        }
        if sftp.stat(&current).is_err() {
            if let Err(e) = sftp.mkdir(&current, 0o755) {
                debug!("mkdir {} failed: {e}", current.display());
            }
        }
    }
}
