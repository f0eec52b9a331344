use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capture::backend::{
    url_scheme, CaptureBackend, CaptureError, CaptureHandle, CaptureRequest, CaptureStatus,
};
use crate::config::RecorderSettings;

const STOP_GRACE: Duration = Duration::from_secs(5);
const DIAG_TAIL_BYTES: usize = 4096;

/// ffmpeg-based capture backend.
///
/// Spawns one child per session in its own process group so that stopping the
/// capture also terminates anything ffmpeg itself spawned.
pub struct FfmpegCapture {
    ffmpeg_path: String,
    allowed_protocols: Vec<String>,
}

impl FfmpegCapture {
    pub fn new(settings: &RecorderSettings) -> Self {
        Self {
            ffmpeg_path: settings.ffmpeg_path.clone(),
            allowed_protocols: settings.allowed_protocols.clone(),
        }
    }

    fn build_args(request: &CaptureRequest) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            request.stream_url.clone(),
            "-acodec".to_string(),
            "libmp3lame".to_string(),
            "-ab".to_string(),
            "128k".to_string(),
            "-f".to_string(),
            "mp3".to_string(),
        ];

        // Belt and braces: ffmpeg stops itself at the limit, the watchdog
        // stops it if ffmpeg stalls.
        if let Some(limit) = request.duration_limit {
            args.push("-t".to_string());
            args.push(limit.as_secs().max(1).to_string());
        }

        args.push(request.output_path.to_string_lossy().into_owned());
        args
    }
}

#[async_trait::async_trait]
impl CaptureBackend for FfmpegCapture {
    async fn start(
        &self,
        request: CaptureRequest,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        let scheme = url_scheme(&request.stream_url)
            .ok_or_else(|| CaptureError::ProtocolUnsupported(request.stream_url.clone()))?;
        if !self.allowed_protocols.iter().any(|p| p == &scheme) {
            return Err(CaptureError::ProtocolUnsupported(scheme));
        }

        if let Some(parent) = request.output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CaptureError::Spawn(format!("cannot create output dir: {e}")))?;
        }

        let args = Self::build_args(&request);
        info!(
            "Starting capture for session {}: {} {}",
            request.session_id,
            self.ffmpeg_path,
            args.join(" ")
        );

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| CaptureError::Spawn(format!("{}: {e}", self.ffmpeg_path)))?;

        let pid = child.id();
        let diagnostics = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(AtomicBool::new(false));
        let stop_requested = Arc::new(AtomicBool::new(false));
        let limit_reached = Arc::new(AtomicBool::new(false));

        // Drain stderr continuously; an unread pipe would stall ffmpeg. Only
        // the tail is kept for diagnostics.
        if let Some(mut stderr) = child.stderr.take() {
            let diagnostics = Arc::clone(&diagnostics);
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match stderr.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let mut diag = diagnostics.lock().unwrap();
                            diag.extend_from_slice(&buf[..n]);
                            let excess = diag.len().saturating_sub(DIAG_TAIL_BYTES);
                            if excess > 0 {
                                diag.drain(..excess);
                            }
                        }
                    }
                }
            });
        }

        // Duration watchdog, independent of whoever is awaiting the child: it
        // fires at the deadline even if the main wait path stalls.
        let watchdog = request.duration_limit.map(|limit| {
            let limit_reached = Arc::clone(&limit_reached);
            let finished = Arc::clone(&finished);
            let session_id = request.session_id;
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                if finished.load(Ordering::SeqCst) {
                    return;
                }
                info!("Duration limit reached for session {session_id}, stopping capture");
                limit_reached.store(true, Ordering::SeqCst);
                terminate_group(pid, TermSignal::Term);
                tokio::time::sleep(STOP_GRACE).await;
                if !finished.load(Ordering::SeqCst) {
                    warn!("Capture for session {session_id} ignored SIGTERM, killing group");
                    terminate_group(pid, TermSignal::Kill);
                }
            })
        });

        Ok(Box::new(FfmpegHandle {
            child,
            pid,
            diagnostics,
            finished,
            stop_requested,
            limit_reached,
            watchdog,
            status: CaptureStatus::Running,
        }))
    }
}

pub struct FfmpegHandle {
    child: Child,
    pid: Option<u32>,
    diagnostics: Arc<Mutex<Vec<u8>>>,
    finished: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    limit_reached: Arc<AtomicBool>,
    watchdog: Option<JoinHandle<()>>,
    status: CaptureStatus,
}

impl FfmpegHandle {
    fn diagnostic_tail(&self) -> String {
        let diag = self.diagnostics.lock().unwrap();
        String::from_utf8_lossy(&diag).trim().to_string()
    }

    fn clean_exit(&self, success: bool) -> bool {
        success
            || self.stop_requested.load(Ordering::SeqCst)
            || self.limit_reached.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CaptureHandle for FfmpegHandle {
    async fn wait(&mut self) -> Result<(), CaptureError> {
        let exit = self
            .child
            .wait()
            .await
            .map_err(|e| CaptureError::Connection(format!("wait on recorder failed: {e}")))?;

        self.finished.store(true, Ordering::SeqCst);
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }

        if self.clean_exit(exit.success()) {
            self.status = CaptureStatus::Stopped;
            Ok(())
        } else {
            self.status = CaptureStatus::Crashed;
            let code = exit
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "killed by signal".to_string());
            Err(CaptureError::Connection(format!(
                "recorder exited ({code}): {}",
                self.diagnostic_tail()
            )))
        }
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        self.stop_requested.store(true, Ordering::SeqCst);
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }

        if self.finished.load(Ordering::SeqCst) {
            self.status = CaptureStatus::Stopped;
            return Ok(());
        }

        terminate_group(self.pid, TermSignal::Term);
        match tokio::time::timeout(STOP_GRACE, self.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!("Recorder did not terminate gracefully, killing process group");
                terminate_group(self.pid, TermSignal::Kill);
                let _ = self.child.kill().await;
                let _ = self.child.wait().await;
            }
        }

        self.finished.store(true, Ordering::SeqCst);
        self.status = CaptureStatus::Stopped;
        Ok(())
    }

    fn status(&mut self) -> CaptureStatus {
        if self.status != CaptureStatus::Running {
            return self.status;
        }
        match self.child.try_wait() {
            Ok(None) => CaptureStatus::Running,
            Ok(Some(exit)) => {
                self.finished.store(true, Ordering::SeqCst);
                self.status = if self.clean_exit(exit.success()) {
                    CaptureStatus::Stopped
                } else {
                    CaptureStatus::Crashed
                };
                self.status
            }
            Err(_) => CaptureStatus::Crashed,
        }
    }
}

enum TermSignal {
    Term,
    Kill,
}

/// Signal the whole process group so grandchildren are not orphaned.
#[cfg(unix)]
fn terminate_group(pid: Option<u32>, signal: TermSignal) {
    let Some(pid) = pid else { return };
    let sig = match signal {
        TermSignal::Term => libc::SIGTERM,
        TermSignal::Kill => libc::SIGKILL,
    };
    unsafe {
        libc::kill(-(pid as i32), sig);
    }
}

#[cfg(not(unix))]
fn terminate_group(_pid: Option<u32>, _signal: TermSignal) {}
