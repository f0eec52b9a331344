use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::info;

use super::processor::ProcessingError;
use crate::config::ProcessingSettings;

const CONVERT_TIMEOUT: Duration = Duration::from_secs(300);

/// Format conversion seam. The production implementation shells out to
/// ffmpeg; tests substitute a copy-based double.
#[async_trait::async_trait]
pub trait AudioConverter: Send + Sync {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ProcessingError>;
}

pub struct FfmpegConverter {
    ffmpeg_path: String,
    bitrate: String,
    sample_rate: u32,
    channels: u8,
}

impl FfmpegConverter {
    pub fn new(settings: &ProcessingSettings) -> Self {
        Self {
            ffmpeg_path: settings.ffmpeg_path.clone(),
            bitrate: settings.bitrate.clone(),
            sample_rate: settings.sample_rate,
            channels: settings.channels,
        }
    }

    fn build_args(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-codec:a".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            self.bitrate.clone(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-ac".to_string(),
            self.channels.to_string(),
            "-f".to_string(),
            "mp3".to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait::async_trait]
impl AudioConverter for FfmpegConverter {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ProcessingError> {
        let args = self.build_args(input, output);
        info!("Converting audio: {} {}", self.ffmpeg_path, args.join(" "));

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| ProcessingError::Convert(format!("{}: {e}", self.ffmpeg_path)))?;

        let result = tokio::time::timeout(CONVERT_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| ProcessingError::Convert("conversion timed out".to_string()))?
            .map_err(|e| ProcessingError::Convert(format!("converter wait failed: {e}")))?;

        if result.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: String = stderr.chars().rev().take(500).collect::<Vec<_>>().into_iter().rev().collect();
            Err(ProcessingError::Convert(format!(
                "converter exited with {}: {}",
                result.status,
                tail.trim()
            )))
        }
    }
}
