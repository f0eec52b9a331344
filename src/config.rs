use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::orchestrator::RetryPolicy;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub recorder: RecorderSettings,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub transfer: TransferSettings,
    #[serde(default)]
    pub processing: ProcessingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecorderSettings {
    /// Directory holding per-session working directories.
    pub work_dir: PathBuf,
    pub ffmpeg_path: String,
    /// URL schemes accepted for stream sources.
    pub allowed_protocols: Vec<String>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("recordings"),
            ffmpeg_path: "ffmpeg".to_string(),
            allowed_protocols: vec![
                "http".to_string(),
                "https".to_string(),
                "rtmp".to_string(),
                "rtmps".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSettings {
    pub max_concurrent_recordings: usize,
    /// Delete the local artifact once the remote end has acknowledged it.
    pub cleanup_after_transfer: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_recordings: 3,
            cleanup_after_transfer: true,
        }
    }
}

/// Per-stage retry policies. Each stage retries independently and returns to
/// the start of the failed stage, never to an earlier one.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RetrySettings {
    #[serde(default)]
    pub capture: RetryPolicy,
    #[serde(default)]
    pub process: RetryPolicy,
    #[serde(default)]
    pub transfer: RetryPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferSettings {
    /// Default private key used when the stream config carries no credential.
    pub ssh_key_path: String,
    pub connect_timeout_secs: u64,
    /// Hard ceiling on a single transfer attempt.
    pub attempt_timeout_secs: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            ssh_key_path: "~/.ssh/id_ed25519".to_string(),
            connect_timeout_secs: 30,
            attempt_timeout_secs: 600,
        }
    }
}

impl TransferSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingSettings {
    pub ffmpeg_path: String,
    pub bitrate: String,
    pub sample_rate: u32,
    pub channels: u8,
    /// Artwork larger than this is downscaled before embedding.
    pub max_artwork_bytes: u64,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            bitrate: "192k".to_string(),
            sample_rate: 44_100,
            channels: 2,
            max_artwork_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file plus `AIRCHECK_*` environment
    /// overrides (e.g. `AIRCHECK_ORCHESTRATOR__MAX_CONCURRENT_RECORDINGS=5`).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("AIRCHECK").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.orchestrator.max_concurrent_recordings, 3);
        assert!(settings.orchestrator.cleanup_after_transfer);
        assert_eq!(settings.recorder.allowed_protocols.len(), 4);
        assert_eq!(settings.processing.sample_rate, 44_100);
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let settings = Settings::load(None).expect("load");
        assert_eq!(settings.retry.capture.max_retries, 3);
        assert_eq!(settings.transfer.attempt_timeout(), Duration::from_secs(600));
    }
}
