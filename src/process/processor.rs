use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{debug, info};

use super::artwork;
use super::convert::AudioConverter;
use super::metadata::{self, TagMetadata};
use super::probe;

#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The raw capture does not exist. Never retried.
    #[error("raw capture missing: {}", .0.display())]
    MissingInput(PathBuf),

    /// The raw capture is zero bytes; structurally invalid input. Never
    /// retried.
    #[error("raw capture is empty: {}", .0.display())]
    EmptyCapture(PathBuf),

    #[error("conversion failed: {0}")]
    Convert(String),

    #[error("tagging failed: {0}")]
    Tag(String),

    #[error("artwork rejected: {0}")]
    Artwork(String),

    #[error("output failed validation: {0}")]
    Invalid(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProcessingError {
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProcessingError::MissingInput(_) | ProcessingError::EmptyCapture(_)
        )
    }
}

/// Processing seam. `PostProcessor` is the production implementation; tests
/// substitute doubles that succeed, fail, or block.
#[async_trait::async_trait]
pub trait AudioProcessor: Send + Sync {
    async fn process(
        &self,
        raw_path: &Path,
        output_path: &Path,
        tags: &TagMetadata,
        artwork_path: Option<&Path>,
        recording_date: DateTime<Local>,
    ) -> Result<PathBuf, ProcessingError>;
}

/// Converts a raw capture and embeds metadata, producing the artifact that
/// the transfer stage delivers.
pub struct PostProcessor {
    converter: Arc<dyn AudioConverter>,
    max_artwork_bytes: u64,
}

impl PostProcessor {
    pub fn new(converter: Arc<dyn AudioConverter>, max_artwork_bytes: u64) -> Self {
        Self {
            converter,
            max_artwork_bytes,
        }
    }

    /// Process `raw_path` into `output_path`.
    ///
    /// `recording_date` is the capture start timestamp, not wall-clock at
    /// processing time; title and track number are derived from it.
    pub async fn process(
        &self,
        raw_path: &Path,
        output_path: &Path,
        tags: &TagMetadata,
        artwork_path: Option<&Path>,
        recording_date: DateTime<Local>,
    ) -> Result<PathBuf, ProcessingError> {
        let raw_meta = tokio::fs::metadata(raw_path)
            .await
            .map_err(|_| ProcessingError::MissingInput(raw_path.to_path_buf()))?;
        if raw_meta.len() == 0 {
            return Err(ProcessingError::EmptyCapture(raw_path.to_path_buf()));
        }

        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if already_target_format(raw_path) {
            debug!("Input already MP3, copying without re-encoding");
            tokio::fs::copy(raw_path, output_path).await?;
        } else {
            self.converter.convert(raw_path, output_path).await?;
        }

        let output = output_path.to_path_buf();
        let fields = metadata::derive_fields(tags, recording_date);
        let artwork_path = artwork_path.map(Path::to_path_buf);
        let max_artwork_bytes = self.max_artwork_bytes;

        tokio::task::spawn_blocking(move || {
            // The copy path is validated for decodability just like a fresh
            // conversion.
            probe::validate_decodable(&output)?;

            let art = artwork_path
                .map(|p| artwork::prepare(&p, max_artwork_bytes))
                .transpose()?;
            metadata::embed_tags(&output, &fields, art)?;

            let len = std::fs::metadata(&output)?.len();
            if len == 0 {
                return Err(ProcessingError::Invalid(format!(
                    "output is empty: {}",
                    output.display()
                )));
            }
            metadata::verify_tags(&output)?;
            Ok(())
        })
        .await
        .map_err(|e| ProcessingError::Invalid(format!("processing task failed: {e}")))??;

        info!("Processed artifact ready: {}", output_path.display());
        Ok(output_path.to_path_buf())
    }
}

#[async_trait::async_trait]
impl AudioProcessor for PostProcessor {
    async fn process(
        &self,
        raw_path: &Path,
        output_path: &Path,
        tags: &TagMetadata,
        artwork_path: Option<&Path>,
        recording_date: DateTime<Local>,
    ) -> Result<PathBuf, ProcessingError> {
        PostProcessor::process(self, raw_path, output_path, tags, artwork_path, recording_date)
            .await
    }
}

fn already_target_format(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("mp3"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mp3_detection_is_case_insensitive() {
        assert!(already_target_format(Path::new("show.mp3")));
        assert!(already_target_format(Path::new("show.MP3")));
        assert!(!already_target_format(Path::new("show.aac")));
        assert!(!already_target_format(Path::new("show")));
    }

    #[test]
    fn terminal_classification() {
        assert!(!ProcessingError::EmptyCapture(PathBuf::from("x")).is_retryable());
        assert!(!ProcessingError::MissingInput(PathBuf::from("x")).is_retryable());
        assert!(ProcessingError::Convert("encoder exited".into()).is_retryable());
        assert!(ProcessingError::Invalid("bad output".into()).is_retryable());
    }
}
