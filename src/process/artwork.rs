use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use tracing::info;

use super::processor::ProcessingError;

const MAX_DIMENSION: u32 = 800;
const JPEG_QUALITY: u8 = 85;

/// Cover image ready for embedding.
#[derive(Debug, Clone)]
pub struct Artwork {
    pub mime: String,
    pub data: Vec<u8>,
}

/// Load artwork from disk, downscaling instead of rejecting when it exceeds
/// the configured byte ceiling.
pub fn prepare(path: &Path, max_bytes: u64) -> Result<Artwork, ProcessingError> {
    let meta = std::fs::metadata(path)
        .map_err(|e| ProcessingError::Artwork(format!("{}: {e}", path.display())))?;

    // Decoding also validates the file regardless of which branch we take.
    let img = image::open(path)
        .map_err(|e| ProcessingError::Artwork(format!("{}: {e}", path.display())))?;

    if meta.len() <= max_bytes {
        let mime = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg") => {
                "image/jpeg"
            }
            Some(ext) if ext.eq_ignore_ascii_case("png") => "image/png",
            other => {
                return Err(ProcessingError::Artwork(format!(
                    "unsupported artwork format: {}",
                    other.unwrap_or("none")
                )))
            }
        };
        let data = std::fs::read(path)?;
        return Ok(Artwork {
            mime: mime.to_string(),
            data,
        });
    }

    // Oversized: shrink to fit and re-encode as JPEG.
    let scaled = img.thumbnail(MAX_DIMENSION, MAX_DIMENSION).to_rgb8();
    let mut data = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut data, JPEG_QUALITY);
    encoder
        .encode_image(&scaled)
        .map_err(|e| ProcessingError::Artwork(format!("re-encode failed: {e}")))?;

    info!(
        "Downscaled artwork {} from {} bytes to {}x{} ({} bytes)",
        path.display(),
        meta.len(),
        scaled.width(),
        scaled.height(),
        data.len()
    );

    Ok(Artwork {
        mime: "image/jpeg".to_string(),
        data,
    })
}
