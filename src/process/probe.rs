use std::fs::File;
use std::path::Path;

use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::processor::ProcessingError;

/// Confirm the file contains decodable audio: probe the container, find an
/// audio track, and decode the first packet. Catches truncated or garbage
/// output that a size check alone would miss.
pub fn validate_decodable(path: &Path) -> Result<(), ProcessingError> {
    let file = File::open(path)
        .map_err(|e| ProcessingError::Invalid(format!("{}: {e}", path.display())))?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| ProcessingError::Invalid(format!("unrecognized audio format: {e}")))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| ProcessingError::Invalid("no audio track found".to_string()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| ProcessingError::Invalid(format!("no decoder for track: {e}")))?;

    loop {
        let packet = format
            .next_packet()
            .map_err(|e| ProcessingError::Invalid(format!("no decodable packet: {e}")))?;
        if packet.track_id() != track_id {
            continue;
        }
        decoder
            .decode(&packet)
            .map_err(|e| ProcessingError::Invalid(format!("decode failed: {e}")))?;
        return Ok(());
    }
}
