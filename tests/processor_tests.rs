// Integration tests for the post-processing pipeline
//
// A real WAV fixture (written with hound) exercises the decode validation,
// and the tagging path runs against real files on disk. The only double is
// the converter, so no external tool is spawned.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::{Local, TimeZone};
use tempfile::TempDir;

use aircheck::process::metadata::{self, TagFields};
use aircheck::process::{probe, AudioConverter, TagMetadata};
use aircheck::{PostProcessor, ProcessingError};

struct CopyConverter;

#[async_trait::async_trait]
impl AudioConverter for CopyConverter {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ProcessingError> {
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

fn write_wav_fixture(path: &Path) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for i in 0..16000u32 {
        writer.write_sample(((i % 64) as i16 - 32) * 256)?;
    }
    writer.finalize()?;
    Ok(())
}

fn fields() -> TagFields {
    TagFields {
        title: "2024-03-05 Show".to_string(),
        artist: "Radio Example".to_string(),
        album: "Morning Show".to_string(),
        album_artist: "Radio Example".to_string(),
        track: 1525,
        year: 2024,
    }
}

#[test]
fn tagging_is_idempotent() -> Result<()> {
    let tmp = TempDir::new()?;
    let path = tmp.path().join("artifact.mp3");
    std::fs::write(&path, vec![0u8; 4096])?;

    metadata::embed_tags(&path, &fields(), None)?;
    let first_pass = std::fs::read(&path)?;
    let first_tag = id3::Tag::read_from_path(&path)?;

    metadata::embed_tags(&path, &fields(), None)?;
    let second_pass = std::fs::read(&path)?;
    let second_tag = id3::Tag::read_from_path(&path)?;

    // Re-running on an already-tagged artifact changes nothing.
    assert_eq!(first_tag, second_tag);
    assert_eq!(first_pass, second_pass, "second pass must be byte-identical");
    Ok(())
}

#[test]
fn embedded_tags_read_back() -> Result<()> {
    let tmp = TempDir::new()?;
    let path = tmp.path().join("artifact.mp3");
    std::fs::write(&path, vec![0u8; 2048])?;

    metadata::embed_tags(&path, &fields(), None)?;
    metadata::verify_tags(&path)?;

    use id3::TagLike;
    let tag = id3::Tag::read_from_path(&path)?;
    assert_eq!(tag.title(), Some("2024-03-05 Show"));
    assert_eq!(tag.artist(), Some("Radio Example"));
    assert_eq!(tag.album(), Some("Morning Show"));
    assert_eq!(tag.album_artist(), Some("Radio Example"));
    assert_eq!(tag.track(), Some(1525));
    Ok(())
}

#[test]
fn decode_validation_accepts_real_audio() -> Result<()> {
    let tmp = TempDir::new()?;
    let wav = tmp.path().join("capture.wav");
    write_wav_fixture(&wav)?;
    probe::validate_decodable(&wav)?;
    Ok(())
}

#[test]
fn decode_validation_rejects_garbage() -> Result<()> {
    let tmp = TempDir::new()?;
    let bogus = tmp.path().join("bogus.mp3");
    std::fs::write(&bogus, b"this is not audio, not even close")?;
    let err = probe::validate_decodable(&bogus);
    assert!(err.is_err(), "garbage must not validate as audio");
    Ok(())
}

#[tokio::test]
async fn processes_capture_into_tagged_artifact() -> Result<()> {
    let tmp = TempDir::new()?;
    let raw = tmp.path().join("raw.wav");
    write_wav_fixture(&raw)?;
    let output = tmp.path().join("morning-show_2024-03-05.mp3");

    let processor = PostProcessor::new(Arc::new(CopyConverter), 10 * 1024 * 1024);
    let tags = TagMetadata {
        artist: "Radio Example".to_string(),
        album: "Morning Show".to_string(),
        album_artist: "Radio Example".to_string(),
    };
    let recording_date = Local.with_ymd_and_hms(2024, 3, 5, 6, 0, 0).unwrap();

    let artifact = processor
        .process(&raw, &output, &tags, None, recording_date)
        .await?;

    assert_eq!(artifact, output);
    assert!(output.exists());
    // Raw input untouched.
    assert!(raw.exists());

    use id3::TagLike;
    let tag = id3::Tag::read_from_path(&output)?;
    assert_eq!(tag.title(), Some("2024-03-05 Show"));
    assert_eq!(tag.track(), Some(1525));
    Ok(())
}

#[tokio::test]
async fn zero_byte_capture_is_rejected_without_touching_it() -> Result<()> {
    let tmp = TempDir::new()?;
    let raw = tmp.path().join("raw.mp3");
    std::fs::write(&raw, b"")?;
    let output = tmp.path().join("out.mp3");

    let processor = PostProcessor::new(Arc::new(CopyConverter), 1024);
    let tags = TagMetadata {
        artist: String::new(),
        album: String::new(),
        album_artist: String::new(),
    };

    let err = processor
        .process(&raw, &output, &tags, None, Local::now())
        .await
        .expect_err("empty capture must be rejected");

    assert!(matches!(err, ProcessingError::EmptyCapture(_)));
    assert!(!err.is_retryable());
    assert!(raw.exists());
    assert!(!output.exists());
    Ok(())
}

#[tokio::test]
async fn missing_capture_is_terminal() -> Result<()> {
    let tmp = TempDir::new()?;
    let processor = PostProcessor::new(Arc::new(CopyConverter), 1024);
    let tags = TagMetadata {
        artist: String::new(),
        album: String::new(),
        album_artist: String::new(),
    };

    let err = processor
        .process(
            &tmp.path().join("never-captured.mp3"),
            &tmp.path().join("out.mp3"),
            &tags,
            None,
            Local::now(),
        )
        .await
        .expect_err("missing capture must be rejected");

    assert!(matches!(err, ProcessingError::MissingInput(_)));
    assert!(!err.is_retryable());
    Ok(())
}

fn write_png_fixture(path: &PathBuf, size: u32) -> Result<()> {
    let img = image::RgbImage::from_fn(size, size, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    img.save(path)?;
    Ok(())
}

#[test]
fn artwork_within_ceiling_is_kept_verbatim() -> Result<()> {
    let tmp = TempDir::new()?;
    let art = tmp.path().join("cover.png");
    write_png_fixture(&art, 64)?;

    let original = std::fs::read(&art)?;
    let prepared = aircheck::process::artwork::prepare(&art, 10 * 1024 * 1024)?;
    assert_eq!(prepared.mime, "image/png");
    assert_eq!(prepared.data, original);
    Ok(())
}

#[test]
fn oversized_artwork_is_downscaled_not_rejected() -> Result<()> {
    let tmp = TempDir::new()?;
    let art = tmp.path().join("cover.png");
    write_png_fixture(&art, 1200)?;

    // Ceiling far below the file size forces the downscale path.
    let prepared = aircheck::process::artwork::prepare(&art, 1024)?;
    assert_eq!(prepared.mime, "image/jpeg");

    let decoded = image::load_from_memory(&prepared.data)?;
    assert!(decoded.width() <= 800);
    assert!(decoded.height() <= 800);
    Ok(())
}
