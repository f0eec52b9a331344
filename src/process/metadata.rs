use std::path::Path;

use chrono::{DateTime, Datelike, Local, NaiveDate};
use id3::frame::{Picture, PictureType};
use id3::{Tag, TagLike, Timestamp, Version};
use tracing::debug;

use super::artwork::Artwork;
use super::processor::ProcessingError;

/// Tag values carried over from the stream configuration snapshot.
#[derive(Debug, Clone)]
pub struct TagMetadata {
    pub artist: String,
    pub album: String,
    pub album_artist: String,
}

/// Full set of fields embedded into the artifact. Title and track number are
/// derived from the recording date, so they are reproducible for a given
/// capture regardless of when processing runs.
#[derive(Debug, Clone)]
pub struct TagFields {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub track: u32,
    pub year: i32,
}

fn track_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid epoch date")
}

/// `"YYYY-MM-DD Show"` for the given recording date.
pub fn title_for(date: NaiveDate) -> String {
    format!("{} Show", date.format("%Y-%m-%d"))
}

/// Days elapsed since 2020-01-01, date-only. Calendar dates are compared as
/// naive local dates with no timezone normalization; dates before the epoch
/// clamp to zero.
pub fn track_number(date: NaiveDate) -> u32 {
    date.signed_duration_since(track_epoch()).num_days().max(0) as u32
}

pub fn derive_fields(tags: &TagMetadata, recording_date: DateTime<Local>) -> TagFields {
    let date = recording_date.date_naive();
    TagFields {
        title: title_for(date),
        artist: tags.artist.clone(),
        album: tags.album.clone(),
        album_artist: tags.album_artist.clone(),
        track: track_number(date),
        year: date.year(),
    }
}

/// Write the full tag set, replacing any existing tag. Building the tag from
/// scratch keeps a second pass byte-identical to the first.
pub fn embed_tags(
    path: &Path,
    fields: &TagFields,
    artwork: Option<Artwork>,
) -> Result<(), ProcessingError> {
    let mut tag = Tag::new();
    tag.set_title(&fields.title);
    tag.set_artist(&fields.artist);
    tag.set_album(&fields.album);
    tag.set_album_artist(&fields.album_artist);
    tag.set_track(fields.track);
    tag.set_date_recorded(Timestamp {
        year: fields.year,
        month: None,
        day: None,
        hour: None,
        minute: None,
        second: None,
    });

    if let Some(art) = artwork {
        tag.add_frame(Picture {
            mime_type: art.mime,
            picture_type: PictureType::CoverFront,
            description: "Cover".to_string(),
            data: art.data,
        });
    }

    tag.write_to_path(path, Version::Id3v24)
        .map_err(|e| ProcessingError::Tag(e.to_string()))?;

    debug!(
        "Embedded tags in {}: title='{}', track={}",
        path.display(),
        fields.title,
        fields.track
    );
    Ok(())
}

/// Read the tag back and confirm the required frames survived the write.
pub fn verify_tags(path: &Path) -> Result<(), ProcessingError> {
    let tag = Tag::read_from_path(path)
        .map_err(|e| ProcessingError::Invalid(format!("tags unreadable: {e}")))?;

    let mut missing = Vec::new();
    if tag.title().is_none() {
        missing.push("title");
    }
    if tag.artist().is_none() {
        missing.push("artist");
    }
    if tag.album().is_none() {
        missing.push("album");
    }
    if tag.album_artist().is_none() {
        missing.push("album artist");
    }
    if tag.track().is_none() {
        missing.push("track");
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ProcessingError::Invalid(format!(
            "tags missing after write: {}",
            missing.join(", ")
        )))
    }
}
