//! Post-processing
//!
//! Turns a raw capture into the deliverable artifact: format conversion (or a
//! validated copy when the format already matches), deterministic metadata
//! derived from the recording date, ID3 tag + artwork embedding, and output
//! validation. The raw file is never modified, so a failed attempt can retry.

pub mod artwork;
pub mod convert;
pub mod metadata;
pub mod probe;
pub mod processor;

pub use artwork::Artwork;
pub use convert::{AudioConverter, FfmpegConverter};
pub use metadata::TagMetadata;
pub use processor::{AudioProcessor, PostProcessor, ProcessingError};
