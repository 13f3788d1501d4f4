pub mod audio;
pub mod exif;

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{InspectError, Result};
use crate::sniff::{self, FileTypeClass};
use crate::source::FileHandle;

pub use audio::AudioTags;

/// A typed EXIF value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    Text(String),
    Integer(i64),
    Real(f64),
    DateTime(NaiveDateTime),
    /// Signed decimal degrees; south and west are negative.
    Coordinate(f64),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Text(s) => f.write_str(s),
            TagValue::Integer(i) => write!(f, "{i}"),
            TagValue::Real(r) => write!(f, "{r}"),
            TagValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            TagValue::Coordinate(c) => write!(f, "{c:.6}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseFailure {
    /// The container is intact but carries no tags.
    NoMetadata,
    /// The container itself could not be decoded.
    DecodeFailure,
    TooLarge,
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFailure::NoMetadata => f.write_str("no metadata present"),
            ParseFailure::DecodeFailure => f.write_str("decode failure"),
            ParseFailure::TooLarge => f.write_str("file too large to decode"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum MetadataResult {
    Image(BTreeMap<String, TagValue>),
    Audio(AudioTags),
    Unsupported,
    ParseError(ParseFailure),
}

/// Decoder chosen for a classified source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    Exif,
    AudioTags,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeState {
    NotStarted,
    Classified(FileTypeClass),
    Decoding(Decoder),
    Done(MetadataResult),
    Failed(ParseFailure),
}

impl DecodeState {
    fn label(&self) -> &'static str {
        match self {
            DecodeState::NotStarted => "not-started",
            DecodeState::Classified(_) => "classified",
            DecodeState::Decoding(_) => "decoding",
            DecodeState::Done(_) => "done",
            DecodeState::Failed(_) => "failed",
        }
    }
}

/// One metadata extraction, driven through its states in order:
/// classify, select a decoder, decode, finish.
#[derive(Debug)]
pub struct Extraction {
    state: DecodeState,
    max_bytes: u64,
}

impl Extraction {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            state: DecodeState::NotStarted,
            max_bytes,
        }
    }

    /// Start from an already known class.
    pub fn with_class(class: FileTypeClass, max_bytes: u64) -> Self {
        Self {
            state: DecodeState::Classified(class),
            max_bytes,
        }
    }

    pub fn state(&self) -> &DecodeState {
        &self.state
    }

    fn transition(&mut self, next: DecodeState) {
        trace!(from = self.state.label(), to = next.label(), "extraction state");
        self.state = next;
    }

    /// NotStarted -> Classified. No effect in later states.
    pub fn classify(&mut self, source: &mut FileHandle) {
        if matches!(self.state, DecodeState::NotStarted) {
            let class = sniff::classify(source);
            self.transition(DecodeState::Classified(class));
        }
    }

    /// Classified -> Decoding, or straight to Done(Unsupported) for `Other`.
    pub fn select_decoder(&mut self) {
        let DecodeState::Classified(class) = self.state else {
            return;
        };
        let next = match class {
            FileTypeClass::Image => DecodeState::Decoding(Decoder::Exif),
            FileTypeClass::Audio => DecodeState::Decoding(Decoder::AudioTags),
            FileTypeClass::Other => DecodeState::Done(MetadataResult::Unsupported),
        };
        self.transition(next);
    }

    /// Decoding -> Done or Failed. Only a read failure is an `Err`; every
    /// decode outcome lands in the state.
    pub fn decode(&mut self, source: &mut FileHandle) -> Result<()> {
        let DecodeState::Decoding(decoder) = self.state else {
            return Ok(());
        };
        let bytes = match read_bounded(source, self.max_bytes)? {
            Some(bytes) => bytes,
            None => {
                self.transition(DecodeState::Failed(ParseFailure::TooLarge));
                return Ok(());
            }
        };
        let outcome = match decoder {
            Decoder::Exif => exif::decode(&bytes).map(MetadataResult::Image),
            Decoder::AudioTags => audio::decode(&bytes).map(MetadataResult::Audio),
        };
        match outcome {
            Ok(result) => self.transition(DecodeState::Done(result)),
            Err(failure) => {
                debug!(?decoder, %failure, "metadata decode failed");
                self.transition(DecodeState::Failed(failure));
            }
        }
        Ok(())
    }

    /// Run every remaining step.
    pub fn run(mut self, source: &mut FileHandle) -> Result<MetadataResult> {
        self.classify(source);
        self.select_decoder();
        self.decode(source)?;
        Ok(self.finish())
    }

    pub fn finish(self) -> MetadataResult {
        match self.state {
            DecodeState::Done(result) => result,
            DecodeState::Failed(failure) => MetadataResult::ParseError(failure),
            // Not driven to completion; nothing was decoded.
            DecodeState::NotStarted | DecodeState::Classified(_) | DecodeState::Decoding(_) => {
                MetadataResult::Unsupported
            }
        }
    }
}

/// Route a classified source to its decoder.
pub fn extract_metadata(
    source: &mut FileHandle,
    class: FileTypeClass,
    max_bytes: u64,
) -> Result<MetadataResult> {
    Extraction::with_class(class, max_bytes).run(source)
}

/// Read the whole source for a random-access decoder. `None` when it exceeds
/// `max_bytes`, judged by the declared length first and then by what is read.
fn read_bounded(source: &mut FileHandle, max_bytes: u64) -> Result<Option<Vec<u8>>> {
    if source.declared_len() > max_bytes {
        return Ok(None);
    }
    let mut bytes = Vec::with_capacity(source.declared_len() as usize);
    source
        .by_ref()
        .take(max_bytes.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(InspectError::Read)?;
    if bytes.len() as u64 > max_bytes {
        return Ok(None);
    }
    Ok(Some(bytes))
}
