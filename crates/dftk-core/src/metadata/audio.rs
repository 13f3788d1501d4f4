use std::borrow::Cow;
use std::io::Cursor;

use lofty::config::ParseOptions;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::Tag;
use serde::Serialize;
use tracing::debug;

use super::ParseFailure;

/// The common audio tags. Any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AudioTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<u32>,
}

impl AudioTags {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none() && self.year.is_none()
    }
}

impl From<&Tag> for AudioTags {
    fn from(tag: &Tag) -> Self {
        Self {
            title: non_blank(tag.title()),
            artist: non_blank(tag.artist()),
            album: non_blank(tag.album()),
            year: tag.year(),
        }
    }
}

fn non_blank(value: Option<Cow<'_, str>>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read the primary tag of an audio container, falling back to the first tag
/// present. Audio properties are not decoded.
pub fn decode(bytes: &[u8]) -> Result<AudioTags, ParseFailure> {
    let options = ParseOptions::new().read_properties(false);
    let tagged = Probe::new(Cursor::new(bytes))
        .options(options)
        .guess_file_type()
        .map_err(|_| ParseFailure::DecodeFailure)?
        .read()
        .map_err(|e| {
            debug!(error = %e, "audio container rejected");
            ParseFailure::DecodeFailure
        })?;

    let tag = tagged
        .primary_tag()
        .or_else(|| tagged.first_tag())
        .ok_or(ParseFailure::NoMetadata)?;
    let tags = AudioTags::from(tag);
    if tags.is_empty() {
        return Err(ParseFailure::NoMetadata);
    }
    Ok(tags)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lofty::tag::TagType;

    fn chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = id.to_vec();
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(body);
        if body.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    /// 8 kHz mono PCM WAV with a RIFF INFO list holding the given items.
    pub(crate) fn wav_with_info(items: &[(&[u8; 4], &str)]) -> Vec<u8> {
        let mut fmt = Vec::new();
        fmt.extend_from_slice(&1u16.to_le_bytes()); // PCM
        fmt.extend_from_slice(&1u16.to_le_bytes()); // channels
        fmt.extend_from_slice(&8000u32.to_le_bytes());
        fmt.extend_from_slice(&16000u32.to_le_bytes());
        fmt.extend_from_slice(&2u16.to_le_bytes());
        fmt.extend_from_slice(&16u16.to_le_bytes());

        let mut body = b"WAVE".to_vec();
        body.extend(chunk(b"fmt ", &fmt));
        body.extend(chunk(b"data", &[0u8; 16]));
        if !items.is_empty() {
            let mut info = b"INFO".to_vec();
            for (id, value) in items {
                info.extend(chunk(id, value.as_bytes()));
            }
            body.extend(chunk(b"LIST", &info));
        }
        chunk(b"RIFF", &body)
    }

    #[test]
    fn test_wav_info_without_year() {
        let wav = wav_with_info(&[(b"INAM", "Song"), (b"IART", "Band"), (b"IPRD", "Record")]);
        let tags = decode(&wav).unwrap();
        assert_eq!(tags.title.as_deref(), Some("Song"));
        assert_eq!(tags.artist.as_deref(), Some("Band"));
        assert_eq!(tags.album.as_deref(), Some("Record"));
        assert_eq!(tags.year, None);
    }

    #[test]
    fn test_decode_is_deterministic() {
        let wav = wav_with_info(&[(b"INAM", "Song"), (b"IART", "Band")]);
        assert_eq!(decode(&wav), decode(&wav));
        assert_eq!(decode(&wav).unwrap().artist.as_deref(), Some("Band"));
    }

    #[test]
    fn test_untagged_audio() {
        assert_eq!(decode(&wav_with_info(&[])), Err(ParseFailure::NoMetadata));
    }

    #[test]
    fn test_broken_container() {
        assert_eq!(decode(b"fLaC\x00"), Err(ParseFailure::DecodeFailure));
        assert_eq!(decode(b"not audio at all"), Err(ParseFailure::DecodeFailure));
    }

    #[test]
    fn test_tags_from_generic_tag() {
        let mut tag = Tag::new(TagType::Id3v2);
        tag.set_title("Title".to_string());
        tag.set_artist("  Artist  ".to_string());
        tag.set_album("Album".to_string());
        tag.set_year(1999);

        let tags = AudioTags::from(&tag);
        assert_eq!(
            tags,
            AudioTags {
                title: Some("Title".into()),
                artist: Some("Artist".into()),
                album: Some("Album".into()),
                year: Some(1999),
            }
        );

        let mut partial = Tag::new(TagType::Id3v2);
        partial.set_title("Only title".to_string());
        let tags = AudioTags::from(&partial);
        assert_eq!(tags.title.as_deref(), Some("Only title"));
        assert!(tags.artist.is_none() && tags.album.is_none() && tags.year.is_none());
        assert!(!tags.is_empty());
    }
}
