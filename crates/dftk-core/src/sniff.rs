use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::source::FileHandle;

/// Bytes inspected at the start of a source.
pub const SNIFF_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileTypeClass {
    Image,
    Audio,
    Other,
}

impl fmt::Display for FileTypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileTypeClass::Image => f.write_str("image"),
            FileTypeClass::Audio => f.write_str("audio"),
            FileTypeClass::Other => f.write_str("other"),
        }
    }
}

/// Concrete container recognized from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    Jpeg,
    Png,
    Gif,
    Bmp,
    Tiff,
    WebP,
    Heif,
    Id3Mpeg,
    MpegFrames,
    Flac,
    Ogg,
    Wav,
    Aiff,
    Mp4Audio,
    Ape,
    WavPack,
    /// ISO-BMFF with a brand that names neither an image nor an audio file.
    IsoBmff,
    Unknown,
}

impl Container {
    pub fn class(self) -> FileTypeClass {
        match self {
            Container::Jpeg
            | Container::Png
            | Container::Gif
            | Container::Bmp
            | Container::Tiff
            | Container::WebP
            | Container::Heif => FileTypeClass::Image,
            Container::Id3Mpeg
            | Container::MpegFrames
            | Container::Flac
            | Container::Ogg
            | Container::Wav
            | Container::Aiff
            | Container::Mp4Audio
            | Container::Ape
            | Container::WavPack => FileTypeClass::Audio,
            Container::IsoBmff | Container::Unknown => FileTypeClass::Other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Container::Jpeg => "JPEG image",
            Container::Png => "PNG image",
            Container::Gif => "GIF image",
            Container::Bmp => "BMP image",
            Container::Tiff => "TIFF image",
            Container::WebP => "WebP image",
            Container::Heif => "HEIF/AVIF image",
            Container::Id3Mpeg => "MPEG audio (ID3)",
            Container::MpegFrames => "MPEG/AAC audio",
            Container::Flac => "FLAC audio",
            Container::Ogg => "Ogg audio",
            Container::Wav => "WAV audio",
            Container::Aiff => "AIFF audio",
            Container::Mp4Audio => "MP4 audio",
            Container::Ape => "Monkey's Audio",
            Container::WavPack => "WavPack audio",
            Container::IsoBmff => "ISO media",
            Container::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const HEIF_BRANDS: &[&[u8; 4]] = &[
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1", b"avif", b"avis",
];
const AUDIO_BRANDS: &[&[u8; 4]] = &[b"M4A ", b"M4B ", b"M4P ", b"F4A ", b"F4B "];

/// Identify the container from the leading bytes of a file.
pub fn sniff(prefix: &[u8]) -> Container {
    match prefix {
        [0xFF, 0xD8, 0xFF, ..] => Container::Jpeg,
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Container::Png,
        [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Container::Gif,
        [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Container::Tiff,
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Container::WebP,
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => Container::Wav,
        [b'F', b'O', b'R', b'M', _, _, _, _, b'A', b'I', b'F', b'F' | b'C', ..] => {
            Container::Aiff
        }
        [b'I', b'D', b'3', ..] => Container::Id3Mpeg,
        [b'f', b'L', b'a', b'C', ..] => Container::Flac,
        [b'O', b'g', b'g', b'S', ..] => Container::Ogg,
        [b'M', b'A', b'C', b' ', ..] => Container::Ape,
        [b'w', b'v', b'p', b'k', ..] => Container::WavPack,
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => sniff_ftyp(prefix),
        [b'B', b'M', _, _, _, _, 0, 0, 0, 0, ..] => Container::Bmp,
        [0xFF, b1, ..] if is_mpeg_sync(*b1) => Container::MpegFrames,
        _ => Container::Unknown,
    }
}

/// MPEG audio frame sync (layers I-III) or an ADTS header.
fn is_mpeg_sync(b1: u8) -> bool {
    let layer = (b1 >> 1) & 0b11;
    (b1 & 0xE0 == 0xE0 && layer != 0) || b1 & 0xF6 == 0xF0
}

fn sniff_ftyp(prefix: &[u8]) -> Container {
    let Some(brand) = prefix.get(8..12) else {
        return Container::IsoBmff;
    };
    // Compatible brands follow the major brand and minor version.
    let box_len = prefix
        .get(..4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize)
        .unwrap_or(0)
        .min(prefix.len());
    let compatible = prefix
        .get(16..box_len)
        .unwrap_or(&[])
        .chunks_exact(4)
        .collect::<Vec<_>>();
    let brands = std::iter::once(brand).chain(compatible);

    for b in brands {
        if HEIF_BRANDS.iter().any(|h| h.as_slice() == b) {
            return Container::Heif;
        }
        if AUDIO_BRANDS.iter().any(|a| a.as_slice() == b) {
            return Container::Mp4Audio;
        }
    }
    Container::IsoBmff
}

/// Resolve the class from the sniffed container, letting the declared content
/// type decide only where the container is ambiguous.
pub fn resolve_class(container: Container, declared_type: Option<&str>) -> FileTypeClass {
    match container {
        Container::IsoBmff => match declared_type {
            Some(t) if t.starts_with("image/") => FileTypeClass::Image,
            Some(t) if t.starts_with("audio/") => FileTypeClass::Audio,
            _ => FileTypeClass::Other,
        },
        other => other.class(),
    }
}

/// Peek at the source and identify its container. The read position seen by
/// later readers is unchanged. A read failure while peeking is treated as an
/// unrecognizable prefix; the stage that consumes the stream reports it.
pub fn sniff_source(source: &mut FileHandle) -> Container {
    match source.peek(SNIFF_LEN) {
        Ok(prefix) => sniff(prefix),
        Err(e) => {
            debug!(error = %e, "could not read prefix for sniffing");
            Container::Unknown
        }
    }
}

pub fn classify(source: &mut FileHandle) -> FileTypeClass {
    let container = sniff_source(source);
    let class = resolve_class(container, source.declared_type());
    debug!(
        container = %container,
        declared = source.declared_type().unwrap_or("-"),
        %class,
        "classified source"
    );
    class
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn ftyp(major: &[u8; 4], compatible: &[&[u8; 4]]) -> Vec<u8> {
        let len = 16 + 4 * compatible.len();
        let mut out = (len as u32).to_be_bytes().to_vec();
        out.extend_from_slice(b"ftyp");
        out.extend_from_slice(major);
        out.extend_from_slice(&[0, 0, 0, 0]);
        for b in compatible {
            out.extend_from_slice(*b);
        }
        out
    }

    #[test]
    fn test_image_signatures() {
        assert_eq!(sniff(&[0xFF, 0xD8, 0xFF, 0xE1]), Container::Jpeg);
        assert_eq!(sniff(b"\x89PNG\r\n\x1a\n...."), Container::Png);
        assert_eq!(sniff(b"GIF89a"), Container::Gif);
        assert_eq!(sniff(b"II*\0\x08\0\0\0"), Container::Tiff);
        assert_eq!(sniff(b"MM\0*\0\0\0\x08"), Container::Tiff);
        assert_eq!(sniff(b"RIFF\x10\0\0\0WEBPVP8 "), Container::WebP);
        assert_eq!(sniff(b"BM\x36\0\0\0\0\0\0\0\x36\0"), Container::Bmp);
        assert_eq!(sniff(&ftyp(b"heic", &[b"mif1"])), Container::Heif);
        assert_eq!(sniff(&ftyp(b"avif", &[])), Container::Heif);
    }

    #[test]
    fn test_audio_signatures() {
        assert_eq!(sniff(b"ID3\x04\0\0\0\0\0\0"), Container::Id3Mpeg);
        assert_eq!(sniff(&[0xFF, 0xFB, 0x90, 0x64]), Container::MpegFrames);
        assert_eq!(sniff(&[0xFF, 0xF1, 0x50, 0x80]), Container::MpegFrames);
        assert_eq!(sniff(b"fLaC\0\0\0\x22"), Container::Flac);
        assert_eq!(sniff(b"OggS\0\x02"), Container::Ogg);
        assert_eq!(sniff(b"RIFF\x24\0\0\0WAVEfmt "), Container::Wav);
        assert_eq!(sniff(b"FORM\0\0\0\0AIFC"), Container::Aiff);
        assert_eq!(sniff(&ftyp(b"M4A ", &[b"isom"])), Container::Mp4Audio);
        assert_eq!(sniff(b"MAC \x96\x0f"), Container::Ape);
        assert_eq!(sniff(b"wvpk\0\0"), Container::WavPack);
    }

    #[test]
    fn test_unrecognized_is_other() {
        assert_eq!(sniff(b""), Container::Unknown);
        assert_eq!(sniff(b"%PDF-1.7"), Container::Unknown);
        assert_eq!(sniff(b"RIFF\0\0\0\0AVI "), Container::Unknown);
        assert_eq!(sniff(&[0xFF, 0x00]), Container::Unknown);
        assert_eq!(Container::Unknown.class(), FileTypeClass::Other);
    }

    #[test]
    fn test_magic_beats_declared_type() {
        let mut handle =
            FileHandle::from_bytes(b"ID3\x04\0\0\0\0\0\0".to_vec()).with_declared_type("image/jpeg");
        assert_eq!(classify(&mut handle), FileTypeClass::Audio);

        let mut handle =
            FileHandle::from_bytes(vec![0xFF, 0xD8, 0xFF, 0xD9]).with_declared_type("audio/mpeg");
        assert_eq!(classify(&mut handle), FileTypeClass::Image);

        let mut handle = FileHandle::from_bytes(b"plain text".to_vec()).with_declared_type("image/png");
        assert_eq!(classify(&mut handle), FileTypeClass::Other);
    }

    #[test]
    fn test_declared_type_breaks_ambiguous_ftyp() {
        let bytes = ftyp(b"isom", &[b"iso2", b"mp41"]);
        assert_eq!(sniff(&bytes), Container::IsoBmff);

        let mut audio = FileHandle::from_bytes(bytes.clone()).with_declared_type("audio/mp4");
        assert_eq!(classify(&mut audio), FileTypeClass::Audio);
        let mut video = FileHandle::from_bytes(bytes.clone()).with_declared_type("video/mp4");
        assert_eq!(classify(&mut video), FileTypeClass::Other);
        let mut unknown = FileHandle::from_bytes(bytes);
        assert_eq!(classify(&mut unknown), FileTypeClass::Other);
    }

    #[test]
    fn test_empty_source_is_other() {
        let mut handle = FileHandle::from_bytes(Vec::new());
        assert_eq!(classify(&mut handle), FileTypeClass::Other);
    }

    #[test]
    fn test_classify_does_not_consume() {
        let data = b"fLaC and then the rest of the stream".to_vec();
        let mut handle = FileHandle::from_bytes(data.clone());
        assert_eq!(classify(&mut handle), FileTypeClass::Audio);

        let mut rest = Vec::new();
        handle.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, data);
    }
}
