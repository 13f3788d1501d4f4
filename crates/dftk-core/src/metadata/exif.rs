use std::collections::BTreeMap;
use std::io::Cursor;

use chrono::NaiveDateTime;
use exif::{Exif, Field, In, Rational, Reader, Tag, Value};

use super::{ParseFailure, TagValue};
use crate::sniff::{self, Container};

const DATETIME_TAGS: &[Tag] = &[Tag::DateTime, Tag::DateTimeOriginal, Tag::DateTimeDigitized];

/// Decode the primary-image EXIF fields of an image container into typed
/// values keyed by tag name. Thumbnail fields are skipped.
pub fn decode(bytes: &[u8]) -> Result<BTreeMap<String, TagValue>, ParseFailure> {
    // GIF and BMP have no place for an Exif block.
    if matches!(sniff::sniff(bytes), Container::Gif | Container::Bmp) {
        return Err(ParseFailure::NoMetadata);
    }

    let exif = match Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(_)) => return Err(ParseFailure::NoMetadata),
        Err(_) => return Err(ParseFailure::DecodeFailure),
    };

    let mut tags: BTreeMap<String, TagValue> = exif
        .fields()
        .filter(|f| f.ifd_num == In::PRIMARY)
        .map(|f| (f.tag.to_string(), tag_value(f)))
        .collect();

    if tags.is_empty() {
        return Err(ParseFailure::NoMetadata);
    }

    if let Some(lat) = gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef) {
        tags.insert(Tag::GPSLatitude.to_string(), TagValue::Coordinate(lat));
    }
    if let Some(lon) = gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef) {
        tags.insert(Tag::GPSLongitude.to_string(), TagValue::Coordinate(lon));
    }

    Ok(tags)
}

fn tag_value(field: &Field) -> TagValue {
    match &field.value {
        Value::Ascii(parts) => {
            let text = ascii_text(parts);
            if DATETIME_TAGS.contains(&field.tag) {
                if let Some(dt) = parse_exif_datetime(&text) {
                    return TagValue::DateTime(dt);
                }
            }
            TagValue::Text(text)
        }
        Value::Byte(v) if v.len() == 1 => TagValue::Integer(v[0].into()),
        Value::Short(v) if v.len() == 1 => TagValue::Integer(v[0].into()),
        Value::Long(v) if v.len() == 1 => TagValue::Integer(v[0].into()),
        Value::SByte(v) if v.len() == 1 => TagValue::Integer(v[0].into()),
        Value::SShort(v) if v.len() == 1 => TagValue::Integer(v[0].into()),
        Value::SLong(v) if v.len() == 1 => TagValue::Integer(v[0].into()),
        Value::Rational(v) if v.len() == 1 => TagValue::Real(v[0].to_f64()),
        Value::SRational(v) if v.len() == 1 => TagValue::Real(v[0].to_f64()),
        Value::Float(v) if v.len() == 1 => TagValue::Real(v[0].into()),
        Value::Double(v) if v.len() == 1 => TagValue::Real(v[0]),
        _ => TagValue::Text(field.display_value().to_string()),
    }
}

fn ascii_text(parts: &[Vec<u8>]) -> String {
    parts
        .iter()
        .map(|p| String::from_utf8_lossy(p).trim_end_matches('\0').trim().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn gps_coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let Value::Rational(parts) = &field.value else {
        return None;
    };
    let degrees = dms_to_degrees(parts)?;
    let hemisphere = exif
        .get_field(ref_tag, In::PRIMARY)
        .and_then(|f| match &f.value {
            Value::Ascii(v) => v.first().and_then(|s| s.first()).copied(),
            _ => None,
        });
    match hemisphere {
        Some(b'S') | Some(b'W') => Some(-degrees),
        _ => Some(degrees),
    }
}

/// Degrees, minutes, seconds to decimal degrees.
fn dms_to_degrees(parts: &[Rational]) -> Option<f64> {
    let [d, m, s] = parts else {
        return None;
    };
    if [d, m, s].iter().any(|r| r.denom == 0) {
        return None;
    }
    Some(d.to_f64() + m.to_f64() / 60.0 + s.to_f64() / 3600.0)
}

/// `YYYY:MM:DD HH:MM:SS`, local time with no zone. Blank placeholders
/// (all spaces and colons) do not parse.
fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), "%Y:%m:%d %H:%M:%S").ok()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;

    const ASCII: u16 = 2;
    const SHORT: u16 = 3;
    const LONG: u16 = 4;
    const RATIONAL: u16 = 5;

    type Entry = (u16, u16, u32, Vec<u8>);

    /// One big-endian IFD placed at `start`, followed by its out-of-line values.
    fn ifd(entries: &[Entry], start: usize) -> Vec<u8> {
        let ifd_len = 2 + 12 * entries.len() + 4;
        let mut ifd = Vec::new();
        let mut data = Vec::new();

        ifd.extend_from_slice(&(entries.len() as u16).to_be_bytes());
        for (tag, kind, count, value) in entries {
            ifd.extend_from_slice(&tag.to_be_bytes());
            ifd.extend_from_slice(&kind.to_be_bytes());
            ifd.extend_from_slice(&count.to_be_bytes());
            if value.len() <= 4 {
                let mut inline = value.clone();
                inline.resize(4, 0);
                ifd.extend_from_slice(&inline);
            } else {
                let offset = start + ifd_len + data.len();
                ifd.extend_from_slice(&(offset as u32).to_be_bytes());
                data.extend_from_slice(value);
                if value.len() % 2 == 1 {
                    data.push(0);
                }
            }
        }
        ifd.extend_from_slice(&0u32.to_be_bytes());
        ifd.extend_from_slice(&data);
        ifd
    }

    const TIFF_HEADER: &[u8] = b"MM\0\x2a\0\0\0\x08";

    fn tiff(entries: &[Entry]) -> Vec<u8> {
        let mut out = TIFF_HEADER.to_vec();
        out.extend(ifd(entries, TIFF_HEADER.len()));
        out
    }

    fn rationals(parts: &[(u32, u32)]) -> Vec<u8> {
        parts
            .iter()
            .flat_map(|(num, denom)| num.to_be_bytes().into_iter().chain(denom.to_be_bytes()))
            .collect()
    }

    fn jpeg_around(tiff: &[u8]) -> Vec<u8> {
        let mut segment = b"Exif\0\0".to_vec();
        segment.extend_from_slice(tiff);

        let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
        out.extend_from_slice(&((segment.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(&segment);
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    /// A JPEG whose only segment is an APP1 Exif block.
    pub(crate) fn jpeg_with_exif() -> Vec<u8> {
        jpeg_around(&tiff(&[
            (0x010F, ASCII, 5, b"Acme\0".to_vec()),
            (0x0110, ASCII, 8, b"Model 7\0".to_vec()),
            (0x0112, SHORT, 1, 6u16.to_be_bytes().to_vec()),
            (0x0132, ASCII, 20, b"2021:07:04 12:30:00\0".to_vec()),
        ]))
    }

    /// IFD0 pointing at a GPS IFD located at 35deg 30' 36" S, 139deg 45' 0" W.
    fn jpeg_with_gps() -> Vec<u8> {
        let gps = [
            (0x0001, ASCII, 2, b"S\0".to_vec()),
            (0x0002, RATIONAL, 3, rationals(&[(35, 1), (30, 1), (36, 1)])),
            (0x0003, ASCII, 2, b"W\0".to_vec()),
            (0x0004, RATIONAL, 3, rationals(&[(139, 1), (45, 1), (0, 1)])),
        ];
        let primary = |gps_at: u32| {
            ifd(
                &[
                    (0x010F, ASCII, 5, b"Acme\0".to_vec()),
                    (0x8825, LONG, 1, gps_at.to_be_bytes().to_vec()),
                ],
                TIFF_HEADER.len(),
            )
        };
        let gps_at = TIFF_HEADER.len() + primary(0).len();

        let mut out = TIFF_HEADER.to_vec();
        out.extend(primary(gps_at as u32));
        out.extend(ifd(&gps, gps_at));
        jpeg_around(&out)
    }

    /// A JFIF JPEG without any Exif segment.
    pub(crate) fn jpeg_without_exif() -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        out.extend_from_slice(b"JFIF\0\x01\x01\0\0\x01\0\x01\0\0");
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    #[test]
    fn test_decode_standard_tags() {
        let tags = decode(&jpeg_with_exif()).unwrap();
        assert_eq!(tags.get("Make"), Some(&TagValue::Text("Acme".into())));
        assert_eq!(tags.get("Model"), Some(&TagValue::Text("Model 7".into())));
        assert_eq!(tags.get("Orientation"), Some(&TagValue::Integer(6)));
        let expected = NaiveDate::from_ymd_opt(2021, 7, 4)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(tags.get("DateTime"), Some(&TagValue::DateTime(expected)));
    }

    #[test]
    fn test_decode_is_deterministic() {
        let bytes = jpeg_with_exif();
        assert_eq!(decode(&bytes), decode(&bytes));
    }

    #[test]
    fn test_no_exif_segment() {
        assert_eq!(decode(&jpeg_without_exif()), Err(ParseFailure::NoMetadata));
    }

    #[test]
    fn test_corrupt_container() {
        assert_eq!(
            decode(&[0xFF, 0xD8, 0xFF, 0xE1, 0x00]),
            Err(ParseFailure::DecodeFailure)
        );
        assert_eq!(decode(b"%PDF-1.7"), Err(ParseFailure::DecodeFailure));
    }

    #[test]
    fn test_formats_without_exif_support() {
        assert_eq!(decode(b"GIF89a\x01\x00\x01\x00\x00\x00\x00;"), Err(ParseFailure::NoMetadata));
    }

    #[test]
    fn test_decode_gps_southern_western_hemisphere() {
        let tags = decode(&jpeg_with_gps()).unwrap();
        assert_eq!(tags.get("Make"), Some(&TagValue::Text("Acme".into())));
        match tags.get("GPSLatitude") {
            Some(TagValue::Coordinate(lat)) => assert!((lat + 35.51).abs() < 1e-9),
            other => panic!("unexpected latitude: {other:?}"),
        }
        match tags.get("GPSLongitude") {
            Some(TagValue::Coordinate(lon)) => assert!((lon + 139.75).abs() < 1e-9),
            other => panic!("unexpected longitude: {other:?}"),
        }
        assert_eq!(tags.get("GPSLatitudeRef"), Some(&TagValue::Text("S".into())));
    }

    #[test]
    fn test_dms_to_degrees() {
        let r = |num, denom| Rational { num, denom };
        let deg = dms_to_degrees(&[r(35, 1), r(30, 1), r(36, 1)]).unwrap();
        assert!((deg - 35.51).abs() < 1e-9);
        assert_eq!(dms_to_degrees(&[r(35, 1), r(30, 1)]), None);
        assert_eq!(dms_to_degrees(&[r(35, 1), r(30, 0), r(0, 1)]), None);
    }

    #[test]
    fn test_parse_exif_datetime() {
        let dt = parse_exif_datetime(" 2019:01:02 03:04:05 ").unwrap();
        assert_eq!(dt.to_string(), "2019-01-02 03:04:05");
        assert_eq!(parse_exif_datetime("    :  :     :  :  "), None);
        assert_eq!(parse_exif_datetime("2019:01:02"), None);
    }
}
