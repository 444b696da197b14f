use serde::Serialize;

use super::formats::{self, ImageType};
use super::EngineError;

/// Image details surfaced by the `info` operation and used internally for
/// orientation-aware math.
#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub width: u32,
    pub height: u32,
    #[serde(rename = "type")]
    pub format: String,
    pub space: String,
    #[serde(rename = "hasAlpha")]
    pub alpha: bool,
    #[serde(rename = "hasProfile")]
    pub profile: bool,
    pub channels: u8,
    pub orientation: u8,
}

pub fn metadata(buf: &[u8]) -> Result<Metadata, EngineError> {
    let kind = formats::detect_type(buf);
    let img = formats::decode(buf)?;
    let color = img.color();

    Ok(Metadata {
        width: img.width(),
        height: img.height(),
        format: kind.name().to_string(),
        space: if color.has_color() { "srgb" } else { "b-w" }.to_string(),
        alpha: color.has_alpha(),
        profile: has_icc_profile(buf, kind),
        channels: color.channel_count(),
        orientation: exif_orientation(buf),
    })
}

/// Decode only the header to get pixel dimensions. Cheap enough to run
/// before the resolution cap check on every request.
pub fn dimensions(buf: &[u8]) -> Result<(u32, u32), EngineError> {
    let kind = formats::detect_type(buf);
    if !kind.can_decode() {
        return Err(EngineError::UnsupportedInput { format: kind });
    }
    let reader = image::ImageReader::new(std::io::Cursor::new(buf))
        .with_guessed_format()
        .map_err(|_| EngineError::UnsupportedInput { format: kind })?;
    reader
        .into_dimensions()
        .map_err(|source| EngineError::Decode {
            format: kind,
            source,
        })
}

/// EXIF orientation tag, 1 when absent or unreadable.
pub fn exif_orientation(buf: &[u8]) -> u8 {
    let Ok(exif) = rexif::parse_buffer_quiet(buf).0 else {
        return 1;
    };
    for entry in &exif.entries {
        if entry.tag == rexif::ExifTag::Orientation {
            if let rexif::TagValue::U16(ref values) = entry.value {
                if let Some(&v) = values.first() {
                    if (1..=8).contains(&v) {
                        return v as u8;
                    }
                }
            }
        }
    }
    1
}

fn has_icc_profile(buf: &[u8], kind: ImageType) -> bool {
    match kind {
        ImageType::Jpeg => jpeg_has_icc(buf),
        ImageType::Png => png_has_iccp(buf),
        _ => false,
    }
}

/// Scan JPEG APP2 segments for an ICC_PROFILE marker.
fn jpeg_has_icc(buf: &[u8]) -> bool {
    let mut pos = 2;
    while pos + 4 < buf.len() {
        if buf[pos] != 0xFF {
            pos += 1;
            continue;
        }
        let marker = buf[pos + 1];
        // Start-of-scan: no more metadata segments
        if marker == 0xDA {
            return false;
        }
        let length = u16::from_be_bytes([buf[pos + 2], buf[pos + 3]]) as usize;
        if marker == 0xE2 {
            let start = pos + 4;
            let end = (pos + 2 + length).min(buf.len());
            if end > start && buf[start..end].starts_with(b"ICC_PROFILE\0") {
                return true;
            }
        }
        pos += 2 + length;
    }
    false
}

/// Look for a PNG iCCP chunk before the image data starts.
fn png_has_iccp(buf: &[u8]) -> bool {
    let mut pos = 8;
    while pos + 8 <= buf.len() {
        let length = u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
            as usize;
        let chunk = &buf[pos + 4..pos + 8];
        if chunk == b"iCCP" {
            return true;
        }
        if chunk == b"IDAT" || chunk == b"IEND" {
            return false;
        }
        pos += 12 + length;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;
    use std::io::Cursor;

    fn png_fixture(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgb8(width, height);
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_metadata_basic() {
        let meta = metadata(&png_fixture(32, 16)).unwrap();
        assert_eq!(meta.width, 32);
        assert_eq!(meta.height, 16);
        assert_eq!(meta.format, "png");
        assert_eq!(meta.orientation, 1);
        assert!(!meta.profile);
    }

    #[test]
    fn test_dimensions() {
        assert_eq!(dimensions(&png_fixture(100, 40)).unwrap(), (100, 40));
    }

    #[test]
    fn test_dimensions_rejects_garbage() {
        assert!(dimensions(b"not an image").is_err());
    }

    #[test]
    fn test_orientation_defaults_to_one() {
        assert_eq!(exif_orientation(&png_fixture(4, 4)), 1);
    }
}
