use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat};
use std::io::Cursor;

use super::EngineError;

/// Image formats the engine knows how to name. Not every format is
/// decodable or encodable; `can_decode`/`can_encode` express the actual
/// capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageType {
    Jpeg,
    Png,
    Webp,
    Gif,
    Tiff,
    Svg,
    Avif,
    Pdf,
    #[default]
    Unknown,
}

impl ImageType {
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "jpeg" | "jpg" => ImageType::Jpeg,
            "png" => ImageType::Png,
            "webp" => ImageType::Webp,
            "gif" => ImageType::Gif,
            "tiff" => ImageType::Tiff,
            "svg" => ImageType::Svg,
            "avif" => ImageType::Avif,
            "pdf" => ImageType::Pdf,
            _ => ImageType::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ImageType::Jpeg => "jpeg",
            ImageType::Png => "png",
            ImageType::Webp => "webp",
            ImageType::Gif => "gif",
            ImageType::Tiff => "tiff",
            ImageType::Svg => "svg",
            ImageType::Avif => "avif",
            ImageType::Pdf => "pdf",
            ImageType::Unknown => "unknown",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ImageType::Png => "image/png",
            ImageType::Webp => "image/webp",
            ImageType::Gif => "image/gif",
            ImageType::Tiff => "image/tiff",
            ImageType::Svg => "image/svg+xml",
            ImageType::Avif => "image/avif",
            ImageType::Pdf => "application/pdf",
            _ => "image/jpeg",
        }
    }

    /// Formats the engine can turn into pixels.
    pub fn can_decode(&self) -> bool {
        matches!(
            self,
            ImageType::Jpeg | ImageType::Png | ImageType::Webp | ImageType::Gif | ImageType::Tiff
        )
    }

    /// Formats the engine can serialize pixels into.
    pub fn can_encode(&self) -> bool {
        matches!(
            self,
            ImageType::Jpeg | ImageType::Png | ImageType::Webp | ImageType::Gif | ImageType::Tiff
        )
    }
}

/// Detect the image type from magic bytes. SVG needs its own sniff since it
/// is plain text.
pub fn detect_type(buf: &[u8]) -> ImageType {
    if looks_like_svg(buf) {
        return ImageType::Svg;
    }
    match image::guess_format(buf) {
        Ok(ImageFormat::Jpeg) => ImageType::Jpeg,
        Ok(ImageFormat::Png) => ImageType::Png,
        Ok(ImageFormat::WebP) => ImageType::Webp,
        Ok(ImageFormat::Gif) => ImageType::Gif,
        Ok(ImageFormat::Tiff) => ImageType::Tiff,
        Ok(ImageFormat::Avif) => ImageType::Avif,
        _ => {
            if buf.starts_with(b"%PDF-") {
                ImageType::Pdf
            } else {
                ImageType::Unknown
            }
        }
    }
}

fn looks_like_svg(buf: &[u8]) -> bool {
    let head = &buf[..buf.len().min(512)];
    let Ok(text) = std::str::from_utf8(head) else {
        return false;
    };
    let trimmed = text.trim_start();
    trimmed.starts_with("<svg") || (trimmed.starts_with("<?xml") && text.contains("<svg"))
}

/// True when the given type name maps to a format the engine accepts as
/// output. `auto` is resolved before this point.
pub fn is_type_name_supported(name: &str) -> bool {
    ImageType::from_name(name) != ImageType::Unknown
}

pub fn decode(buf: &[u8]) -> Result<DynamicImage, EngineError> {
    let kind = detect_type(buf);
    if !kind.can_decode() {
        return Err(EngineError::UnsupportedInput { format: kind });
    }
    image::load_from_memory(buf).map_err(|source| EngineError::Decode {
        format: kind,
        source,
    })
}

/// Serialize pixels to the requested format. Quality applies to the lossy
/// encoders; PNG and GIF ignore it.
pub fn encode(img: &DynamicImage, format: ImageType, quality: u8) -> Result<Vec<u8>, EngineError> {
    let quality = if quality == 0 { 85 } else { quality.min(100) };

    match format {
        ImageType::Jpeg => {
            let rgb = img.to_rgb8();
            let mut out = Cursor::new(Vec::new());
            let encoder = JpegEncoder::new_with_quality(&mut out, quality);
            encoder
                .write_image(
                    rgb.as_raw(),
                    rgb.width(),
                    rgb.height(),
                    ExtendedColorType::Rgb8,
                )
                .map_err(|_| EngineError::Encode { format })?;
            Ok(out.into_inner())
        }
        ImageType::Png => {
            let rgba = img.to_rgba8();
            let mut out = Cursor::new(Vec::new());
            let encoder = PngEncoder::new(&mut out);
            encoder
                .write_image(
                    rgba.as_raw(),
                    rgba.width(),
                    rgba.height(),
                    ExtendedColorType::Rgba8,
                )
                .map_err(|_| EngineError::Encode { format })?;
            Ok(out.into_inner())
        }
        ImageType::Webp => {
            let rgba = img.to_rgba8();
            let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
            let encoded = encoder.encode(f32::from(quality));
            if encoded.is_empty() {
                return Err(EngineError::Encode { format });
            }
            Ok(encoded.to_vec())
        }
        ImageType::Gif => {
            let mut out = Vec::new();
            {
                let mut encoder = GifEncoder::new(&mut out);
                let frame = image::Frame::new(img.to_rgba8());
                encoder
                    .encode_frame(frame)
                    .map_err(|_| EngineError::Encode { format })?;
            }
            Ok(out)
        }
        ImageType::Tiff => {
            let mut out = Cursor::new(Vec::new());
            img.write_to(&mut out, ImageFormat::Tiff)
                .map_err(|_| EngineError::Encode { format })?;
            Ok(out.into_inner())
        }
        _ => Err(EngineError::Encode { format }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_fixture() -> Vec<u8> {
        let img = DynamicImage::new_rgb8(4, 4);
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_type_from_name() {
        assert_eq!(ImageType::from_name("jpeg"), ImageType::Jpeg);
        assert_eq!(ImageType::from_name("JPG"), ImageType::Jpeg);
        assert_eq!(ImageType::from_name("webp"), ImageType::Webp);
        assert_eq!(ImageType::from_name("bogus"), ImageType::Unknown);
    }

    #[test]
    fn test_detect_png() {
        assert_eq!(detect_type(&png_fixture()), ImageType::Png);
    }

    #[test]
    fn test_detect_svg() {
        let svg = b"<?xml version=\"1.0\"?><svg xmlns=\"http://www.w3.org/2000/svg\"></svg>";
        assert_eq!(detect_type(svg), ImageType::Svg);
    }

    #[test]
    fn test_detect_garbage() {
        assert_eq!(detect_type(b"definitely not an image"), ImageType::Unknown);
    }

    #[test]
    fn test_encode_roundtrip_jpeg() {
        let img = decode(&png_fixture()).unwrap();
        let jpeg = encode(&img, ImageType::Jpeg, 80).unwrap();
        assert_eq!(detect_type(&jpeg), ImageType::Jpeg);
    }

    #[test]
    fn test_encode_avif_fails_typed() {
        let img = decode(&png_fixture()).unwrap();
        let err = encode(&img, ImageType::Avif, 80).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Encode {
                format: ImageType::Avif
            }
        ));
    }
}
