use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::path::Path;

use super::{EngineError, ImageWatermark, TextWatermark};

const DEFAULT_FONT_SIZE: f32 = 16.0;
const DEFAULT_OPACITY: f32 = 0.2;

/// Draw the watermark text near the top-left corner of the image, honoring
/// margin, opacity and color. The font spec follows the `"name size"`
/// convention; only the trailing size is meaningful since a single font
/// file is configured.
pub fn draw_text(
    img: DynamicImage,
    mark: &TextWatermark,
    font_path: &Path,
) -> Result<DynamicImage, EngineError> {
    let font_data = std::fs::read(font_path).map_err(|_| EngineError::FontUnavailable {
        path: font_path.to_path_buf(),
    })?;
    let font = FontVec::try_from_vec(font_data).map_err(|_| EngineError::FontUnavailable {
        path: font_path.to_path_buf(),
    })?;

    let mut rgba = img.to_rgba8();
    let scale = PxScale::from(font_size_from_spec(&mark.font));

    let opacity = if mark.opacity > 0.0 {
        mark.opacity.min(1.0)
    } else {
        DEFAULT_OPACITY
    };
    let [r, g, b] = mark.color;
    let color = Rgba([r, g, b, (opacity * 255.0) as u8]);

    let margin = mark.margin.max(10);
    let x = margin as i32;
    let y = margin as i32;

    let text = fit_text(&font, scale, &mark.text, mark.width, rgba.width());
    draw_text_mut(&mut rgba, color, x, y, scale, &font, &text);

    Ok(DynamicImage::ImageRgba8(rgba))
}

/// Composite a decoded watermark image over the base at the given offsets,
/// scaling source pixels by the requested opacity.
pub fn draw_image(
    img: DynamicImage,
    mark: &ImageWatermark,
    overlay: &DynamicImage,
) -> DynamicImage {
    let mut base = img.to_rgba8();
    let overlay = overlay.to_rgba8();
    let opacity = if mark.opacity > 0.0 {
        mark.opacity.min(1.0)
    } else {
        1.0
    };

    blend_over(&mut base, &overlay, mark.left, mark.top, opacity);
    DynamicImage::ImageRgba8(base)
}

fn blend_over(base: &mut RgbaImage, overlay: &RgbaImage, left: u32, top: u32, opacity: f32) {
    for (ox, oy, pixel) in overlay.enumerate_pixels() {
        let bx = left + ox;
        let by = top + oy;
        if bx >= base.width() || by >= base.height() {
            continue;
        }
        let alpha = (f32::from(pixel[3]) / 255.0) * opacity;
        if alpha <= 0.0 {
            continue;
        }
        let under = base.get_pixel_mut(bx, by);
        for c in 0..3 {
            let blended = f32::from(pixel[c]) * alpha + f32::from(under[c]) * (1.0 - alpha);
            under[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Trailing number of a `"sans 12"` style font spec, in points.
fn font_size_from_spec(spec: &str) -> f32 {
    spec.rsplit(' ')
        .next()
        .and_then(|tail| tail.parse::<f32>().ok())
        .filter(|size| *size > 0.0)
        .unwrap_or(DEFAULT_FONT_SIZE)
}

/// Truncate the text with an ellipsis when it would overflow the requested
/// text width (or the image width when none is given).
fn fit_text(font: &FontVec, scale: PxScale, text: &str, text_width: u32, image_width: u32) -> String {
    let max_width = if text_width > 0 {
        text_width
    } else {
        image_width
    };
    let (width, _) = text_size(scale, font, text);
    if width <= max_width {
        return text.to_string();
    }

    let mut truncated: String = text.to_string();
    while !truncated.is_empty() {
        truncated.pop();
        let candidate = format!("{truncated}…");
        let (w, _) = text_size(scale, font, &candidate);
        if w <= max_width {
            return candidate;
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_font_size_from_spec() {
        assert_eq!(font_size_from_spec("sans 12"), 12.0);
        assert_eq!(font_size_from_spec("DejaVu Sans 24"), 24.0);
        assert_eq!(font_size_from_spec("sans"), DEFAULT_FONT_SIZE);
        assert_eq!(font_size_from_spec(""), DEFAULT_FONT_SIZE);
    }

    #[test]
    fn test_missing_font_is_typed_error() {
        let img = DynamicImage::new_rgb8(32, 32);
        let mark = TextWatermark {
            text: "hi".to_string(),
            font: "sans 12".to_string(),
            ..TextWatermark::default()
        };
        let err = draw_text(img, &mark, Path::new("/nonexistent/font.ttf")).unwrap_err();
        assert!(matches!(err, EngineError::FontUnavailable { .. }));
    }

    #[test]
    fn test_image_watermark_blend() {
        let base = DynamicImage::new_rgb8(8, 8);
        let mut overlay = RgbaImage::new(2, 2);
        for pixel in overlay.pixels_mut() {
            *pixel = Rgba([255, 255, 255, 255]);
        }
        let mark = ImageWatermark {
            top: 1,
            left: 1,
            opacity: 1.0,
            ..ImageWatermark::default()
        };
        let out = draw_image(base, &mark, &DynamicImage::ImageRgba8(overlay));
        let rgba = out.to_rgba8();
        assert_eq!(rgba.get_pixel(1, 1)[0], 255);
        assert_eq!(rgba.get_pixel(0, 0)[0], 0);
    }
}
