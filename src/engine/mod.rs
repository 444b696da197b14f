//! The image engine: decode → orient → transform → encode over in-memory
//! buffers. The rest of the crate depends only on this module's public
//! surface, so a different pixel backend can be slotted in behind it.

pub mod formats;
pub mod metadata;
mod watermark;

pub use formats::ImageType;
pub use metadata::Metadata;

use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};
use std::path::PathBuf;
use thiserror::Error;

pub const VERSION: &str = "0.25";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot decode {} input: {source}", format.name())]
    Decode {
        format: ImageType,
        source: image::ImageError,
    },
    #[error("unsupported input format: {}", format.name())]
    UnsupportedInput { format: ImageType },
    #[error("cannot encode image as {}", format.name())]
    Encode { format: ImageType },
    #[error("unsupported rotation angle: {angle}")]
    UnsupportedRotation { angle: u32 },
    #[error("watermark font unavailable: {path:?}")]
    FontUnavailable { path: PathBuf },
    #[error("extract area out of bounds")]
    InvalidArea,
    #[error("image has empty dimensions")]
    EmptyDimensions,
}

/// Crop/pad anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Gravity {
    #[default]
    Centre,
    North,
    South,
    East,
    West,
    Smart,
}

/// How to fill space when embedding an image in a larger canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Extend {
    White,
    Black,
    Copy,
    #[default]
    Mirror,
    LastPixel,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colorspace {
    Srgb,
    Bw,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Blur {
    pub sigma: f64,
    pub min_ampl: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TextWatermark {
    pub text: String,
    pub font: String,
    pub margin: u32,
    pub dpi: u32,
    pub width: u32,
    pub opacity: f32,
    pub no_replicate: bool,
    pub color: [u8; 3],
}

#[derive(Debug, Clone, Default)]
pub struct ImageWatermark {
    pub top: u32,
    pub left: u32,
    pub opacity: f32,
    pub buf: Vec<u8>,
}

/// Full transform description consumed by [`Engine::process`]. Zero numeric
/// fields mean "not requested".
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub width: u32,
    pub height: u32,
    pub top: u32,
    pub left: u32,
    pub area_width: u32,
    pub area_height: u32,
    pub quality: u8,
    pub compression: u8,
    pub speed: u8,
    pub rotate: u32,
    pub zoom: u32,
    pub crop: bool,
    pub embed: bool,
    pub enlarge: bool,
    pub force: bool,
    pub flip: bool,
    pub flop: bool,
    pub no_auto_rotate: bool,
    pub no_profile: bool,
    pub strip_metadata: bool,
    pub interlace: bool,
    pub palette: bool,
    pub gravity: Gravity,
    pub extend: Extend,
    pub colorspace: Option<Colorspace>,
    pub background: Option<[u8; 3]>,
    pub blur: Option<Blur>,
    pub format: ImageType,
    pub watermark: Option<TextWatermark>,
    pub watermark_image: Option<ImageWatermark>,
}

/// An encoded result buffer plus its MIME type.
#[derive(Debug, Clone)]
pub struct Image {
    pub body: Vec<u8>,
    pub mime: &'static str,
}

/// Handle over the pixel backend. Cheap to clone; safe to share between
/// request tasks.
#[derive(Debug, Clone)]
pub struct Engine {
    font_path: PathBuf,
}

impl Engine {
    pub fn new(font_path: PathBuf) -> Self {
        Self { font_path }
    }

    /// Apply the full transform and encode the result. WEBP and AVIF/HEIF
    /// encode failures retry as JPEG, keyed on the typed error rather than
    /// on an error-message match.
    pub fn process(&self, buf: &[u8], opts: &Options) -> Result<Image, EngineError> {
        let input = formats::detect_type(buf);
        let target = if opts.format == ImageType::Unknown {
            input
        } else {
            opts.format
        };

        let img = self.transform(buf, opts)?;

        match formats::encode(&img, target, opts.quality) {
            Ok(body) => Ok(Image {
                body,
                mime: target.mime(),
            }),
            Err(EngineError::Encode { format })
                if matches!(format, ImageType::Webp | ImageType::Avif) =>
            {
                let body = formats::encode(&img, ImageType::Jpeg, opts.quality)?;
                Ok(Image {
                    body,
                    mime: ImageType::Jpeg.mime(),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Rotate by the EXIF orientation only, keeping the input format.
    pub fn auto_rotate(&self, buf: &[u8]) -> Result<Image, EngineError> {
        let input = formats::detect_type(buf);
        let orientation = metadata::exif_orientation(buf);
        let img = apply_orientation(formats::decode(buf)?, orientation);
        let body = formats::encode(&img, input, 0)?;
        Ok(Image {
            body,
            mime: input.mime(),
        })
    }

    pub fn metadata(&self, buf: &[u8]) -> Result<Metadata, EngineError> {
        metadata::metadata(buf)
    }

    pub fn dimensions(&self, buf: &[u8]) -> Result<(u32, u32), EngineError> {
        metadata::dimensions(buf)
    }

    pub fn detect_type(&self, buf: &[u8]) -> ImageType {
        formats::detect_type(buf)
    }

    fn transform(&self, buf: &[u8], opts: &Options) -> Result<DynamicImage, EngineError> {
        let mut img = formats::decode(buf)?;

        if !opts.no_auto_rotate {
            img = apply_orientation(img, metadata::exif_orientation(buf));
        }

        if opts.area_width > 0 || opts.area_height > 0 {
            img = extract_area(img, opts)?;
        }

        if opts.zoom > 1 {
            let w = img.width().saturating_mul(opts.zoom).max(1);
            let h = img.height().saturating_mul(opts.zoom).max(1);
            img = img.resize_exact(w, h, FilterType::Lanczos3);
        }

        if opts.rotate > 0 {
            img = rotate(img, opts.rotate)?;
        }
        if opts.flip {
            img = img.flipv();
        }
        if opts.flop {
            img = img.fliph();
        }

        img = resize_stage(img, opts)?;

        if opts.colorspace == Some(Colorspace::Bw) {
            img = DynamicImage::ImageLuma8(img.to_luma8());
        }

        if let Some(blur) = &opts.blur {
            if blur.sigma > 0.0 {
                img = img.blur(blur.sigma as f32);
            }
        }

        if let Some(mark) = &opts.watermark {
            img = watermark::draw_text(img, mark, &self.font_path)?;
        }
        if let Some(mark) = &opts.watermark_image {
            let overlay = formats::decode(&mark.buf)?;
            img = watermark::draw_image(img, mark, &overlay);
        }

        Ok(img)
    }
}

fn apply_orientation(img: DynamicImage, orientation: u8) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

fn rotate(img: DynamicImage, angle: u32) -> Result<DynamicImage, EngineError> {
    match angle % 360 {
        0 => Ok(img),
        90 => Ok(img.rotate90()),
        180 => Ok(img.rotate180()),
        270 => Ok(img.rotate270()),
        _ => Err(EngineError::UnsupportedRotation { angle }),
    }
}

fn extract_area(img: DynamicImage, opts: &Options) -> Result<DynamicImage, EngineError> {
    let (w, h) = (img.width(), img.height());
    if opts.left >= w || opts.top >= h {
        return Err(EngineError::InvalidArea);
    }
    let area_w = if opts.area_width > 0 {
        opts.area_width.min(w - opts.left)
    } else {
        w - opts.left
    };
    let area_h = if opts.area_height > 0 {
        opts.area_height.min(h - opts.top)
    } else {
        h - opts.top
    };
    if area_w == 0 || area_h == 0 {
        return Err(EngineError::InvalidArea);
    }
    Ok(img.crop_imm(opts.left, opts.top, area_w, area_h))
}

fn resize_stage(img: DynamicImage, opts: &Options) -> Result<DynamicImage, EngineError> {
    let (sw, sh) = (img.width(), img.height());
    if sw == 0 || sh == 0 {
        return Err(EngineError::EmptyDimensions);
    }
    let (tw, th) = (opts.width, opts.height);
    if tw == 0 && th == 0 {
        return Ok(img);
    }

    if opts.force {
        let w = if tw > 0 { tw } else { scaled(sw, th, sh) };
        let h = if th > 0 { th } else { scaled(sh, tw, sw) };
        return Ok(img.resize_exact(w.max(1), h.max(1), FilterType::Lanczos3));
    }

    if tw > 0 && th > 0 {
        if opts.crop {
            return Ok(crop_to_fill(img, tw, th, opts.gravity, opts.enlarge));
        }

        let (mut fw, mut fh) = fit_within(sw, sh, tw, th);
        if !opts.enlarge && (fw > sw || fh > sh) {
            fw = sw;
            fh = sh;
        }
        let resized = if (fw, fh) == (sw, sh) {
            img
        } else {
            img.resize_exact(fw, fh, FilterType::Lanczos3)
        };
        if opts.embed && (fw != tw || fh != th) {
            return Ok(embed_canvas(resized, tw, th, opts));
        }
        return Ok(resized);
    }

    // Single dimension: preserve the aspect ratio.
    let scale = if tw > 0 {
        f64::from(tw) / f64::from(sw)
    } else {
        f64::from(th) / f64::from(sh)
    };
    if scale > 1.0 && !opts.enlarge {
        return Ok(img);
    }
    let w = (f64::from(sw) * scale).round().max(1.0) as u32;
    let h = (f64::from(sh) * scale).round().max(1.0) as u32;
    Ok(img.resize_exact(w, h, FilterType::Lanczos3))
}

fn scaled(source: u32, target_other: u32, source_other: u32) -> u32 {
    if target_other == 0 || source_other == 0 {
        return source;
    }
    let scale = f64::from(target_other) / f64::from(source_other);
    (f64::from(source) * scale).round().max(1.0) as u32
}

/// Bounding-box fit: neither axis may exceed the box and at least one axis
/// touches it.
pub fn fit_within(image_width: u32, image_height: u32, fit_width: u32, fit_height: u32) -> (u32, u32) {
    let iw = u64::from(image_width);
    let ih = u64::from(image_height);
    if iw * u64::from(fit_height) > u64::from(fit_width) * ih {
        // constrained by width
        let h = (f64::from(fit_width) * f64::from(image_height) / f64::from(image_width)).round();
        (fit_width, (h as u32).max(1))
    } else {
        let w = (f64::from(fit_height) * f64::from(image_width) / f64::from(image_height)).round();
        ((w as u32).max(1), fit_height)
    }
}

fn crop_to_fill(img: DynamicImage, tw: u32, th: u32, gravity: Gravity, enlarge: bool) -> DynamicImage {
    let (sw, sh) = (img.width(), img.height());
    let mut scale = (f64::from(tw) / f64::from(sw)).max(f64::from(th) / f64::from(sh));
    if scale > 1.0 && !enlarge {
        scale = 1.0;
    }
    let rw = ((f64::from(sw) * scale).round() as u32).max(1);
    let rh = ((f64::from(sh) * scale).round() as u32).max(1);
    let resized = if (rw, rh) == (sw, sh) {
        img
    } else {
        img.resize_exact(rw, rh, FilterType::Lanczos3)
    };

    let cw = tw.min(rw);
    let ch = th.min(rh);
    let (x, y) = crop_offset(rw, rh, cw, ch, gravity);
    resized.crop_imm(x, y, cw, ch)
}

fn crop_offset(w: u32, h: u32, cw: u32, ch: u32, gravity: Gravity) -> (u32, u32) {
    let cx = (w - cw) / 2;
    let cy = (h - ch) / 2;
    match gravity {
        Gravity::North => (cx, 0),
        Gravity::South => (cx, h - ch),
        Gravity::East => (w - cw, cy),
        Gravity::West => (0, cy),
        // Smart falls back to a center-weighted window.
        Gravity::Centre | Gravity::Smart => (cx, cy),
    }
}

fn embed_canvas(img: DynamicImage, tw: u32, th: u32, opts: &Options) -> DynamicImage {
    let fill = extend_fill(opts);
    let mut canvas = RgbaImage::from_pixel(tw, th, fill);
    let x = i64::from((tw.saturating_sub(img.width())) / 2);
    let y = i64::from((th.saturating_sub(img.height())) / 2);
    image::imageops::overlay(&mut canvas, &img.to_rgba8(), x, y);
    DynamicImage::ImageRgba8(canvas)
}

fn extend_fill(opts: &Options) -> Rgba<u8> {
    match opts.extend {
        Extend::White => Rgba([255, 255, 255, 255]),
        Extend::Background => {
            let [r, g, b] = opts.background.unwrap_or([0, 0, 0]);
            Rgba([r, g, b, 255])
        }
        _ => Rgba([0, 0, 0, 255]),
    }
}
