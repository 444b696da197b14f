use serde::Deserialize;

use crate::engine::{self, Colorspace, Extend, Gravity, ImageType};

/// Every transformation parameter a request can carry, already coerced to
/// native types. One instance lives per request (or per pipeline step).
#[derive(Debug, Clone, Default)]
pub struct ImageOptions {
    pub width: u32,
    pub height: u32,
    pub area_width: u32,
    pub area_height: u32,
    pub quality: u32,
    pub compression: u32,
    pub rotate: u32,
    pub top: u32,
    pub left: u32,
    pub margin: u32,
    pub factor: u32,
    pub dpi: u32,
    pub text_width: u32,
    pub speed: u32,
    pub flip: bool,
    pub flop: bool,
    pub force: bool,
    pub embed: bool,
    pub no_crop: bool,
    pub no_replicate: bool,
    pub no_rotation: bool,
    pub no_profile: bool,
    pub strip_metadata: bool,
    pub interlace: bool,
    pub palette: bool,
    pub opacity: f32,
    pub sigma: f64,
    pub min_ampl: f64,
    pub text: String,
    pub image: String,
    pub font: String,
    pub format: String,
    pub aspect_ratio: String,
    pub color: Vec<u8>,
    pub background: Vec<u8>,
    pub extend: Extend,
    pub gravity: Gravity,
    pub colorspace: Option<Colorspace>,
    pub operations: Vec<PipelineOperation>,
    pub defined: IsDefined,
}

/// Explicit-set bits for the boolean options. `true` means the key appeared
/// in the request, which lets operations distinguish "absent" from
/// "explicitly false" before overriding their defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsDefined {
    pub flip: bool,
    pub flop: bool,
    pub force: bool,
    pub embed: bool,
    pub no_crop: bool,
    pub no_replicate: bool,
    pub no_rotation: bool,
    pub no_profile: bool,
    pub strip_metadata: bool,
    pub interlace: bool,
    pub palette: bool,
}

/// One step of a `/pipeline` request as supplied by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineOperation {
    #[serde(rename = "operation")]
    pub name: String,
    #[serde(default)]
    pub ignore_failure: bool,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ImageOptions {
    /// Map to the engine's transform description. Aspect-ratio completion
    /// happens here: when exactly one of width/height is present and an
    /// aspect ratio was supplied, the missing dimension is derived.
    pub fn to_engine(&self) -> engine::Options {
        let (width, height) = self.dimensions_with_aspect_ratio();

        engine::Options {
            width,
            height,
            quality: self.quality.min(100) as u8,
            compression: self.compression.min(9) as u8,
            speed: self.speed.min(8) as u8,
            rotate: self.rotate,
            flip: self.flip,
            flop: self.flop,
            force: self.force,
            embed: self.embed,
            no_auto_rotate: self.no_rotation,
            no_profile: self.no_profile,
            strip_metadata: self.strip_metadata,
            interlace: self.interlace,
            palette: self.palette,
            gravity: self.gravity,
            extend: self.extend,
            colorspace: self.colorspace,
            background: rgb_triple(&self.background),
            format: ImageType::from_name(&self.format),
            blur: if self.sigma > 0.0 || self.min_ampl > 0.0 {
                Some(engine::Blur {
                    sigma: self.sigma,
                    min_ampl: self.min_ampl,
                })
            } else {
                None
            },
            ..engine::Options::default()
        }
    }

    fn dimensions_with_aspect_ratio(&self) -> (u32, u32) {
        let (width, height) = (self.width, self.height);
        if self.aspect_ratio.is_empty() || !exactly_one_zero(width, height) {
            return (width, height);
        }
        let Some((ratio_w, ratio_h)) = parse_aspect_ratio(&self.aspect_ratio) else {
            return (width, height);
        };
        if ratio_w == 0 || ratio_h == 0 {
            return (width, height);
        }
        if width != 0 {
            let h = f64::from(width) * (f64::from(ratio_h) / f64::from(ratio_w));
            (width, h as u32)
        } else {
            let w = f64::from(height) * (f64::from(ratio_w) / f64::from(ratio_h));
            (w as u32, height)
        }
    }
}

fn exactly_one_zero(width: u32, height: u32) -> bool {
    (width == 0) != (height == 0)
}

pub fn rgb_triple(values: &[u8]) -> Option<[u8; 3]> {
    if values.len() >= 3 {
        Some([values[0], values[1], values[2]])
    } else {
        None
    }
}

/// `"W:H"` with two integer components; anything else is ignored.
pub fn parse_aspect_ratio(value: &str) -> Option<(u32, u32)> {
    let value = value.trim().to_lowercase();
    let (w, h) = value.split_once(':')?;
    let w = w.trim().parse::<u32>().ok()?;
    let h = h.trim().parse::<u32>().ok()?;
    Some((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aspect_ratio() {
        assert_eq!(parse_aspect_ratio("16:9"), Some((16, 9)));
        assert_eq!(parse_aspect_ratio(" 4 : 3 "), Some((4, 3)));
        assert_eq!(parse_aspect_ratio("16x9"), None);
        assert_eq!(parse_aspect_ratio(""), None);
    }

    #[test]
    fn test_aspect_ratio_completes_height() {
        let opts = ImageOptions {
            width: 1600,
            aspect_ratio: "16:9".to_string(),
            ..ImageOptions::default()
        };
        let engine_opts = opts.to_engine();
        assert_eq!(engine_opts.width, 1600);
        assert_eq!(engine_opts.height, 900);
    }

    #[test]
    fn test_aspect_ratio_completes_width() {
        let opts = ImageOptions {
            height: 900,
            aspect_ratio: "16:9".to_string(),
            ..ImageOptions::default()
        };
        let engine_opts = opts.to_engine();
        assert_eq!(engine_opts.width, 1600);
        assert_eq!(engine_opts.height, 900);
    }

    #[test]
    fn test_aspect_ratio_ignored_when_both_set() {
        let opts = ImageOptions {
            width: 100,
            height: 100,
            aspect_ratio: "16:9".to_string(),
            ..ImageOptions::default()
        };
        let engine_opts = opts.to_engine();
        assert_eq!((engine_opts.width, engine_opts.height), (100, 100));
    }

    #[test]
    fn test_blur_mapping() {
        let opts = ImageOptions {
            sigma: 1.5,
            ..ImageOptions::default()
        };
        let engine_opts = opts.to_engine();
        assert_eq!(engine_opts.blur.unwrap().sigma, 1.5);

        let opts = ImageOptions::default();
        assert!(opts.to_engine().blur.is_none());
    }

    #[test]
    fn test_background_triple() {
        let opts = ImageOptions {
            background: vec![10, 20, 30],
            ..ImageOptions::default()
        };
        assert_eq!(opts.to_engine().background, Some([10, 20, 30]));
    }
}
