//! Parameter coercion: turns URL query pairs or pipeline JSON maps into a
//! typed [`ImageOptions`]. Both paths record explicit-set bits for boolean
//! keys so operations can tell "absent" apart from "explicitly false".

use serde_json::Value;
use std::collections::HashMap;

use crate::engine::{Colorspace, Extend, Gravity};
use crate::errors::ImageError;
use crate::options::{ImageOptions, PipelineOperation};

/// Decode a raw query string into ordered key/value pairs.
pub fn query_pairs(raw: Option<&str>) -> Vec<(String, String)> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .collect()
}

/// Build options from URL query pairs. The first value wins for repeated
/// keys; unknown keys are ignored.
pub fn build_from_query(pairs: &[(String, String)]) -> Result<ImageOptions, ImageError> {
    let mut first: HashMap<&str, &str> = HashMap::new();
    for (key, value) in pairs {
        first.entry(key.as_str()).or_insert(value.as_str());
    }

    let mut opts = ImageOptions::default();

    for (key, value) in &first {
        match *key {
            "width" => opts.width = parse_int(value),
            "height" => opts.height = parse_int(value),
            "top" => opts.top = parse_int(value),
            "left" => opts.left = parse_int(value),
            "areawidth" => opts.area_width = parse_int(value),
            "areaheight" => opts.area_height = parse_int(value),
            "quality" => opts.quality = parse_int(value),
            "compression" => opts.compression = parse_int(value),
            "rotate" => opts.rotate = parse_int(value),
            "margin" => opts.margin = parse_int(value),
            "factor" => opts.factor = parse_int(value),
            "dpi" => opts.dpi = parse_int(value),
            "textwidth" => opts.text_width = parse_int(value),
            "speed" => opts.speed = parse_int(value),
            "opacity" => opts.opacity = parse_float(value) as f32,
            "sigma" => opts.sigma = parse_float(value),
            "minampl" => opts.min_ampl = parse_float(value),
            "flip" => {
                opts.flip = parse_bool(value)?;
                opts.defined.flip = true;
            }
            "flop" => {
                opts.flop = parse_bool(value)?;
                opts.defined.flop = true;
            }
            "force" => {
                opts.force = parse_bool(value)?;
                opts.defined.force = true;
            }
            "embed" => {
                opts.embed = parse_bool(value)?;
                opts.defined.embed = true;
            }
            "nocrop" => {
                opts.no_crop = parse_bool(value)?;
                opts.defined.no_crop = true;
            }
            "noreplicate" => {
                opts.no_replicate = parse_bool(value)?;
                opts.defined.no_replicate = true;
            }
            "norotation" => {
                opts.no_rotation = parse_bool(value)?;
                opts.defined.no_rotation = true;
            }
            "noprofile" => {
                opts.no_profile = parse_bool(value)?;
                opts.defined.no_profile = true;
            }
            "stripmeta" => {
                opts.strip_metadata = parse_bool(value)?;
                opts.defined.strip_metadata = true;
            }
            "interlace" => {
                opts.interlace = parse_bool(value)?;
                opts.defined.interlace = true;
            }
            "palette" => {
                opts.palette = parse_bool(value)?;
                opts.defined.palette = true;
            }
            "text" => opts.text = (*value).to_string(),
            "font" => opts.font = (*value).to_string(),
            "image" => opts.image = (*value).to_string(),
            "type" => opts.format = (*value).to_string(),
            "aspectratio" => opts.aspect_ratio = (*value).to_string(),
            "color" => opts.color = parse_color(value),
            "background" => opts.background = parse_color(value),
            "gravity" => opts.gravity = parse_gravity(value),
            "extend" => opts.extend = parse_extend(value),
            "colorspace" => opts.colorspace = Some(parse_colorspace(value)),
            "operations" => opts.operations = parse_operations(value)?,
            _ => {}
        }
    }

    Ok(opts)
}

/// Build options for one pipeline step from its JSON params map. Values are
/// already typed; each is coerced to the target field's type or rejected.
pub fn build_from_map(
    params: &serde_json::Map<String, Value>,
) -> Result<ImageOptions, ImageError> {
    let mut opts = ImageOptions::default();

    for (key, value) in params {
        match key.as_str() {
            "width" => opts.width = coerce_int(key, value)?,
            "height" => opts.height = coerce_int(key, value)?,
            "top" => opts.top = coerce_int(key, value)?,
            "left" => opts.left = coerce_int(key, value)?,
            "areawidth" => opts.area_width = coerce_int(key, value)?,
            "areaheight" => opts.area_height = coerce_int(key, value)?,
            "quality" => opts.quality = coerce_int(key, value)?,
            "compression" => opts.compression = coerce_int(key, value)?,
            "rotate" => opts.rotate = coerce_int(key, value)?,
            "margin" => opts.margin = coerce_int(key, value)?,
            "factor" => opts.factor = coerce_int(key, value)?,
            "dpi" => opts.dpi = coerce_int(key, value)?,
            "textwidth" => opts.text_width = coerce_int(key, value)?,
            "speed" => opts.speed = coerce_int(key, value)?,
            "opacity" => opts.opacity = coerce_float(key, value)? as f32,
            "sigma" => opts.sigma = coerce_float(key, value)?,
            "minampl" => opts.min_ampl = coerce_float(key, value)?,
            "flip" => {
                opts.flip = coerce_bool(key, value)?;
                opts.defined.flip = true;
            }
            "flop" => {
                opts.flop = coerce_bool(key, value)?;
                opts.defined.flop = true;
            }
            "force" => {
                opts.force = coerce_bool(key, value)?;
                opts.defined.force = true;
            }
            "embed" => {
                opts.embed = coerce_bool(key, value)?;
                opts.defined.embed = true;
            }
            "nocrop" => {
                opts.no_crop = coerce_bool(key, value)?;
                opts.defined.no_crop = true;
            }
            "noreplicate" => {
                opts.no_replicate = coerce_bool(key, value)?;
                opts.defined.no_replicate = true;
            }
            "norotation" => {
                opts.no_rotation = coerce_bool(key, value)?;
                opts.defined.no_rotation = true;
            }
            "noprofile" => {
                opts.no_profile = coerce_bool(key, value)?;
                opts.defined.no_profile = true;
            }
            "stripmeta" => {
                opts.strip_metadata = coerce_bool(key, value)?;
                opts.defined.strip_metadata = true;
            }
            "interlace" => {
                opts.interlace = coerce_bool(key, value)?;
                opts.defined.interlace = true;
            }
            "palette" => {
                opts.palette = coerce_bool(key, value)?;
                opts.defined.palette = true;
            }
            "text" => opts.text = coerce_string(key, value)?,
            "font" => opts.font = coerce_string(key, value)?,
            "image" => opts.image = coerce_string(key, value)?,
            "type" => opts.format = coerce_string(key, value)?,
            "aspectratio" => opts.aspect_ratio = coerce_string(key, value)?,
            "color" => opts.color = parse_color(&coerce_string(key, value)?),
            "background" => opts.background = parse_color(&coerce_string(key, value)?),
            "gravity" => opts.gravity = parse_gravity(&coerce_string(key, value)?),
            "extend" => opts.extend = parse_extend(&coerce_string(key, value)?),
            "colorspace" => {
                opts.colorspace = Some(parse_colorspace(&coerce_string(key, value)?));
            }
            _ => {}
        }
    }

    Ok(opts)
}

/// Total integer parse: accepts signs, leading zeros and decimals. Negative
/// values map to their absolute value, decimals round half away from zero,
/// unparseable input yields 0.
pub fn parse_int(value: &str) -> u32 {
    match value.trim().parse::<f64>() {
        Ok(number) if number.is_finite() => number.abs().round().min(f64::from(u32::MAX)) as u32,
        _ => 0,
    }
}

/// Total float parse; negatives map to their absolute value, failures to 0.
pub fn parse_float(value: &str) -> f64 {
    match value.trim().parse::<f64>() {
        Ok(number) if number.is_finite() => number.abs(),
        _ => 0.0,
    }
}

/// `true`/`1` are true, `false`/`0` and the empty string are false.
/// Anything else is an error so typos do not silently become `false`.
pub fn parse_bool(value: &str) -> Result<bool, ImageError> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        other => Err(ImageError::bad_request(format!(
            "Invalid boolean value: {other}"
        ))),
    }
}

/// Comma-separated channel values, each clamped to 0..=255. Non-numeric
/// tokens count as 0. Empty input yields an empty list.
pub fn parse_color(value: &str) -> Vec<u8> {
    if value.trim().is_empty() {
        return Vec::new();
    }
    value
        .split(',')
        .map(|token| match token.trim().parse::<i64>() {
            Ok(channel) => channel.clamp(0, 255) as u8,
            Err(_) => 0,
        })
        .collect()
}

pub fn parse_gravity(value: &str) -> Gravity {
    match value.trim().to_lowercase().as_str() {
        "north" => Gravity::North,
        "south" => Gravity::South,
        "east" => Gravity::East,
        "west" => Gravity::West,
        "smart" => Gravity::Smart,
        _ => Gravity::Centre,
    }
}

pub fn parse_extend(value: &str) -> Extend {
    match value.trim().to_lowercase().as_str() {
        "white" => Extend::White,
        "black" => Extend::Black,
        "copy" => Extend::Copy,
        "lastpixel" => Extend::LastPixel,
        "background" => Extend::Background,
        _ => Extend::Mirror,
    }
}

pub fn parse_colorspace(value: &str) -> Colorspace {
    match value.trim().to_lowercase().as_str() {
        "bw" => Colorspace::Bw,
        _ => Colorspace::Srgb,
    }
}

fn parse_operations(value: &str) -> Result<Vec<PipelineOperation>, ImageError> {
    serde_json::from_str(value).map_err(|err| {
        ImageError::bad_request(format!("Invalid pipeline operations JSON: {err}"))
    })
}

fn unsupported_value(key: &str) -> ImageError {
    ImageError::bad_request(format!("Unsupported value for parameter: {key}"))
}

fn coerce_int(key: &str, value: &Value) -> Result<u32, ImageError> {
    match value {
        Value::String(s) => Ok(parse_int(s)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i.unsigned_abs().min(u64::from(u32::MAX)) as u32)
            } else if let Some(f) = n.as_f64() {
                Ok(f.abs().round().min(f64::from(u32::MAX)) as u32)
            } else {
                Err(unsupported_value(key))
            }
        }
        _ => Err(unsupported_value(key)),
    }
}

fn coerce_float(key: &str, value: &Value) -> Result<f64, ImageError> {
    match value {
        Value::String(s) => Ok(parse_float(s)),
        Value::Number(n) => n.as_f64().map(f64::abs).ok_or_else(|| unsupported_value(key)),
        _ => Err(unsupported_value(key)),
    }
}

fn coerce_bool(key: &str, value: &Value) -> Result<bool, ImageError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => parse_bool(s).map_err(|_| unsupported_value(key)),
        _ => Err(unsupported_value(key)),
    }
}

fn coerce_string(key: &str, value: &Value) -> Result<String, ImageError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        _ => Err(unsupported_value(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_read_params() {
        let opts = build_from_query(&pairs(&[
            ("width", "100"),
            ("height", "80"),
            ("noreplicate", "1"),
            ("opacity", "0.2"),
            ("text", "hello"),
            ("background", "255,10,20"),
            ("interlace", "true"),
        ]))
        .unwrap();

        assert_eq!(opts.width, 100);
        assert_eq!(opts.height, 80);
        assert!(opts.no_replicate);
        assert!((opts.opacity - 0.2).abs() < 1e-4);
        assert_eq!(opts.text, "hello");
        assert_eq!(opts.background, vec![255, 10, 20]);
        assert!(opts.interlace);
    }

    #[test]
    fn test_parse_int() {
        for (value, expected) in [("1", 1), ("0100", 100), ("-100", 100), ("99.02", 99), ("99.9", 100), ("junk", 0), ("", 0)] {
            assert_eq!(parse_int(value), expected, "value {value:?}");
        }
    }

    #[test]
    fn test_parse_float() {
        for (value, expected) in [("1.1", 1.1), ("01.1", 1.1), ("-1.10", 1.1), ("99.999999", 99.999999)] {
            assert!((parse_float(value) - expected).abs() < 1e-9, "value {value:?}");
        }
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("true").unwrap(), true);
        assert_eq!(parse_bool("1").unwrap(), true);
        assert_eq!(parse_bool("false").unwrap(), false);
        assert_eq!(parse_bool("0").unwrap(), false);
        assert_eq!(parse_bool("").unwrap(), false);
        assert!(parse_bool("foo").is_err());
        assert!(parse_bool("yes").is_err());
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("200,100,20"), vec![200, 100, 20]);
        assert_eq!(parse_color("0,280,200"), vec![0, 255, 200]);
        assert_eq!(parse_color(" -1, 256 , 50"), vec![0, 255, 50]);
        assert_eq!(parse_color(" a, 20 , &hel0"), vec![0, 20, 0]);
        assert!(parse_color("").is_empty());
    }

    #[test]
    fn test_parse_extend() {
        assert_eq!(parse_extend("white"), Extend::White);
        assert_eq!(parse_extend("black"), Extend::Black);
        assert_eq!(parse_extend("copy"), Extend::Copy);
        assert_eq!(parse_extend("mirror"), Extend::Mirror);
        assert_eq!(parse_extend("lastpixel"), Extend::LastPixel);
        assert_eq!(parse_extend(" BACKGROUND  "), Extend::Background);
        assert_eq!(parse_extend("invalid"), Extend::Mirror);
        assert_eq!(parse_extend(""), Extend::Mirror);
    }

    #[test]
    fn test_parse_gravity() {
        assert_eq!(parse_gravity("smart"), Gravity::Smart);
        assert_eq!(parse_gravity("west"), Gravity::West);
        assert_eq!(parse_gravity("foo"), Gravity::Centre);
    }

    #[test]
    fn test_explicit_set_bits_from_query() {
        let opts = build_from_query(&pairs(&[("nocrop", "false")])).unwrap();
        assert!(!opts.no_crop);
        assert!(opts.defined.no_crop);

        let opts = build_from_query(&pairs(&[("width", "10")])).unwrap();
        assert!(!opts.defined.no_crop);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let opts = build_from_query(&pairs(&[("bogus", "1"), ("width", "5")])).unwrap();
        assert_eq!(opts.width, 5);
    }

    #[test]
    fn test_first_value_wins() {
        let opts = build_from_query(&pairs(&[("width", "5"), ("width", "9")])).unwrap();
        assert_eq!(opts.width, 5);
    }

    #[test]
    fn test_operations_json() {
        let json = r#"[{"operation": "crop", "params": {"width": 300}}]"#;
        let opts = build_from_query(&pairs(&[("operations", json)])).unwrap();
        assert_eq!(opts.operations.len(), 1);
        assert_eq!(opts.operations[0].name, "crop");

        assert!(build_from_query(&pairs(&[("operations", "{broken")])).is_err());
    }

    #[test]
    fn test_read_map_params() {
        let map = json!({
            "width": 100,
            "opacity": 0.1,
            "type": "webp",
            "embed": true,
            "gravity": "west",
            "color": "255,200,150",
        });
        let opts = build_from_map(map.as_object().unwrap()).unwrap();
        assert_eq!(opts.width, 100);
        assert!((opts.opacity - 0.1).abs() < 1e-4);
        assert_eq!(opts.format, "webp");
        assert!(opts.embed);
        assert_eq!(opts.gravity, Gravity::West);
        assert_eq!(opts.color, vec![255, 200, 150]);
    }

    #[test]
    fn test_map_params_mixed_types() {
        let map = json!({
            "width": 200,
            "opacity": 2.2,
            "force": true,
            "stripmeta": false,
            "type": "jpeg",
            "background": "255,12,3",
        });
        let opts = build_from_map(map.as_object().unwrap()).unwrap();
        assert_eq!(opts.width, 200);
        assert!((f64::from(opts.opacity) - 2.2).abs() < 1e-4);
        assert!(opts.force);
        assert!(!opts.strip_metadata);
        assert!(opts.defined.strip_metadata);
        assert_eq!(opts.background[0], 255);
    }

    #[test]
    fn test_coerce_int() {
        assert_eq!(coerce_int("w", &json!("200")).unwrap(), 200);
        assert_eq!(coerce_int("w", &json!(200)).unwrap(), 200);
        assert_eq!(coerce_int("w", &json!(200.0)).unwrap(), 200);
        assert!(coerce_int("w", &json!(false)).is_err());
    }

    #[test]
    fn test_coerce_float() {
        assert_eq!(coerce_float("o", &json!("200")).unwrap(), 200.0);
        assert_eq!(coerce_float("o", &json!(200)).unwrap(), 200.0);
        assert_eq!(coerce_float("o", &json!(200.0)).unwrap(), 200.0);
        assert!(coerce_float("o", &json!(false)).is_err());
    }

    #[test]
    fn test_coerce_bool() {
        assert_eq!(coerce_bool("b", &json!("true")).unwrap(), true);
        assert_eq!(coerce_bool("b", &json!(true)).unwrap(), true);
        assert_eq!(coerce_bool("b", &json!("1")).unwrap(), true);
        assert!(coerce_bool("b", &json!("bubblegum")).is_err());
    }

    #[test]
    fn test_coerce_string() {
        assert_eq!(coerce_string("s", &json!("true")).unwrap(), "true");
        assert!(coerce_string("s", &json!(false)).is_err());
        assert!(coerce_string("s", &json!(0.0)).is_err());
        assert!(coerce_string("s", &json!(0)).is_err());
    }
}
