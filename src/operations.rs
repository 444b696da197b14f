//! Operation dispatch: one variant per image endpoint, each validating its
//! required parameters before handing the engine a transform description.

use axum::http::StatusCode;

use crate::engine::{self, EngineError, Gravity, ImageType};
use crate::errors::ImageError;
use crate::options::ImageOptions;
use crate::params;
use crate::AppState;

const MISSING_HEIGHT_WIDTH: &str = "Missing required param: height or width";
const MAX_PIPELINE_OPERATIONS: usize = 10;
const MAX_WATERMARK_IMAGE_BYTES: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Resize,
    Crop,
    SmartCrop,
    Enlarge,
    Extract,
    Fit,
    Rotate,
    AutoRotate,
    Flip,
    Flop,
    Thumbnail,
    Zoom,
    Convert,
    Watermark,
    WatermarkImage,
    Blur,
    Info,
    Pipeline,
}

impl Operation {
    /// Router endpoint name for this operation.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Operation::Resize => "resize",
            Operation::Crop => "crop",
            Operation::SmartCrop => "smartcrop",
            Operation::Enlarge => "enlarge",
            Operation::Extract => "extract",
            Operation::Fit => "fit",
            Operation::Rotate => "rotate",
            Operation::AutoRotate => "autorotate",
            Operation::Flip => "flip",
            Operation::Flop => "flop",
            Operation::Thumbnail => "thumbnail",
            Operation::Zoom => "zoom",
            Operation::Convert => "convert",
            Operation::Watermark => "watermark",
            Operation::WatermarkImage => "watermarkimage",
            Operation::Blur => "blur",
            Operation::Info => "info",
            Operation::Pipeline => "pipeline",
        }
    }

    pub fn all() -> &'static [Operation] {
        &[
            Operation::Resize,
            Operation::Crop,
            Operation::SmartCrop,
            Operation::Enlarge,
            Operation::Extract,
            Operation::Fit,
            Operation::Rotate,
            Operation::AutoRotate,
            Operation::Flip,
            Operation::Flop,
            Operation::Thumbnail,
            Operation::Zoom,
            Operation::Convert,
            Operation::Watermark,
            Operation::WatermarkImage,
            Operation::Blur,
            Operation::Info,
            Operation::Pipeline,
        ]
    }

    /// Operations addressable from a pipeline descriptor. `info` and
    /// `pipeline` itself are endpoint-only.
    pub fn from_pipeline_name(name: &str) -> Option<Self> {
        match name {
            "crop" => Some(Operation::Crop),
            "resize" => Some(Operation::Resize),
            "enlarge" => Some(Operation::Enlarge),
            "extract" => Some(Operation::Extract),
            "rotate" => Some(Operation::Rotate),
            "autorotate" => Some(Operation::AutoRotate),
            "flip" => Some(Operation::Flip),
            "flop" => Some(Operation::Flop),
            "thumbnail" => Some(Operation::Thumbnail),
            "zoom" => Some(Operation::Zoom),
            "convert" => Some(Operation::Convert),
            "watermark" => Some(Operation::Watermark),
            "watermarkImage" => Some(Operation::WatermarkImage),
            "blur" => Some(Operation::Blur),
            "smartcrop" => Some(Operation::SmartCrop),
            "fit" => Some(Operation::Fit),
            _ => None,
        }
    }

    pub async fn run(
        &self,
        state: &AppState,
        buf: Vec<u8>,
        opts: &ImageOptions,
    ) -> Result<engine::Image, ImageError> {
        match self {
            Operation::Pipeline => run_pipeline(state, buf, opts).await,
            _ => run_single(state, *self, buf, opts).await,
        }
    }
}

async fn run_single(
    state: &AppState,
    op: Operation,
    buf: Vec<u8>,
    opts: &ImageOptions,
) -> Result<engine::Image, ImageError> {
    match op {
        Operation::Resize => {
            require_width_or_height(opts)?;
            let mut engine_opts = opts.to_engine();
            engine_opts.embed = true;
            if opts.defined.no_crop {
                engine_opts.crop = !opts.no_crop;
            }
            run_engine(state, buf, engine_opts).await
        }
        Operation::Crop => {
            require_width_or_height(opts)?;
            let mut engine_opts = opts.to_engine();
            engine_opts.crop = true;
            run_engine(state, buf, engine_opts).await
        }
        Operation::SmartCrop => {
            require_width_or_height(opts)?;
            let mut engine_opts = opts.to_engine();
            engine_opts.crop = true;
            engine_opts.gravity = Gravity::Smart;
            run_engine(state, buf, engine_opts).await
        }
        Operation::Enlarge => {
            if opts.width == 0 || opts.height == 0 {
                return Err(ImageError::bad_request(
                    "Missing required params: height, width",
                ));
            }
            let mut engine_opts = opts.to_engine();
            engine_opts.enlarge = true;
            // Both dimensions are required, so cropping is the default.
            engine_opts.crop = !opts.no_crop;
            run_engine(state, buf, engine_opts).await
        }
        Operation::Extract => {
            if opts.area_width == 0 || opts.area_height == 0 {
                return Err(ImageError::bad_request(
                    "Missing required params: areawidth or areaheight",
                ));
            }
            let mut engine_opts = opts.to_engine();
            engine_opts.top = opts.top;
            engine_opts.left = opts.left;
            engine_opts.area_width = opts.area_width;
            engine_opts.area_height = opts.area_height;
            run_engine(state, buf, engine_opts).await
        }
        Operation::Fit => run_fit(state, buf, opts).await,
        Operation::Rotate => {
            if opts.rotate == 0 {
                return Err(ImageError::bad_request("Missing required param: rotate"));
            }
            run_engine(state, buf, opts.to_engine()).await
        }
        Operation::AutoRotate => {
            let engine = state.engine.clone();
            tokio::task::spawn_blocking(move || engine.auto_rotate(&buf))
                .await
                .map_err(join_error)?
                .map_err(processing_error)
        }
        Operation::Flip => {
            let mut engine_opts = opts.to_engine();
            engine_opts.flip = true;
            run_engine(state, buf, engine_opts).await
        }
        Operation::Flop => {
            let mut engine_opts = opts.to_engine();
            engine_opts.flop = true;
            run_engine(state, buf, engine_opts).await
        }
        Operation::Thumbnail => {
            if opts.width == 0 && opts.height == 0 {
                return Err(ImageError::bad_request(
                    "Missing required params: width or height",
                ));
            }
            run_engine(state, buf, opts.to_engine()).await
        }
        Operation::Zoom => {
            if opts.factor == 0 {
                return Err(ImageError::bad_request("Missing required param: factor"));
            }
            let mut engine_opts = opts.to_engine();
            if opts.top > 0 || opts.left > 0 {
                if opts.area_width == 0 && opts.area_height == 0 {
                    return Err(ImageError::bad_request(
                        "Missing required params: areawidth, areaheight",
                    ));
                }
                engine_opts.top = opts.top;
                engine_opts.left = opts.left;
                engine_opts.area_width = opts.area_width;
                engine_opts.area_height = opts.area_height;
                if opts.defined.no_crop {
                    engine_opts.crop = !opts.no_crop;
                }
            }
            engine_opts.zoom = opts.factor;
            run_engine(state, buf, engine_opts).await
        }
        Operation::Convert => {
            if opts.format.is_empty() {
                return Err(ImageError::bad_request("Missing required param: type"));
            }
            if ImageType::from_name(&opts.format) == ImageType::Unknown {
                return Err(ImageError::bad_request(format!(
                    "Invalid image type: {}",
                    opts.format
                )));
            }
            run_engine(state, buf, opts.to_engine()).await
        }
        Operation::Watermark => {
            if opts.text.is_empty() {
                return Err(ImageError::bad_request("Missing required param: text"));
            }
            let mut engine_opts = opts.to_engine();
            engine_opts.watermark = Some(engine::TextWatermark {
                text: opts.text.clone(),
                font: opts.font.clone(),
                margin: opts.margin,
                dpi: opts.dpi,
                width: opts.text_width,
                opacity: opts.opacity,
                no_replicate: opts.no_replicate,
                color: crate::options::rgb_triple(&opts.color).unwrap_or([0, 0, 0]),
            });
            run_engine(state, buf, engine_opts).await
        }
        Operation::WatermarkImage => {
            if opts.image.is_empty() {
                return Err(ImageError::bad_request("Missing required param: image"));
            }
            let overlay = fetch_watermark_image(state, &opts.image).await?;
            let mut engine_opts = opts.to_engine();
            engine_opts.watermark_image = Some(engine::ImageWatermark {
                top: opts.top,
                left: opts.left,
                opacity: opts.opacity,
                buf: overlay,
            });
            run_engine(state, buf, engine_opts).await
        }
        Operation::Blur => {
            if opts.sigma == 0.0 && opts.min_ampl == 0.0 {
                return Err(ImageError::bad_request(
                    "Missing required param: sigma or minampl",
                ));
            }
            run_engine(state, buf, opts.to_engine()).await
        }
        Operation::Info => {
            let engine = state.engine.clone();
            let meta = tokio::task::spawn_blocking(move || engine.metadata(&buf))
                .await
                .map_err(join_error)?
                .map_err(|err| {
                    ImageError::bad_request(format!("Cannot retrieve image metadata: {err}"))
                })?;
            let body = serde_json::to_vec(&meta).map_err(|err| {
                ImageError::bad_request(format!("Cannot serialize image metadata: {err}"))
            })?;
            Ok(engine::Image {
                body,
                mime: "application/json",
            })
        }
        // Unreachable: `Operation::run` routes pipelines before this point
        // and pipeline steps cannot name `pipeline`.
        Operation::Pipeline => Err(ImageError::bad_request(
            "Unsupported operation name: pipeline",
        )),
    }
}

/// Sequentially apply the requested operations, feeding each step the
/// previous step's output. A failing step aborts the pipeline unless it is
/// flagged `ignore_failure`, in which case the previous buffer is kept.
async fn run_pipeline(
    state: &AppState,
    buf: Vec<u8>,
    opts: &ImageOptions,
) -> Result<engine::Image, ImageError> {
    if opts.operations.is_empty() {
        return Err(ImageError::bad_request(
            "Missing or invalid pipeline operations JSON",
        ));
    }
    if opts.operations.len() > MAX_PIPELINE_OPERATIONS {
        return Err(ImageError::bad_request(
            "Maximum allowed pipeline operations exceeded",
        ));
    }

    // Resolve names and coerce per-step params before touching pixels.
    let mut steps = Vec::with_capacity(opts.operations.len());
    for operation in &opts.operations {
        let op = Operation::from_pipeline_name(&operation.name).ok_or_else(|| {
            ImageError::bad_request(format!("Unsupported operation name: {}", operation.name))
        })?;
        let step_opts = params::build_from_map(&operation.params)?;
        steps.push((op, step_opts, operation.ignore_failure));
    }

    let mime = state.engine.detect_type(&buf).mime();
    let mut image = engine::Image { body: buf, mime };

    for (op, step_opts, ignore_failure) in steps {
        match run_single(state, op, image.body.clone(), &step_opts).await {
            Ok(next) => image = next,
            Err(err) if !ignore_failure => return Err(err),
            Err(_) => {}
        }
    }

    Ok(image)
}

async fn run_fit(
    state: &AppState,
    buf: Vec<u8>,
    opts: &ImageOptions,
) -> Result<engine::Image, ImageError> {
    if opts.width == 0 || opts.height == 0 {
        return Err(ImageError::bad_request(
            "Missing required params: height, width",
        ));
    }

    let engine = state.engine.clone();
    let opts = opts.clone();
    tokio::task::spawn_blocking(move || -> Result<engine::Image, ImageError> {
        let meta = engine.metadata(&buf).map_err(processing_error)?;
        if meta.width == 0 || meta.height == 0 {
            return Err(ImageError::new(
                "Width or height of requested image is zero",
                StatusCode::NOT_ACCEPTABLE,
            ));
        }

        // EXIF orientations above 4 swap the axes during auto rotation, so
        // the fit math runs in the rotated frame.
        let keep_axes = opts.no_rotation || meta.orientation <= 4;
        let (origin_width, origin_height, fit_width, fit_height) = if keep_axes {
            (meta.width, meta.height, opts.width, opts.height)
        } else {
            (meta.height, meta.width, opts.height, opts.width)
        };

        let (fitted_width, fitted_height) =
            engine::fit_within(origin_width, origin_height, fit_width, fit_height);

        let mut engine_opts = opts.to_engine();
        engine_opts.embed = true;
        if keep_axes {
            engine_opts.width = fitted_width;
            engine_opts.height = fitted_height;
        } else {
            engine_opts.width = fitted_height;
            engine_opts.height = fitted_width;
        }

        engine.process(&buf, &engine_opts).map_err(processing_error)
    })
    .await
    .map_err(join_error)?
}

async fn run_engine(
    state: &AppState,
    buf: Vec<u8>,
    engine_opts: engine::Options,
) -> Result<engine::Image, ImageError> {
    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || engine.process(&buf, &engine_opts))
        .await
        .map_err(join_error)?
        .map_err(processing_error)
}

/// Fetch the overlay image, reading at most [`MAX_WATERMARK_IMAGE_BYTES`]
/// off the wire regardless of what the upstream claims or sends.
async fn fetch_watermark_image(state: &AppState, url: &str) -> Result<Vec<u8>, ImageError> {
    let mut response = state.client.get(url).send().await.map_err(|_| {
        ImageError::bad_request(format!("Unable to retrieve watermark image. {url}"))
    })?;

    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|err| {
        ImageError::bad_request(format!("Unable to read watermark image. {err}"))
    })? {
        let remaining = MAX_WATERMARK_IMAGE_BYTES - buf.len();
        if chunk.len() >= remaining {
            buf.extend_from_slice(&chunk[..remaining]);
            break;
        }
        buf.extend_from_slice(&chunk);
    }

    if buf.is_empty() {
        return Err(ImageError::bad_request("Unable to read watermark image"));
    }
    Ok(buf)
}

fn require_width_or_height(opts: &ImageOptions) -> Result<(), ImageError> {
    if opts.width == 0 && opts.height == 0 {
        return Err(ImageError::bad_request(MISSING_HEIGHT_WIDTH));
    }
    Ok(())
}

fn processing_error(err: EngineError) -> ImageError {
    ImageError::bad_request(format!("Error while processing the image: {err}"))
}

fn join_error(err: tokio::task::JoinError) -> ImageError {
    ImageError::bad_request(format!("Error while processing the image: {err}"))
}
