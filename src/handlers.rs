//! HTTP controllers: the version/health/form endpoints, the generic image
//! controller, and the error/placeholder reply policy.

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use tracing::error;

use crate::engine::{self, ImageType};
use crate::errors::ImageError;
use crate::operations::Operation;
use crate::options::ImageOptions;
use crate::params::{self, query_pairs};
use crate::sources::{match_source, ImageRequest};
use crate::AppState;

/// Upper bound for buffered request bodies, matching the multipart memory
/// cap.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

pub async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "henkan": crate::VERSION,
        "engine": engine::VERSION,
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<crate::health::HealthStats> {
    Json(crate::health::health_stats(state.started_at))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.gather(),
    )
}

pub async fn not_found() -> Response {
    json_error_response(&ImageError::not_found())
}

/// The HTML playground: one upload form per operation with a sample query.
pub async fn form(State(state): State<AppState>) -> Html<String> {
    let operations: &[(&str, &str, &str)] = &[
        ("Resize", "resize", "width=300&height=200&type=jpeg"),
        ("Force resize", "resize", "width=300&height=200&force=true"),
        ("Crop", "crop", "width=300&quality=95"),
        ("SmartCrop", "crop", "width=300&height=260&quality=95&gravity=smart"),
        ("Extract", "extract", "top=100&left=100&areawidth=300&areaheight=150"),
        ("Enlarge", "enlarge", "width=1440&height=900&quality=95"),
        ("Rotate", "rotate", "rotate=180"),
        ("AutoRotate", "autorotate", "quality=90"),
        ("Flip", "flip", ""),
        ("Flop", "flop", ""),
        ("Thumbnail", "thumbnail", "width=100"),
        ("Zoom", "zoom", "factor=2&areawidth=300&top=80&left=80"),
        ("Color space (black&white)", "resize", "width=400&height=300&colorspace=bw"),
        (
            "Add watermark",
            "watermark",
            "textwidth=100&text=Hello&font=sans%2012&opacity=0.5&color=255,200,50",
        ),
        ("Convert format", "convert", "type=png"),
        ("Image metadata", "info", ""),
        ("Gaussian blur", "blur", "sigma=15.0&minampl=0.2"),
        (
            "Pipeline (image reduction via multiple transformations)",
            "pipeline",
            "operations=%5B%7B%22operation%22:%20%22crop%22,%20%22params%22:%20%7B%22width%22:%20300,%20%22height%22:%20260%7D%7D,%20%7B%22operation%22:%20%22convert%22,%20%22params%22:%20%7B%22type%22:%20%22webp%22%7D%7D%5D",
        ),
    ];

    let prefix = state.config.server.path_prefix.trim_end_matches('/');
    let mut html = String::from("<html><body>");
    for (title, endpoint, args) in operations {
        html.push_str(&format!(
            r#"
        <h1>{title}</h1>
        <form method="POST" action="{prefix}/{endpoint}?{args}" enctype="multipart/form-data">
        <input type="file" name="file" />
        <input type="submit" value="Upload" />
        </form>"#
        ));
    }
    html.push_str("</body></html>");
    Html(html)
}

/// Generic image endpoint: resolve a source, coerce parameters, enforce the
/// resolution cap, run the operation and write the encoded result.
pub async fn image_controller(state: AppState, op: Operation, req: Request) -> Response {
    let raw_query = req.uri().query().map(str::to_string);
    let query = raw_query.as_deref();

    let image_req = match buffer_request(req).await {
        Ok(image_req) => image_req,
        Err(err) => return error_reply(&state, query, err),
    };

    let Some(source) = match_source(&state.sources, &image_req) else {
        return error_reply(&state, query, ImageError::missing_image_source());
    };

    let (buf, src_headers) = match source.get_image(&image_req).await {
        Ok(result) => result,
        Err(err) => return error_reply(&state, query, err),
    };
    if buf.is_empty() {
        return error_reply(&state, query, ImageError::empty_body());
    }

    let passthrough = passthrough_headers(&state, &src_headers);

    if !state.engine.detect_type(&buf).can_decode() {
        let reply = error_reply(&state, query, ImageError::unsupported_media());
        return apply_headers(reply, &passthrough);
    }

    let (opts, vary) = match process_image_options(&state, &image_req) {
        Ok(result) => result,
        Err(err) => {
            let reply = error_reply(&state, query, err);
            return apply_headers(reply, &passthrough);
        }
    };

    if let Err(err) = validate_image_size(&state, &buf) {
        let reply = error_reply(&state, query, err);
        return apply_headers(reply, &passthrough);
    }

    let image = match op.run(&state, buf, &opts).await {
        Ok(image) => image,
        Err(err) => {
            let mut reply = error_reply(&state, query, err);
            if vary {
                reply
                    .headers_mut()
                    .insert(header::VARY, HeaderValue::from_static("Accept"));
            }
            return apply_headers(reply, &passthrough);
        }
    };

    apply_headers(write_image_response(&state, image, vary), &passthrough)
}

async fn buffer_request(req: Request) -> Result<ImageRequest, ImageError> {
    let (parts, body) = req.into_parts();
    let query = query_pairs(parts.uri.query());
    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| ImageError::empty_body())?;
    Ok(ImageRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        headers: parts.headers,
        query,
        body,
    })
}

fn process_image_options(
    state: &AppState,
    req: &ImageRequest,
) -> Result<(ImageOptions, bool), ImageError> {
    let mut opts = params::build_from_query(&req.query).map_err(|err| {
        ImageError::bad_request(format!("Error while processing parameters, {}", err.message))
    })?;

    let mut vary = false;
    if opts.format == "auto" {
        opts.format = determine_accept_mime(req.header_value("accept").unwrap_or("")).to_string();
        vary = true;
    } else if !opts.format.is_empty() && ImageType::from_name(&opts.format) == ImageType::Unknown {
        return Err(ImageError::output_format());
    }

    Ok((opts, vary))
}

/// First recognized image MIME in the Accept header, or empty to preserve
/// the input format.
fn determine_accept_mime(accept: &str) -> &'static str {
    for part in accept.split(',') {
        let media_type = part.split(';').next().unwrap_or("").trim();
        match media_type {
            "image/avif" => return "avif",
            "image/jpeg" => return "jpeg",
            "image/png" => return "png",
            "image/webp" => return "webp",
            _ => {}
        }
    }
    ""
}

fn validate_image_size(state: &AppState, buf: &[u8]) -> Result<(), ImageError> {
    let (width, height) = state.engine.dimensions(buf).map_err(|err| {
        ImageError::bad_request(format!("Error while processing the image: {err}"))
    })?;
    let megapixels = f64::from(width) * f64::from(height) / 1_000_000.0;
    if megapixels > state.config.engine.max_allowed_pixels {
        return Err(ImageError::resolution_too_big());
    }
    Ok(())
}

fn write_image_response(state: &AppState, image: engine::Image, vary: bool) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(image.mime));
    if let Ok(length) = HeaderValue::from_str(&image.body.len().to_string()) {
        headers.insert(header::CONTENT_LENGTH, length);
    }

    if state.config.engine.return_size && image.mime != "application/json" {
        if let Ok(meta) = state.engine.metadata(&image.body) {
            if let Ok(width) = HeaderValue::from_str(&meta.width.to_string()) {
                headers.insert(HeaderName::from_static("image-width"), width);
            }
            if let Ok(height) = HeaderValue::from_str(&meta.height.to_string()) {
                headers.insert(HeaderName::from_static("image-height"), height);
            }
        }
    }

    if vary {
        headers.insert(header::VARY, HeaderValue::from_static("Accept"));
    }

    (StatusCode::OK, headers, Body::from(image.body)).into_response()
}

/// Copy only the whitelisted upstream headers onto the reply.
fn passthrough_headers(state: &AppState, src_headers: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for wanted in &state.config.sources.source_response_headers {
        if let Ok(name) = wanted.parse::<HeaderName>() {
            if let Some(value) = src_headers.get(&name) {
                headers.insert(name, value.clone());
            }
        }
    }
    headers
}

fn apply_headers(mut response: Response, headers: &HeaderMap) -> Response {
    for (name, value) in headers {
        response.headers_mut().insert(name.clone(), value.clone());
    }
    response
}

/// Reply policy: a JSON error, or a resized placeholder image when
/// placeholder mode is on so image clients always get a valid image back.
pub fn error_reply(state: &AppState, raw_query: Option<&str>, err: ImageError) -> Response {
    let placeholder = &state.config.placeholder;
    if placeholder.enabled || !placeholder.path.is_empty() {
        return placeholder_reply(state, raw_query, err);
    }
    json_error_response(&err)
}

pub fn json_error_response(err: &ImageError) -> Response {
    (
        err.http_code(),
        [(header::CONTENT_TYPE, "application/json")],
        err.json(),
    )
        .into_response()
}

fn placeholder_reply(state: &AppState, raw_query: Option<&str>, err: ImageError) -> Response {
    let pairs = query_pairs(raw_query);
    let value = |key: &str| {
        pairs
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    };

    let opts = engine::Options {
        width: params::parse_int(value("width")),
        height: params::parse_int(value("height")),
        format: ImageType::from_name(value("type")),
        force: true,
        crop: true,
        enlarge: true,
        ..engine::Options::default()
    };

    match state.engine.process(&state.placeholder_image, &opts) {
        Ok(image) => {
            let status = if state.config.placeholder.status != 0 {
                StatusCode::from_u16(state.config.placeholder.status)
                    .unwrap_or_else(|_| err.http_code())
            } else {
                err.http_code()
            };

            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(image.mime));
            if let Ok(value) = HeaderValue::from_str(&err.json()) {
                headers.insert(HeaderName::from_static("error"), value);
            }
            (status, headers, Body::from(image.body)).into_response()
        }
        Err(engine_err) => {
            error!("Placeholder resize failed: {engine_err}");
            json_error_response(&ImageError::bad_request(engine_err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determine_accept_mime() {
        assert_eq!(determine_accept_mime("image/webp,image/png"), "webp");
        assert_eq!(
            determine_accept_mime("text/html, image/avif;q=0.8, image/jpeg"),
            "avif"
        );
        assert_eq!(determine_accept_mime("image/png;q=0.9"), "png");
        assert_eq!(determine_accept_mime("text/html"), "");
        assert_eq!(determine_accept_mime(""), "");
    }
}
