//! The request middleware chain. Composition order is contractual: method
//! guard → default headers → cache headers → API key → CORS → throttle →
//! disabled-endpoint filter → metrics → handler, with the URL-signature
//! check wrapping image endpoints entirely.

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use crate::errors::ImageError;
use crate::handlers::{error_reply, json_error_response};
use crate::params::query_pairs;
use crate::signature;
use crate::AppState;

/// Only GET and POST make it past the front door.
pub async fn validate_request(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() != Method::GET && req.method() != Method::POST {
        return error_reply(&state, req.uri().query(), ImageError::method_not_allowed());
    }
    next.run(req).await
}

pub async fn set_default_headers(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if let Ok(server) = HeaderValue::from_str(&format!(
        "henkan {} (image {})",
        crate::VERSION,
        crate::engine::VERSION
    )) {
        headers.insert(header::SERVER, server);
    }

    let alt_svc = format!("h3=\":{}\"; ma=2592000", state.config.server.quic_port);
    if let Ok(value) = HeaderValue::from_str(&alt_svc) {
        headers.insert(header::ALT_SVC, value);
    }

    response
}

/// Cache headers for GET requests outside the public paths. When
/// `cache-control` is in the source-response pass-through list and the
/// upstream already set one, the upstream header wins.
pub async fn set_cache_headers(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let ttl = state.config.server.http_cache_ttl;
    let applies =
        ttl >= 0 && req.method() == Method::GET && !state.config.is_public_path(req.uri().path());

    let mut response = next.run(req).await;
    if !applies {
        return response;
    }

    let upstream_precedence = state
        .config
        .sources
        .source_response_headers
        .iter()
        .any(|name| name.eq_ignore_ascii_case("cache-control"))
        && response.headers().contains_key(header::CACHE_CONTROL);
    if upstream_precedence {
        return response;
    }

    let expires = chrono::Utc::now() + chrono::Duration::seconds(ttl);
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&expires.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
    {
        headers.insert(header::EXPIRES, value);
    }
    if let Ok(value) = HeaderValue::from_str(&cache_control_value(ttl)) {
        headers.insert(header::CACHE_CONTROL, value);
    }

    response
}

pub fn cache_control_value(ttl: i64) -> String {
    if ttl == 0 {
        "private, no-cache, no-store, must-revalidate".to_string()
    } else {
        format!("public, s-maxage={ttl}, max-age={ttl}, no-transform")
    }
}

/// API key from the `API-Key` header or the `key` query parameter.
pub async fn authorize_client(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let expected = &state.config.security.api_key;
    if expected.is_empty() {
        return next.run(req).await;
    }

    let header_key = req
        .headers()
        .get("api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let key = header_key.or_else(|| {
        query_pairs(req.uri().query())
            .into_iter()
            .find(|(name, _)| name == "key")
            .map(|(_, value)| value)
    });

    if key.as_deref() != Some(expected.as_str()) {
        return error_reply(&state, req.uri().query(), ImageError::invalid_api_key());
    }
    next.run(req).await
}

pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::HEAD])
        .allow_headers(Any)
}

/// GCRA throttle keyed by HTTP method. Rejections answer with a plain JSON
/// 429, never a placeholder.
pub async fn throttle_requests(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if !state.throttle.check(req.method()) {
        return json_error_response(&ImageError::too_many_requests());
    }
    next.run(req).await
}

/// Disabled endpoints are matched against the final path segment,
/// case-sensitively.
pub async fn filter_endpoints(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let disabled = &state.config.disabled_endpoints;
    if !disabled.is_empty() {
        let endpoint = req.uri().path().rsplit('/').next().unwrap_or("");
        if disabled.iter().any(|name| name == endpoint) {
            return error_reply(&state, req.uri().query(), ImageError::not_implemented());
        }
    }
    next.run(req).await
}

/// A GET against an image endpoint is only useful when the filesystem or
/// URL source is available.
pub async fn validate_image_source(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() == Method::GET
        && state.config.sources.mount.is_empty()
        && !state.config.sources.enable_url_source
    {
        return error_reply(&state, req.uri().query(), ImageError::get_method_not_allowed());
    }
    next.run(req).await
}

pub async fn validate_url_signature(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if !state.config.security.enable_url_signature {
        return next.run(req).await;
    }

    let pairs = query_pairs(req.uri().query());
    let sign = pairs
        .iter()
        .find(|(name, _)| name == "sign")
        .map(|(_, value)| value.clone())
        .unwrap_or_default();

    if let Err(err) = signature::verify(
        &state.config.security.url_signature_key,
        req.uri().path(),
        &pairs,
        &sign,
    ) {
        return error_reply(&state, req.uri().query(), err);
    }
    next.run(req).await
}

/// Innermost wrapper: counts the request and observes latency and sizes
/// labeled by status, path and method.
pub async fn track_metrics(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let request_bytes = content_length(req.headers());

    let response = next.run(req).await;

    state.metrics.observe(
        response.status().as_u16(),
        &path,
        &method,
        start.elapsed().as_secs_f64(),
        request_bytes,
        content_length(response.headers()),
    );
    response
}

fn content_length(headers: &axum::http::HeaderMap) -> f64 {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(0.0)
}
