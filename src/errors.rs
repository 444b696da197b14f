use axum::http::StatusCode;
use serde::Serialize;
use std::fmt;

/// HTTP-facing error carried through every layer of the request path.
///
/// The message is newline-stripped so it can always travel inside a JSON
/// body or a response header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageError {
    pub message: String,
    pub code: StatusCode,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
    status: u16,
}

impl ImageError {
    pub fn new(message: impl Into<String>, code: StatusCode) -> Self {
        let message = message.into().replace('\n', "");
        Self { message, code }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::BAD_REQUEST)
    }

    /// Status code actually sent on the wire. Anything outside the 4xx/5xx
    /// range the server can legitimately emit collapses to 503.
    pub fn http_code(&self) -> StatusCode {
        let code = self.code.as_u16();
        if (400..=511).contains(&code) {
            self.code
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }

    pub fn json(&self) -> String {
        serde_json::to_string(&ErrorBody {
            message: &self.message,
            status: self.http_code().as_u16(),
        })
        .unwrap_or_else(|_| String::from("{}"))
    }

    pub fn not_found() -> Self {
        Self::new("Not found", StatusCode::NOT_FOUND)
    }

    pub fn invalid_api_key() -> Self {
        Self::new("Invalid or missing API key", StatusCode::UNAUTHORIZED)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(
            "HTTP method not allowed. Try with a POST or GET method (enable_url_source must be set)",
            StatusCode::METHOD_NOT_ALLOWED,
        )
    }

    pub fn get_method_not_allowed() -> Self {
        Self::new(
            "GET method not allowed. Make sure the remote URL source is enabled via enable_url_source",
            StatusCode::METHOD_NOT_ALLOWED,
        )
    }

    pub fn unsupported_media() -> Self {
        Self::new("Unsupported media type", StatusCode::NOT_ACCEPTABLE)
    }

    pub fn output_format() -> Self {
        Self::new("Unsupported output image format", StatusCode::BAD_REQUEST)
    }

    pub fn empty_body() -> Self {
        Self::new("Empty or unreadable image", StatusCode::BAD_REQUEST)
    }

    pub fn missing_param_file() -> Self {
        Self::new("Missing required param: file", StatusCode::BAD_REQUEST)
    }

    pub fn invalid_file_path() -> Self {
        Self::new("Invalid file path", StatusCode::BAD_REQUEST)
    }

    pub fn invalid_image_url() -> Self {
        Self::new("Invalid image URL", StatusCode::BAD_REQUEST)
    }

    pub fn missing_image_source() -> Self {
        Self::new(
            "Cannot process the image due to missing or invalid params",
            StatusCode::BAD_REQUEST,
        )
    }

    pub fn not_implemented() -> Self {
        Self::new("Not implemented endpoint", StatusCode::NOT_IMPLEMENTED)
    }

    pub fn invalid_url_signature() -> Self {
        Self::new("Invalid URL signature", StatusCode::BAD_REQUEST)
    }

    pub fn url_signature_mismatch() -> Self {
        Self::new("URL signature mismatch", StatusCode::FORBIDDEN)
    }

    pub fn resolution_too_big() -> Self {
        Self::new(
            "Image resolution is too big",
            StatusCode::UNPROCESSABLE_ENTITY,
        )
    }

    pub fn too_many_requests() -> Self {
        Self::new("Too many requests", StatusCode::TOO_MANY_REQUESTS)
    }
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ImageError {}
