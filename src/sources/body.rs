use async_trait::async_trait;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;

use super::{ImageRequest, ImageSource};
use crate::errors::ImageError;

const FORM_FIELD_NAME: &str = "file";

/// Reads the image from the request payload: a raw body, or the `file` part
/// of a multipart form.
pub struct BodyImageSource;

impl BodyImageSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BodyImageSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageSource for BodyImageSource {
    fn matches(&self, req: &ImageRequest) -> bool {
        req.method == Method::POST || req.method == Method::PUT
    }

    async fn get_image(&self, req: &ImageRequest) -> Result<(Vec<u8>, HeaderMap), ImageError> {
        let content_type = req.header_value("content-type").unwrap_or("");
        let buf = if content_type.starts_with("multipart/") {
            read_form_body(content_type, req.body.clone()).await?
        } else {
            req.body.to_vec()
        };
        Ok((buf, HeaderMap::new()))
    }
}

async fn read_form_body(content_type: &str, body: Bytes) -> Result<Vec<u8>, ImageError> {
    let boundary = multer::parse_boundary(content_type)
        .map_err(|_| ImageError::bad_request("Malformed multipart form"))?;

    let stream = futures_util::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ImageError::bad_request(format!("Malformed multipart form: {err}")))?
    {
        if field.name() == Some(FORM_FIELD_NAME) {
            let buf = field
                .bytes()
                .await
                .map_err(|err| ImageError::bad_request(format!("Unreadable form file: {err}")))?;
            if buf.is_empty() {
                return Err(ImageError::empty_body());
            }
            return Ok(buf.to_vec());
        }
    }

    Err(ImageError::empty_body())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::test_request;

    fn multipart_body(field: &str, payload: &[u8]) -> (String, Bytes) {
        let boundary = "testboundary";
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"x.png\"\r\n")
                .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        (
            format!("multipart/form-data; boundary={boundary}"),
            Bytes::from(body),
        )
    }

    #[test]
    fn test_matches_post_and_put() {
        let source = BodyImageSource::new();
        assert!(source.matches(&test_request(Method::POST, &[])));
        assert!(source.matches(&test_request(Method::PUT, &[])));
        assert!(!source.matches(&test_request(Method::GET, &[])));
    }

    #[tokio::test]
    async fn test_raw_body() {
        let source = BodyImageSource::new();
        let mut req = test_request(Method::POST, &[]);
        req.body = Bytes::from_static(b"raw image bytes");
        let (buf, _) = source.get_image(&req).await.unwrap();
        assert_eq!(buf, b"raw image bytes");
    }

    #[tokio::test]
    async fn test_multipart_file_field() {
        let source = BodyImageSource::new();
        let (content_type, body) = multipart_body("file", b"payload");
        let mut req = test_request(Method::POST, &[]);
        req.headers
            .insert("content-type", content_type.parse().unwrap());
        req.body = body;
        let (buf, _) = source.get_image(&req).await.unwrap();
        assert_eq!(buf, b"payload");
    }

    #[tokio::test]
    async fn test_multipart_empty_file_is_error() {
        let source = BodyImageSource::new();
        let (content_type, body) = multipart_body("file", b"");
        let mut req = test_request(Method::POST, &[]);
        req.headers
            .insert("content-type", content_type.parse().unwrap());
        req.body = body;
        let err = source.get_image(&req).await.unwrap_err();
        assert_eq!(err, ImageError::empty_body());
    }

    #[tokio::test]
    async fn test_multipart_wrong_field_name() {
        let source = BodyImageSource::new();
        let (content_type, body) = multipart_body("avatar", b"payload");
        let mut req = test_request(Method::POST, &[]);
        req.headers
            .insert("content-type", content_type.parse().unwrap());
        req.body = body;
        assert!(source.get_image(&req).await.is_err());
    }
}
