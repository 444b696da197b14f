use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use url::Url;

use super::{ImageRequest, ImageSource, SourceConfig};
use crate::errors::ImageError;
use crate::origins;

const URL_QUERY_KEY: &str = "url";
const FORWARD_AUTHORIZATION_HEADER: &str = "x-forward-authorization";

/// Fetches the image from a remote URL given in the `url` query parameter,
/// subject to the origin allow-list and the configured size cap. The client
/// is built once per source, so the insecure-TLS flag never leaks into any
/// shared transport.
pub struct HttpImageSource {
    config: SourceConfig,
    client: reqwest::Client,
}

impl HttpImageSource {
    pub fn new(config: SourceConfig) -> Result<Self, ImageError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("henkan/{}", crate::VERSION))
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|err| {
                ImageError::new(
                    format!("Cannot build HTTP source client: {err}"),
                    StatusCode::INTERNAL_SERVER_ERROR,
                )
            })?;
        Ok(Self { config, client })
    }

    fn upstream_headers(&self, req: &ImageRequest) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for name in &self.config.forward_headers {
            if let Ok(header_name) = name.parse::<HeaderName>() {
                if let Some(value) = req.headers.get(&header_name) {
                    headers.insert(header_name, value.clone());
                }
            }
        }

        if self.config.auth_forwarding || !self.config.authorization.is_empty() {
            if let Some(auth) = self.authorization_value(req) {
                headers.insert(AUTHORIZATION, auth);
            }
        }

        headers
    }

    /// Constant authorization wins over the forwarded one.
    fn authorization_value(&self, req: &ImageRequest) -> Option<HeaderValue> {
        if !self.config.authorization.is_empty() {
            return HeaderValue::from_str(&self.config.authorization).ok();
        }
        req.headers
            .get(FORWARD_AUTHORIZATION_HEADER)
            .or_else(|| req.headers.get("authorization"))
            .cloned()
    }

    async fn fetch_image(
        &self,
        url: &Url,
        req: &ImageRequest,
    ) -> Result<(Vec<u8>, HeaderMap), ImageError> {
        // Check the remote size from the headers before pulling the body.
        if self.config.max_allowed_size > 0 {
            let head = self
                .client
                .head(url.clone())
                .headers(self.upstream_headers(req))
                .send()
                .await
                .map_err(|err| {
                    ImageError::bad_request(format!(
                        "Error fetching remote http image headers: {err}"
                    ))
                })?;

            let status = head.status();
            if status.as_u16() < 200 || status.as_u16() > 206 {
                return Err(ImageError::new(
                    format!("Error fetching remote http image headers: (status={status}) (url={url})"),
                    status,
                ));
            }

            let content_length = head
                .headers()
                .get("content-length")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);
            if content_length > self.config.max_allowed_size {
                return Err(ImageError::bad_request(format!(
                    "Content-Length {content_length} exceeds maximum allowed {} bytes",
                    self.config.max_allowed_size
                )));
            }
        }

        let response = self
            .client
            .get(url.clone())
            .headers(self.upstream_headers(req))
            .send()
            .await
            .map_err(|err| {
                ImageError::bad_request(format!("Error fetching remote http image: {err}"))
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ImageError::new(
                format!("Error fetching remote http image: (status={status}) (url={url})"),
                status,
            ));
        }

        let upstream_headers = response.headers().clone();
        let body = response.bytes().await.map_err(|err| {
            ImageError::bad_request(format!(
                "Unable to create image from response body: (url={url}) {err}"
            ))
        })?;

        Ok((body.to_vec(), upstream_headers))
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    fn matches(&self, req: &ImageRequest) -> bool {
        req.method == Method::GET
            && req
                .query_value(URL_QUERY_KEY)
                .is_some_and(|url| !url.is_empty())
    }

    async fn get_image(&self, req: &ImageRequest) -> Result<(Vec<u8>, HeaderMap), ImageError> {
        let raw = req.query_value(URL_QUERY_KEY).unwrap_or("");
        let url = Url::parse(raw).map_err(|_| ImageError::invalid_image_url())?;

        if origins::should_restrict(&url, &self.config.allowed_origins) {
            return Err(ImageError::bad_request(format!(
                "Not allowed remote URL origin: {}{}",
                url.host_str().unwrap_or(""),
                url.path()
            )));
        }

        self.fetch_image(&url, req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origins::parse_origins;
    use crate::sources::test_request;

    fn source(config: SourceConfig) -> HttpImageSource {
        HttpImageSource::new(config).unwrap()
    }

    #[test]
    fn test_matches_get_with_url_param() {
        let src = source(SourceConfig::default());
        assert!(src.matches(&test_request(
            Method::GET,
            &[("url", "https://example.org/a.jpg")]
        )));
        assert!(!src.matches(&test_request(Method::GET, &[("url", "")])));
        assert!(!src.matches(&test_request(Method::POST, &[("url", "x")])));
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let src = source(SourceConfig::default());
        let req = test_request(Method::GET, &[("url", "::not a url::")]);
        assert_eq!(
            src.get_image(&req).await.unwrap_err(),
            ImageError::invalid_image_url()
        );
    }

    #[tokio::test]
    async fn test_restricted_origin_rejected() {
        let src = source(SourceConfig {
            allowed_origins: parse_origins(&["https://cdn.example.org".to_string()]),
            ..SourceConfig::default()
        });
        let req = test_request(Method::GET, &[("url", "https://evil.example.org/a.jpg")]);
        let err = src.get_image(&req).await.unwrap_err();
        assert!(err.message.contains("Not allowed remote URL origin"));
    }

    #[test]
    fn test_constant_authorization_wins() {
        let src = source(SourceConfig {
            authorization: "Bearer constant".to_string(),
            auth_forwarding: true,
            ..SourceConfig::default()
        });
        let mut req = test_request(Method::GET, &[]);
        req.headers
            .insert("x-forward-authorization", "Bearer forwarded".parse().unwrap());
        let headers = src.upstream_headers(&req);
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer constant");
    }

    #[test]
    fn test_forwarded_authorization() {
        let src = source(SourceConfig {
            auth_forwarding: true,
            ..SourceConfig::default()
        });
        let mut req = test_request(Method::GET, &[]);
        req.headers
            .insert("x-forward-authorization", "Bearer forwarded".parse().unwrap());
        let headers = src.upstream_headers(&req);
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer forwarded");
    }

    #[test]
    fn test_forward_headers_filtered() {
        let src = source(SourceConfig {
            forward_headers: vec!["x-custom".to_string()],
            ..SourceConfig::default()
        });
        let mut req = test_request(Method::GET, &[]);
        req.headers.insert("x-custom", "yes".parse().unwrap());
        req.headers.insert("x-other", "no".parse().unwrap());
        let headers = src.upstream_headers(&req);
        assert_eq!(headers.get("x-custom").unwrap(), "yes");
        assert!(headers.get("x-other").is_none());
    }
}
