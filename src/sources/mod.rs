//! Image acquisition: each source decides whether it can serve a request
//! and, if so, produces the raw image bytes plus any upstream response
//! headers worth propagating.

mod body;
mod fs;
mod http;

pub use body::BodyImageSource;
pub use fs::FileSystemImageSource;
pub use http::HttpImageSource;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;

use crate::errors::ImageError;
use crate::origins::Origin;

/// The source-facing view of an incoming request: everything needed to pick
/// and drive a source without holding the hyper request itself.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Bytes,
}

impl ImageRequest {
    /// First value for a query key, like `url.Values.Get`.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Shared configuration handed to every source at startup.
#[derive(Debug, Clone, Default)]
pub struct SourceConfig {
    pub mount: String,
    pub enable_url_source: bool,
    pub authorization: String,
    pub auth_forwarding: bool,
    pub forward_headers: Vec<String>,
    pub allowed_origins: Vec<Origin>,
    pub max_allowed_size: usize,
    pub insecure: bool,
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    fn matches(&self, req: &ImageRequest) -> bool;
    async fn get_image(&self, req: &ImageRequest) -> Result<(Vec<u8>, HeaderMap), ImageError>;
}

/// Instantiate the sources enabled by configuration. The list is built once
/// at startup and read-only afterwards.
pub fn load_sources(config: &SourceConfig) -> Result<Vec<Box<dyn ImageSource>>, ImageError> {
    let mut sources: Vec<Box<dyn ImageSource>> = vec![Box::new(BodyImageSource::new())];
    if !config.mount.is_empty() {
        sources.push(Box::new(FileSystemImageSource::new(config.clone())));
    }
    if config.enable_url_source {
        sources.push(Box::new(HttpImageSource::new(config.clone())?));
    }
    Ok(sources)
}

/// First source whose predicate accepts the request.
pub fn match_source<'a>(
    sources: &'a [Box<dyn ImageSource>],
    req: &ImageRequest,
) -> Option<&'a dyn ImageSource> {
    sources
        .iter()
        .find(|source| source.matches(req))
        .map(|source| source.as_ref())
}

#[cfg(test)]
pub(crate) fn test_request(method: Method, query: &[(&str, &str)]) -> ImageRequest {
    ImageRequest {
        method,
        path: "/resize".to_string(),
        headers: HeaderMap::new(),
        query: query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        body: Bytes::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_sources_respects_config() {
        let minimal = load_sources(&SourceConfig::default()).unwrap();
        assert_eq!(minimal.len(), 1);

        let full = load_sources(&SourceConfig {
            mount: "/tmp".to_string(),
            enable_url_source: true,
            ..SourceConfig::default()
        })
        .unwrap();
        assert_eq!(full.len(), 3);
    }

    #[test]
    fn test_match_source_picks_body_for_post() {
        let sources = load_sources(&SourceConfig::default()).unwrap();
        let req = test_request(Method::POST, &[]);
        assert!(match_source(&sources, &req).is_some());

        let get = test_request(Method::GET, &[]);
        assert!(match_source(&sources, &get).is_none());
    }
}
