use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::engine::{formats, ImageType};
use crate::signature::MIN_KEY_LENGTH;
use crate::{placeholder, Config, PlaceholderConfig};

const MAX_CACHE_TTL: i64 = 31_556_926;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("error while mounting directory: {0}")]
    InvalidMount(String),
    #[error("mount path is not a directory: {0}")]
    MountNotADirectory(String),
    #[error("cannot mount root directory for security reasons")]
    RootMount,
    #[error("http_cache_ttl only accepts a value from 0 to {MAX_CACHE_TTL}")]
    InvalidCacheTtl(i64),
    #[error("URL signature key is required")]
    MissingSignatureKey,
    #[error("URL signature key must be a minimum of {MIN_KEY_LENGTH} characters")]
    ShortSignatureKey,
    #[error("cannot read placeholder image: {0}")]
    UnreadablePlaceholder(String),
    #[error("placeholder image type is not supported; only JPEG, PNG or WEBP are supported")]
    UnsupportedPlaceholderType,
    #[error("failed to set up metrics registry: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("failed to set up image sources: {0}")]
    SourceSetup(String),
}

/// Pre-flight validation, run before binding the listener. Any failure is
/// fatal and maps to exit code 1.
pub fn perform_startup_checks(config: &Config) -> Result<(), StartupError> {
    info!("Performing startup checks");

    if !config.sources.mount.is_empty() {
        check_mount_directory(&config.sources.mount)?;
    }

    let ttl = config.server.http_cache_ttl;
    if ttl != -1 && !(0..=MAX_CACHE_TTL).contains(&ttl) {
        return Err(StartupError::InvalidCacheTtl(ttl));
    }
    if ttl == 0 {
        debug!("Cache-control headers will be set to prevent caching");
    }

    if config.security.enable_url_signature {
        let key = &config.security.url_signature_key;
        if key.is_empty() {
            return Err(StartupError::MissingSignatureKey);
        }
        if key.len() < MIN_KEY_LENGTH {
            return Err(StartupError::ShortSignatureKey);
        }
    }

    // Validates readability and type ahead of time; the bytes are loaded
    // again when the state is built.
    if config.placeholder.enabled || !config.placeholder.path.is_empty() {
        load_placeholder(&config.placeholder)?;
    }

    Ok(())
}

fn check_mount_directory(mount: &str) -> Result<(), StartupError> {
    let path = Path::new(mount);
    let meta = std::fs::metadata(path)
        .map_err(|err| StartupError::InvalidMount(format!("{mount}: {err}")))?;
    if !meta.is_dir() {
        return Err(StartupError::MountNotADirectory(mount.to_string()));
    }
    if path == Path::new("/") {
        return Err(StartupError::RootMount);
    }
    Ok(())
}

/// Resolve the placeholder bytes: a configured file wins over the embedded
/// default. Only JPEG, PNG and WEBP placeholders are accepted.
pub fn load_placeholder(config: &PlaceholderConfig) -> Result<Vec<u8>, StartupError> {
    if config.path.is_empty() {
        return Ok(placeholder::DEFAULT_PLACEHOLDER.to_vec());
    }

    let buf = std::fs::read(&config.path)
        .map_err(|err| StartupError::UnreadablePlaceholder(format!("{}: {err}", config.path)))?;

    match formats::detect_type(&buf) {
        ImageType::Jpeg | ImageType::Png | ImageType::Webp => Ok(buf),
        _ => Err(StartupError::UnsupportedPlaceholderType),
    }
}
