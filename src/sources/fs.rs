use async_trait::async_trait;
use axum::http::{HeaderMap, Method};
use std::path::{Component, Path, PathBuf};

use super::{ImageRequest, ImageSource, SourceConfig};
use crate::errors::ImageError;

const FILE_QUERY_KEY: &str = "file";

/// Serves images from the configured mount directory via the `file` query
/// parameter. Paths are lexically normalized and must stay under the mount;
/// this is the defense against `..` traversal.
pub struct FileSystemImageSource {
    config: SourceConfig,
}

impl FileSystemImageSource {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    fn build_path(&self, file: &str) -> Result<PathBuf, ImageError> {
        let joined = Path::new(&self.config.mount).join(file);
        let cleaned = clean_path(&joined);
        if !cleaned.starts_with(&self.config.mount) {
            return Err(ImageError::invalid_file_path());
        }
        Ok(cleaned)
    }
}

#[async_trait]
impl ImageSource for FileSystemImageSource {
    fn matches(&self, req: &ImageRequest) -> bool {
        req.method == Method::GET
            && req
                .query_value(FILE_QUERY_KEY)
                .is_some_and(|file| !file.is_empty())
    }

    async fn get_image(&self, req: &ImageRequest) -> Result<(Vec<u8>, HeaderMap), ImageError> {
        let file = req.query_value(FILE_QUERY_KEY).unwrap_or("");
        if file.is_empty() {
            return Err(ImageError::missing_param_file());
        }

        let path = self.build_path(file)?;
        let buf = tokio::fs::read(&path)
            .await
            .map_err(|_| ImageError::invalid_file_path())?;
        Ok((buf, HeaderMap::new()))
    }
}

/// Lexical path normalization: resolves `.` and `..` components without
/// touching the filesystem.
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    cleaned.push(Component::ParentDir);
                }
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::test_request;

    fn source(mount: &str) -> FileSystemImageSource {
        FileSystemImageSource::new(SourceConfig {
            mount: mount.to_string(),
            ..SourceConfig::default()
        })
    }

    #[test]
    fn test_matches_get_with_file_param() {
        let src = source("/srv/images");
        assert!(src.matches(&test_request(Method::GET, &[("file", "a.jpg")])));
        assert!(!src.matches(&test_request(Method::GET, &[("file", "")])));
        assert!(!src.matches(&test_request(Method::GET, &[])));
        assert!(!src.matches(&test_request(Method::POST, &[("file", "a.jpg")])));
    }

    #[test]
    fn test_build_path_inside_mount() {
        let src = source("/srv/images");
        let path = src.build_path("sub/photo.jpg").unwrap();
        assert_eq!(path, PathBuf::from("/srv/images/sub/photo.jpg"));
    }

    #[test]
    fn test_build_path_rejects_traversal() {
        let src = source("/srv/images");
        assert_eq!(
            src.build_path("../../etc/passwd").unwrap_err(),
            ImageError::invalid_file_path()
        );
        assert_eq!(
            src.build_path("sub/../../outside.jpg").unwrap_err(),
            ImageError::invalid_file_path()
        );
    }

    #[test]
    fn test_build_path_allows_inner_dotdot() {
        let src = source("/srv/images");
        let path = src.build_path("sub/../photo.jpg").unwrap();
        assert_eq!(path, PathBuf::from("/srv/images/photo.jpg"));
    }

    #[tokio::test]
    async fn test_get_image_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("pic.png"), b"png bytes")
            .await
            .unwrap();

        let src = source(dir.path().to_str().unwrap());
        let req = test_request(Method::GET, &[("file", "pic.png")]);
        let (buf, _) = src.get_image(&req).await.unwrap();
        assert_eq!(buf, b"png bytes");
    }

    #[tokio::test]
    async fn test_get_image_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = source(dir.path().to_str().unwrap());
        let req = test_request(Method::GET, &[("file", "nope.png")]);
        assert_eq!(
            src.get_image(&req).await.unwrap_err(),
            ImageError::invalid_file_path()
        );
    }
}
