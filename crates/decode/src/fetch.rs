use std::path::{Path, PathBuf};

use crate::DecodeError;

/// Retrieves the raw bytes behind an audio source URL.
pub trait SourceFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, DecodeError>;
}

/// Reads plain paths and `file://` URLs. Relative paths are tried as given,
/// then under the samples root.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, url: &str) -> Option<PathBuf> {
        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        if path.exists() {
            return Some(path.to_path_buf());
        }
        let with_root = self.root.join(path);
        with_root.exists().then_some(with_root)
    }
}

impl Default for FileFetcher {
    fn default() -> Self {
        Self::new("samples")
    }
}

impl SourceFetcher for FileFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, DecodeError> {
        let path = self
            .resolve(url)
            .ok_or_else(|| DecodeError::NotFound(url.to_string()))?;
        std::fs::read(&path).map_err(|e| DecodeError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// File extension of a URL's last path segment, ignoring any query string.
pub fn extension_of(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty()).then_some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_under_root_and_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("kit")).unwrap();
        let file = dir.path().join("kit").join("kick.wav");
        std::fs::write(&file, b"RIFF").unwrap();

        let fetcher = FileFetcher::new(dir.path());
        assert_eq!(fetcher.resolve("kit/kick.wav"), Some(file.clone()));

        let url = format!("file://{}", file.display());
        assert_eq!(fetcher.fetch(&url).unwrap(), b"RIFF".to_vec());
        assert!(matches!(
            fetcher.fetch("kit/snare.wav"),
            Err(DecodeError::NotFound(_))
        ));
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("https://cdn/x/take.mp3?sig=1"), Some("mp3"));
        assert_eq!(extension_of("file:///tmp/a.b/c.wav"), Some("wav"));
        assert_eq!(extension_of("/tmp/noext"), None);
        assert_eq!(extension_of("/tmp/.hidden"), None);
    }
}
