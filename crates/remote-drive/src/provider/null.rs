//! Content source with nothing in it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::DriveError;
use crate::projection::PlaceholderInfo;
use crate::provider::ContentSource;

/// Projects an empty tree. Every folder is missing and file reads fail.
pub struct NullProvider {
    root_path: PathBuf,
}

impl NullProvider {
    /// Create a null provider for `root_path`.
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
        }
    }
}

#[async_trait]
impl ContentSource for NullProvider {
    fn root_path(&self) -> &Path {
        &self.root_path
    }

    async fn start(&self) -> Result<(), DriveError> {
        Ok(())
    }

    async fn stop(&self) {}

    async fn fetch_folder(
        &self,
        _relative_path: &str,
    ) -> Result<Option<Vec<PlaceholderInfo>>, DriveError> {
        Ok(None)
    }

    async fn fetch_file(
        &self,
        relative_path: &str,
        _content_id: &[u8],
        _provider_id: &[u8],
    ) -> Result<Option<Vec<u8>>, DriveError> {
        Err(DriveError::ContentSource(format!(
            "null provider has no content for {}",
            relative_path
        )))
    }
}
