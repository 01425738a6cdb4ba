//! Content sources and the caching layer in front of them.
//!
//! A [`ContentSource`] answers "what is in this directory" and "what are the
//! bytes of this file". [`VirtualFileProvider`] wraps one with the
//! single-flight folder cache and the path lookups the engine needs.

mod cache;
mod directory;
mod null;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::DriveError;
use crate::options::NotificationMapping;
use crate::projection::{DirectorySnapshot, PlaceholderInfo};
use crate::util::{path, CaseSensitivity};

pub use cache::{FolderCache, FolderCacheGuard};
pub use directory::DirectoryProvider;
pub use null::NullProvider;

/// Backend that supplies directory listings and file content.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Local mount point this source projects into.
    fn root_path(&self) -> &Path;

    /// Connect to or validate the backend.
    ///
    /// Virtualization does not start if this fails.
    async fn start(&self) -> Result<(), DriveError>;

    /// Release backend resources.
    async fn stop(&self);

    /// Full listing of a directory.
    ///
    /// # Arguments
    /// * `relative_path` - Slash-separated directory path, empty for the root
    ///
    /// # Returns
    /// `None` if the directory does not exist.
    async fn fetch_folder(
        &self,
        relative_path: &str,
    ) -> Result<Option<Vec<PlaceholderInfo>>, DriveError>;

    /// Full content of a file.
    ///
    /// # Arguments
    /// * `relative_path` - Slash-separated file path
    /// * `content_id` - Content id recorded in the placeholder
    /// * `provider_id` - Provider id recorded in the placeholder
    ///
    /// # Returns
    /// `None` if the content is unavailable.
    async fn fetch_file(
        &self,
        relative_path: &str,
        content_id: &[u8],
        provider_id: &[u8],
    ) -> Result<Option<Vec<u8>>, DriveError>;

    /// Notification routing rules for the native layer.
    fn notification_mappings(&self) -> Vec<NotificationMapping> {
        Vec::new()
    }
}

/// Content source plus its folder cache.
pub struct VirtualFileProvider {
    source: Arc<dyn ContentSource>,
    cache: FolderCache,
}

impl VirtualFileProvider {
    /// Wrap a content source.
    ///
    /// # Arguments
    /// * `source` - Backend to fetch from
    /// * `case` - Name comparison policy for the cache
    pub fn new(source: Arc<dyn ContentSource>, case: CaseSensitivity) -> Self {
        Self {
            source,
            cache: FolderCache::new(case),
        }
    }

    /// Underlying content source.
    pub fn source(&self) -> &Arc<dyn ContentSource> {
        &self.source
    }

    /// Folder cache.
    pub fn cache(&self) -> &FolderCache {
        &self.cache
    }

    /// Resolve a directory, fetching it once on a cache miss.
    pub async fn find_folder(
        &self,
        relative_path: &str,
    ) -> Result<Option<Arc<DirectorySnapshot>>, DriveError> {
        let relative_path: String = path::normalize(relative_path);
        let source: &Arc<dyn ContentSource> = &self.source;
        self.cache
            .get_or_fetch(&relative_path, || async {
                debug!(path = %relative_path, "fetching folder");
                source.fetch_folder(&relative_path).await
            })
            .await
    }

    /// Resolve the metadata of one entry through its parent's listing.
    ///
    /// # Returns
    /// `None` if the parent directory or the entry does not exist.
    pub async fn find_placeholder_info(
        &self,
        relative_path: &str,
    ) -> Result<Option<PlaceholderInfo>, DriveError> {
        let relative_path: String = path::normalize(relative_path);
        let (parent, name) = path::split_parent(&relative_path);

        Ok(self
            .find_folder(parent)
            .await?
            .and_then(|folder| folder.find(name).cloned()))
    }

    /// Fetch file content. Not cached.
    pub async fn find_placeholder_data(
        &self,
        relative_path: &str,
        content_id: &[u8],
        provider_id: &[u8],
    ) -> Result<Option<Vec<u8>>, DriveError> {
        let relative_path: String = path::normalize(relative_path);
        self.source
            .fetch_file(&relative_path, content_id, provider_id)
            .await
    }

    /// Hold the fetch exclusion.
    pub async fn exclusive(&self) -> FolderCacheGuard<'_> {
        self.cache.lock().await
    }

    /// Drop every cached listing.
    pub async fn invalidate(&self) {
        self.exclusive().await.clear();
    }
}
