//! Content source mirroring a local directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::DriveError;
use crate::projection::{FileAttributes, PlaceholderInfo};
use crate::provider::ContentSource;
use crate::util::path;

/// Projects the contents of `source_dir` into `target_dir`.
pub struct DirectoryProvider {
    source_dir: PathBuf,
    target_dir: PathBuf,
}

impl DirectoryProvider {
    /// Create a mirror provider.
    ///
    /// # Arguments
    /// * `source_dir` - Directory whose contents are projected
    /// * `target_dir` - Virtualization root
    pub fn new(source_dir: impl Into<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            target_dir: target_dir.into(),
        }
    }

    /// Directory being mirrored.
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    fn source_path(&self, relative_path: &str) -> Option<PathBuf> {
        if !path::is_contained(relative_path) {
            warn!(path = relative_path, "rejecting path outside the source directory");
            return None;
        }
        Some(
            relative_path
                .split('/')
                .filter(|component| !component.is_empty())
                .fold(self.source_dir.clone(), |acc, component| acc.join(component)),
        )
    }
}

#[async_trait]
impl ContentSource for DirectoryProvider {
    fn root_path(&self) -> &Path {
        &self.target_dir
    }

    async fn start(&self) -> Result<(), DriveError> {
        match tokio::fs::metadata(&self.source_dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(DriveError::SourceUnavailable(format!(
                "{} is not a directory",
                self.source_dir.display()
            ))),
            Err(e) => Err(DriveError::SourceUnavailable(format!(
                "{}: {}",
                self.source_dir.display(),
                e
            ))),
        }
    }

    async fn stop(&self) {}

    async fn fetch_folder(
        &self,
        relative_path: &str,
    ) -> Result<Option<Vec<PlaceholderInfo>>, DriveError> {
        let Some(dir) = self.source_path(relative_path) else {
            return Ok(None);
        };

        if !is_kind(&dir, true).await? {
            return Ok(None);
        }

        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut entries: Vec<PlaceholderInfo> = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let meta = match tokio::fs::metadata(entry.path()).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = ?entry.path(), "skipping entry with non-UTF-8 name");
                continue;
            };

            entries.push(placeholder_from_metadata(
                &path::join(relative_path, &name),
                &meta,
            ));
        }

        debug!(path = relative_path, count = entries.len(), "listed source directory");
        Ok(Some(entries))
    }

    async fn fetch_file(
        &self,
        relative_path: &str,
        _content_id: &[u8],
        _provider_id: &[u8],
    ) -> Result<Option<Vec<u8>>, DriveError> {
        let Some(file) = self.source_path(relative_path) else {
            return Ok(None);
        };

        if !is_kind(&file, false).await? {
            return Ok(None);
        }

        match tokio::fs::read(&file).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// True if `path` exists and is a directory (`want_dir`) or a file.
async fn is_kind(path: &Path, want_dir: bool) -> Result<bool, DriveError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_dir() == want_dir),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn placeholder_from_metadata(relative_path: &str, meta: &std::fs::Metadata) -> PlaceholderInfo {
    let modified: SystemTime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let created: SystemTime = meta.created().unwrap_or(modified);
    let accessed: SystemTime = meta.accessed().unwrap_or(modified);

    let info = if meta.is_dir() {
        PlaceholderInfo::directory(relative_path, modified)
    } else {
        PlaceholderInfo::file(relative_path, meta.len(), modified)
    };

    info.with_times(created, accessed, modified, modified)
        .with_attributes(attributes_from_metadata(meta))
}

#[cfg(target_os = "windows")]
fn attributes_from_metadata(meta: &std::fs::Metadata) -> FileAttributes {
    use std::os::windows::fs::MetadataExt;

    FileAttributes::from_bits_retain(meta.file_attributes())
}

#[cfg(not(target_os = "windows"))]
fn attributes_from_metadata(meta: &std::fs::Metadata) -> FileAttributes {
    let mut attributes = if meta.is_dir() {
        FileAttributes::DIRECTORY
    } else {
        FileAttributes::ARCHIVE
    };
    if meta.permissions().readonly() {
        attributes |= FileAttributes::READONLY;
    }
    attributes
}
