//! Placeholder metadata shared by snapshots, cursors and the native layer.

use std::sync::Arc;
use std::time::SystemTime;

use bitflags::bitflags;

use crate::error::DriveError;

bitflags! {
    /// Win32 file attribute bits carried by a placeholder.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FileAttributes: u32 {
        /// Read-only.
        const READONLY = 0x0000_0001;
        /// Hidden.
        const HIDDEN = 0x0000_0002;
        /// System.
        const SYSTEM = 0x0000_0004;
        /// Directory.
        const DIRECTORY = 0x0000_0010;
        /// Archive.
        const ARCHIVE = 0x0000_0020;
        /// No other attributes set.
        const NORMAL = 0x0000_0080;
        /// Reparse point.
        const REPARSE_POINT = 0x0000_0400;
        /// Offline.
        const OFFLINE = 0x0000_1000;
        /// Excluded from content indexing.
        const NOT_CONTENT_INDEXED = 0x0000_2000;
        /// Recall on open.
        const RECALL_ON_OPEN = 0x0004_0000;
        /// Recall on data access.
        const RECALL_ON_DATA_ACCESS = 0x0040_0000;

        // Keep unknown bits reported by the OS.
        const _ = !0;
    }
}

/// Description of one projected file or directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaceholderInfo {
    /// Leaf name (Arc to avoid cloning on every page).
    pub name: Arc<str>,
    /// Slash-separated path from the virtualization root.
    pub relative_path: String,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Whether this is a directory.
    pub is_directory: bool,
    /// Creation time.
    pub creation_time: SystemTime,
    /// Last access time.
    pub last_access_time: SystemTime,
    /// Last write time.
    pub last_write_time: SystemTime,
    /// Change time.
    pub change_time: SystemTime,
    /// Attribute mask.
    pub attributes: FileAttributes,
    /// Opaque content identity.
    pub content_id: Vec<u8>,
    /// Opaque provider identity.
    pub provider_id: Vec<u8>,
}

impl PlaceholderInfo {
    /// Create info for a file.
    ///
    /// # Arguments
    /// * `relative_path` - Path from the virtualization root
    /// * `size` - File size in bytes
    /// * `mtime` - Used for all four timestamps
    pub fn file(relative_path: &str, size: u64, mtime: SystemTime) -> Self {
        Self::new(relative_path, size, false, mtime, FileAttributes::ARCHIVE)
    }

    /// Create info for a directory.
    ///
    /// # Arguments
    /// * `relative_path` - Path from the virtualization root
    /// * `mtime` - Used for all four timestamps
    pub fn directory(relative_path: &str, mtime: SystemTime) -> Self {
        Self::new(relative_path, 0, true, mtime, FileAttributes::DIRECTORY)
    }

    fn new(
        relative_path: &str,
        size: u64,
        is_directory: bool,
        mtime: SystemTime,
        attributes: FileAttributes,
    ) -> Self {
        let relative_path: String = crate::util::path::normalize(relative_path);
        let name: Arc<str> = Arc::from(crate::util::path::split_parent(&relative_path).1);
        Self {
            name,
            size,
            is_directory,
            creation_time: mtime,
            last_access_time: mtime,
            last_write_time: mtime,
            change_time: mtime,
            attributes,
            content_id: Vec::new(),
            provider_id: Vec::new(),
            relative_path,
        }
    }

    /// Set the attribute mask, keeping the directory bit consistent with `is_directory`.
    pub fn with_attributes(mut self, attributes: FileAttributes) -> Self {
        self.attributes = attributes;
        self.attributes.set(FileAttributes::DIRECTORY, self.is_directory);
        self
    }

    /// Set the four timestamps.
    pub fn with_times(
        mut self,
        creation: SystemTime,
        last_access: SystemTime,
        last_write: SystemTime,
        change: SystemTime,
    ) -> Self {
        self.creation_time = creation;
        self.last_access_time = last_access;
        self.last_write_time = last_write;
        self.change_time = change;
        self
    }

    /// Set the content and provider identity tags.
    pub fn with_ids(mut self, content_id: Vec<u8>, provider_id: Vec<u8>) -> Self {
        self.content_id = content_id;
        self.provider_id = provider_id;
        self
    }

    /// Check the invariants the native layer relies on.
    ///
    /// # Arguments
    /// * `max_id_len` - Longest content/provider id the native layer accepts
    ///
    /// # Returns
    /// `InvalidPlaceholder` if the directory flag disagrees with the
    /// attributes or an id is too long.
    pub fn validate(&self, max_id_len: usize) -> Result<(), DriveError> {
        if self.attributes.contains(FileAttributes::DIRECTORY) != self.is_directory {
            return Err(self.invalid("directory attribute does not match entry kind"));
        }
        if self.content_id.len() > max_id_len {
            return Err(self.invalid(&format!(
                "content id is {} bytes, limit {}",
                self.content_id.len(),
                max_id_len
            )));
        }
        if self.provider_id.len() > max_id_len {
            return Err(self.invalid(&format!(
                "provider id is {} bytes, limit {}",
                self.provider_id.len(),
                max_id_len
            )));
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> DriveError {
        DriveError::InvalidPlaceholder {
            path: self.relative_path.clone(),
            reason: reason.to_string(),
        }
    }
}
