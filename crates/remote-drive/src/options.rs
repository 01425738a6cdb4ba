//! Configuration options for the virtualization engine.

use std::path::PathBuf;
use std::time::Duration;

use bitflags::bitflags;
use uuid::Uuid;

use crate::executor::ExecutorConfig;
use crate::util::CaseSensitivity;

/// Largest chunk handed to a single file-data write.
pub const MAX_FILE_STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Maximum length of a content or provider id.
///
/// ProjFS id fields are 128 bytes; the first one holds the id length.
pub const PLACEHOLDER_ID_LENGTH: usize = 127;

/// Configuration for [`VirtualizationEngine`](crate::VirtualizationEngine).
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Virtualization root path.
    pub root_path: PathBuf,

    /// Instance id (unique per mount).
    pub instance_id: Uuid,

    /// Number of worker threads for the background executor.
    pub worker_threads: usize,

    /// Timeout for blocking lifecycle calls (`start`/`stop`).
    pub default_timeout: Option<Duration>,

    /// ProjFS pool thread count (0 = let ProjFS decide).
    pub pool_thread_count: u32,

    /// ProjFS concurrent thread count (0 = let ProjFS decide).
    pub concurrent_thread_count: u32,

    /// Largest chunk written per file-data write.
    pub max_write_chunk_size: usize,

    /// Name comparison policy for snapshots and filters.
    pub case_sensitivity: CaseSensitivity,

    /// Maximum content/provider id length.
    pub placeholder_id_length: usize,

    /// Let the native layer remember paths reported missing.
    pub enable_negative_path_cache: bool,
}

impl EngineOptions {
    /// Create options with specified root path.
    ///
    /// # Arguments
    /// * `root_path` - Virtualization root directory
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            instance_id: Uuid::new_v4(),
            worker_threads: 4,
            default_timeout: None,
            pool_thread_count: 0,
            concurrent_thread_count: 0,
            max_write_chunk_size: MAX_FILE_STREAM_BUFFER_SIZE,
            case_sensitivity: CaseSensitivity::Insensitive,
            placeholder_id_length: PLACEHOLDER_ID_LENGTH,
            enable_negative_path_cache: false,
        }
    }

    /// Set worker thread count.
    ///
    /// # Arguments
    /// * `count` - Number of worker threads
    pub fn with_worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count;
        self
    }

    /// Set default timeout for lifecycle calls.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the ProjFS thread pool sizes.
    ///
    /// # Arguments
    /// * `pool` - Pool thread count
    /// * `concurrent` - Concurrent thread count
    pub fn with_thread_counts(mut self, pool: u32, concurrent: u32) -> Self {
        self.pool_thread_count = pool;
        self.concurrent_thread_count = concurrent;
        self
    }

    /// Set the maximum file-data chunk size. Zero is treated as one byte.
    pub fn with_max_write_chunk_size(mut self, size: usize) -> Self {
        self.max_write_chunk_size = size.max(1);
        self
    }

    /// Set the name comparison policy.
    pub fn with_case_sensitivity(mut self, case: CaseSensitivity) -> Self {
        self.case_sensitivity = case;
        self
    }

    /// Set the maximum content/provider id length, capped at [`PLACEHOLDER_ID_LENGTH`].
    pub fn with_placeholder_id_length(mut self, len: usize) -> Self {
        self.placeholder_id_length = len.min(PLACEHOLDER_ID_LENGTH);
        self
    }

    /// Enable or disable the native negative path cache.
    pub fn with_negative_path_cache(mut self, enabled: bool) -> Self {
        self.enable_negative_path_cache = enabled;
        self
    }

    /// Set the instance id.
    pub fn with_instance_id(mut self, id: Uuid) -> Self {
        self.instance_id = id;
        self
    }

    /// Get executor configuration.
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::default()
            .with_worker_threads(self.worker_threads)
            .with_default_timeout(self.default_timeout)
    }
}

bitflags! {
    /// Notifications a content source asks the native layer to deliver.
    ///
    /// Bit values match `PRJ_NOTIFY_TYPES`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NotificationMask: u32 {
        /// Suppress all notifications under the mapping root.
        const SUPPRESS = 0x0000_0001;
        /// File handle opened.
        const FILE_OPENED = 0x0000_0002;
        /// New file or directory created.
        const NEW_FILE_CREATED = 0x0000_0004;
        /// Existing file overwritten or superseded.
        const FILE_OVERWRITTEN = 0x0000_0008;
        /// Pre-delete notification (can veto).
        const PRE_DELETE = 0x0000_0010;
        /// Pre-rename notification (can veto).
        const PRE_RENAME = 0x0000_0020;
        /// Pre-hardlink notification (can veto).
        const PRE_SET_HARDLINK = 0x0000_0040;
        /// File renamed.
        const FILE_RENAMED = 0x0000_0080;
        /// Hardlink created.
        const HARDLINK_CREATED = 0x0000_0100;
        /// Handle closed without modification.
        const FILE_HANDLE_CLOSED_NO_MODIFICATION = 0x0000_0200;
        /// Handle closed after modification.
        const FILE_HANDLE_CLOSED_FILE_MODIFIED = 0x0000_0400;
        /// Handle closed and the file deleted.
        const FILE_HANDLE_CLOSED_FILE_DELETED = 0x0000_0800;
        /// Placeholder about to be converted to a full file.
        const FILE_PRE_CONVERT_TO_FULL = 0x0000_1000;
    }
}

impl NotificationMask {
    /// Mask tracking every local modification.
    pub fn for_writable() -> Self {
        Self::NEW_FILE_CREATED
            | Self::FILE_OVERWRITTEN
            | Self::FILE_RENAMED
            | Self::FILE_HANDLE_CLOSED_FILE_MODIFIED
            | Self::FILE_HANDLE_CLOSED_FILE_DELETED
    }

    /// Mask for a read-only projection (no notifications).
    pub fn for_readonly() -> Self {
        Self::empty()
    }
}

/// Routes a notification mask to a subtree of the virtualization root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMapping {
    /// Relative path of the subtree, empty for the whole root.
    pub root: String,
    /// Notifications to deliver for that subtree.
    pub mask: NotificationMask,
}

impl NotificationMapping {
    /// Create a mapping.
    pub fn new(root: impl Into<String>, mask: NotificationMask) -> Self {
        Self {
            root: root.into(),
            mask,
        }
    }
}
