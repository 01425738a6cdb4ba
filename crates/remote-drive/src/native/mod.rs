//! Boundary between the engine and the native projection layer.
//!
//! [`ProjectionCallbacks`] is what the native layer calls into;
//! [`ProjectionLayer`] is what the engine calls back out to. The Windows
//! binding implements both halves on top of ProjFS. Tests supply their own
//! recording `ProjectionLayer` and drive the callbacks directly.

use std::sync::Arc;

use bitflags::bitflags;
use uuid::Uuid;

use crate::error::DriveError;
use crate::options::NotificationMapping;
use crate::projection::PlaceholderInfo;

#[cfg(target_os = "windows")]
mod callbacks;
#[cfg(target_os = "windows")]
mod projfs;
#[cfg(target_os = "windows")]
mod sendable;

#[cfg(target_os = "windows")]
pub use projfs::ProjFsInstance;

/// Identifier of one in-flight native command.
pub type CommandId = i32;

/// Identifier of one directory enumeration session.
pub type SessionId = Uuid;

/// Identifier of the file stream a data request belongs to.
pub type StreamId = Uuid;

/// Disposition reported to the native layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// Success.
    Ok,
    /// The command will be completed later.
    Pending,
    /// The path does not exist in the backing store.
    PathNotFound,
    /// The sink could not take a single entry.
    InsufficientBuffer,
    /// A buffer could not be allocated.
    OutOfMemory,
    /// Protocol violation or unexpected fault.
    InternalError,
    /// The native layer cancelled the command; it expects no completion.
    Cancelled,
    /// The engine abandoned the command, e.g. while stopping.
    Aborted,
}

impl ResultCode {
    /// True for [`ResultCode::Ok`].
    pub fn is_ok(self) -> bool {
        self == ResultCode::Ok
    }
}

bitflags! {
    /// What an update or delete is allowed to overwrite.
    ///
    /// Bit values match `PRJ_UPDATE_TYPES`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UpdateFlags: u32 {
        /// Placeholder metadata has been modified locally.
        const ALLOW_DIRTY_METADATA = 0x0000_0001;
        /// File content has been modified locally.
        const ALLOW_DIRTY_DATA = 0x0000_0002;
        /// Entry has been deleted locally.
        const ALLOW_TOMBSTONE = 0x0000_0004;
        /// Entry is marked read-only.
        const ALLOW_READ_ONLY = 0x0000_0020;
        /// Everything above.
        const PERMISSIVE = Self::ALLOW_DIRTY_METADATA.bits()
            | Self::ALLOW_DIRTY_DATA.bits()
            | Self::ALLOW_TOMBSTONE.bits()
            | Self::ALLOW_READ_ONLY.bits();
    }
}

bitflags! {
    /// Why the native layer refused an update or delete.
    ///
    /// Bit values match `PRJ_UPDATE_FAILURE_CAUSES`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UpdateFailureCause: u32 {
        /// Metadata is dirty.
        const DIRTY_METADATA = 0x0000_0001;
        /// Data is dirty.
        const DIRTY_DATA = 0x0000_0002;
        /// Entry is a tombstone.
        const TOMBSTONE = 0x0000_0004;
        /// Entry is read-only.
        const READ_ONLY = 0x0000_0008;
    }
}

/// On-disk state of an entry below the virtualization root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OnDiskState {
    /// Nothing on disk.
    Missing,
    /// Ordinary file or directory not backed by the provider.
    Full,
    /// Placeholder (hydrated or not).
    Placeholder,
    /// Deletion marker.
    Tombstone,
}

/// Receives directory entries for one enumeration page.
pub trait EnumerationSink {
    /// Append an entry.
    ///
    /// # Returns
    /// False if the sink has no room left; the entry was not taken.
    fn add(&mut self, info: &PlaceholderInfo) -> bool;
}

/// Aligned buffer used to stream file content to the native layer.
pub trait WriteBuffer: Send {
    /// Byte offset the buffer was allocated for.
    fn aligned_offset(&self) -> u64;
    /// Buffer contents.
    fn as_slice(&self) -> &[u8];
    /// Mutable buffer contents.
    fn as_mut_slice(&mut self) -> &mut [u8];
}

/// Why a write buffer could not be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// Allocation failed.
    OutOfMemory,
    /// Any other failure.
    Failed(ResultCode),
}

impl From<BufferError> for ResultCode {
    fn from(e: BufferError) -> Self {
        match e {
            BufferError::OutOfMemory => ResultCode::OutOfMemory,
            BufferError::Failed(code) => code,
        }
    }
}

/// Arguments of a file-data callback.
#[derive(Debug, Clone)]
pub struct FileDataRequest {
    /// Command to complete.
    pub command_id: CommandId,
    /// Relative path of the file.
    pub relative_path: String,
    /// Requested byte offset.
    pub byte_offset: u64,
    /// Requested byte count.
    pub length: u32,
    /// Stream the data is written to.
    pub stream_id: StreamId,
    /// Content id recorded in the placeholder.
    pub content_id: Vec<u8>,
    /// Provider id recorded in the placeholder.
    pub provider_id: Vec<u8>,
}

/// Callbacks the native layer invokes.
///
/// Methods returning [`ResultCode::Pending`] complete later through
/// [`ProjectionLayer::complete_command`].
pub trait ProjectionCallbacks: Send + Sync {
    /// A directory is opened for listing.
    fn start_enumeration(
        &self,
        command_id: CommandId,
        session_id: SessionId,
        relative_path: &str,
    ) -> ResultCode;

    /// A listing session ends.
    fn end_enumeration(&self, session_id: SessionId) -> ResultCode;

    /// Fill one page of directory entries.
    fn get_enumeration_page(
        &self,
        command_id: CommandId,
        session_id: SessionId,
        filter: Option<&str>,
        restart: bool,
        sink: &mut dyn EnumerationSink,
    ) -> ResultCode;

    /// Metadata for one path is needed.
    fn get_placeholder_info(&self, command_id: CommandId, relative_path: &str) -> ResultCode;

    /// File content is needed.
    fn get_file_data(&self, request: FileDataRequest) -> ResultCode;

    /// The native layer gave up on a pending command.
    fn cancel_command(&self, command_id: CommandId);
}

/// Operations the engine performs against the native layer.
pub trait ProjectionLayer: Send + Sync {
    /// Begin delivering callbacks to `handler`.
    fn start_virtualizing(
        &self,
        handler: Arc<dyn ProjectionCallbacks>,
        mappings: &[NotificationMapping],
    ) -> Result<(), DriveError>;

    /// Stop delivering callbacks.
    fn stop_virtualizing(&self);

    /// Finish a command that returned `Pending`.
    fn complete_command(&self, command_id: CommandId, result: ResultCode);

    /// Create a placeholder for `info` in response to a metadata request.
    fn write_placeholder_info(&self, info: &PlaceholderInfo) -> ResultCode;

    /// Allocate a buffer for streaming file data.
    fn create_write_buffer(
        &self,
        byte_offset: u64,
        size: usize,
    ) -> Result<Box<dyn WriteBuffer>, BufferError>;

    /// Write `length` bytes from the start of `buffer` at `byte_offset`.
    fn write_file_data(
        &self,
        stream_id: StreamId,
        buffer: &dyn WriteBuffer,
        byte_offset: u64,
        length: u32,
    ) -> ResultCode;

    /// Refresh an existing placeholder with new metadata.
    fn update_file_if_needed(
        &self,
        info: &PlaceholderInfo,
        flags: UpdateFlags,
    ) -> (ResultCode, UpdateFailureCause);

    /// Remove a placeholder.
    fn delete_file(
        &self,
        relative_path: &str,
        flags: UpdateFlags,
    ) -> (ResultCode, UpdateFailureCause);

    /// Convert an ordinary directory into a placeholder directory.
    fn mark_directory_as_placeholder(&self, relative_path: &str) -> ResultCode;

    /// Inspect what currently exists on disk for a path.
    fn on_disk_state(&self, relative_path: &str) -> OnDiskState;

    /// Forget every path the native layer remembered as missing.
    fn clear_negative_path_cache(&self) -> ResultCode;
}
