//! Projected virtual filesystem engine.
//!
//! Directory listings and file contents below a virtualization root are
//! materialized on demand from a pluggable [`ContentSource`]. The native
//! projection layer (ProjFS on Windows) raises callbacks; the engine answers
//! them asynchronously and reports completion exactly once per command.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: ProjFsInstance (native binding, Windows only)
//! Layer 2: VirtualizationEngine (commands, enumeration sessions, reconciliation)
//! Layer 1: VirtualFileProvider (single-flight folder cache)
//! Layer 0: ContentSource (DirectoryProvider, NullProvider, ...)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use remote_drive::{DirectoryProvider, EngineOptions, ProjFsInstance, VirtualizationEngine};
//!
//! let options = EngineOptions::new("C:\\drive");
//! let source = Arc::new(DirectoryProvider::new("C:\\source", "C:\\drive"));
//! let projection = Arc::new(ProjFsInstance::new(&options));
//! let engine = VirtualizationEngine::new(source, projection, options)?;
//! engine.start()?;
//! ```

mod error;
mod executor;
mod native;
mod options;
mod projection;
mod provider;
mod util;
mod virtualizer;

pub use error::DriveError;
pub use executor::{ExecutorConfig, ExecutorError, TaskExecutor};
pub use native::{
    BufferError, CommandId, EnumerationSink, FileDataRequest, OnDiskState, ProjectionCallbacks,
    ProjectionLayer, ResultCode, SessionId, StreamId, UpdateFailureCause, UpdateFlags,
    WriteBuffer,
};
pub use options::{
    EngineOptions, NotificationMapping, NotificationMask, MAX_FILE_STREAM_BUFFER_SIZE,
    PLACEHOLDER_ID_LENGTH,
};
pub use projection::{DirectorySnapshot, FileAttributes, PlaceholderInfo};
pub use provider::{
    ContentSource, DirectoryProvider, FolderCache, FolderCacheGuard, NullProvider,
    VirtualFileProvider,
};
pub use util::CaseSensitivity;
pub use virtualizer::{
    ActiveEnumeration, CommandRegistry, RemoteChange, SyncReport, VirtualizationEngine,
};

#[cfg(target_os = "windows")]
pub use native::ProjFsInstance;

/// Check if ProjFS is available on this system.
///
/// # Returns
/// True on Windows, where ProjFS ships as an optional feature (Windows 10
/// 1809+). Starting virtualization fails at runtime if it is not enabled.
#[cfg(target_os = "windows")]
pub fn projfs_available() -> bool {
    true
}

/// Check if ProjFS is available on this system.
///
/// # Returns
/// Always false on non-Windows platforms.
#[cfg(not(target_os = "windows"))]
pub fn projfs_available() -> bool {
    false
}
