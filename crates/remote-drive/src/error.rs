//! Error types for the virtualization engine.

use thiserror::Error;

use crate::executor::ExecutorError;
use crate::native::{CommandId, ResultCode, SessionId, UpdateFailureCause};

/// Errors raised by the engine, content sources and the native binding.
#[derive(Debug, Error)]
pub enum DriveError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Content source reported a failure.
    #[error("Content source error: {0}")]
    ContentSource(String),

    /// Content source has not been started or has gone away.
    #[error("Content source unavailable: {0}")]
    SourceUnavailable(String),

    /// Placeholder metadata failed validation.
    #[error("Invalid placeholder for {path}: {reason}")]
    InvalidPlaceholder {
        /// Relative path of the entry.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A command id was registered twice.
    #[error("Command {0} is already active")]
    DuplicateCommand(CommandId),

    /// An enumeration session id was started twice.
    #[error("Enumeration session {0} is already active")]
    DuplicateSession(SessionId),

    /// An enumeration callback referenced a session that was never started.
    #[error("Unknown enumeration session {0}")]
    UnknownSession(SessionId),

    /// A file data request did not cover the whole file.
    #[error("Unsupported range for {path}: offset {offset}, length {length}, content length {content_length}")]
    UnsupportedRange {
        /// Relative path of the file.
        path: String,
        /// Requested byte offset.
        offset: u64,
        /// Requested length.
        length: u32,
        /// Length of the content actually available.
        content_length: u64,
    },

    /// The native layer refused to update or delete a placeholder.
    #[error("{operation} failed for {path}: {code:?} (cause {cause:?})")]
    PlaceholderConflict {
        /// Operation attempted.
        operation: &'static str,
        /// Relative path of the entry.
        path: String,
        /// Result reported by the native layer.
        code: ResultCode,
        /// Failure cause reported by the native layer.
        cause: UpdateFailureCause,
    },

    /// ProjFS API returned a failing HRESULT.
    #[error("ProjFS API error in {operation}: HRESULT 0x{hresult:08X}")]
    ProjFsApi {
        /// API that failed.
        operation: &'static str,
        /// HRESULT error code.
        hresult: i32,
    },

    /// A projection layer call returned a non-success result.
    #[error("{operation} returned {code:?}")]
    Native {
        /// Operation that failed.
        operation: &'static str,
        /// Result returned.
        code: ResultCode,
    },

    /// Virtualization root path error.
    #[error("Invalid virtualization root path: {0}")]
    InvalidRootPath(String),

    /// Virtualization already started.
    #[error("Virtualization already started")]
    AlreadyStarted,

    /// Virtualization not started.
    #[error("Virtualization not started")]
    NotStarted,

    /// Background executor failure.
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Path conversion error (UTF-16 <-> UTF-8).
    #[error("Path conversion error: {0}")]
    PathConversion(String),
}

impl DriveError {
    /// Result code reported to the native layer when a command fails with this error.
    pub fn result_code(&self) -> ResultCode {
        match self {
            DriveError::Executor(ExecutorError::Cancelled) => ResultCode::Aborted,
            DriveError::Native { code, .. } => *code,
            _ => ResultCode::InternalError,
        }
    }
}
