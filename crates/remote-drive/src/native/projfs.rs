//! ProjFS implementation of [`ProjectionLayer`].

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;
use windows::core::{GUID, HRESULT, PCWSTR};
use windows::Win32::Foundation::{
    BOOLEAN, ERROR_FILE_NOT_FOUND, ERROR_INSUFFICIENT_BUFFER, ERROR_INTERNAL_ERROR,
    ERROR_IO_PENDING, ERROR_OPERATION_ABORTED, ERROR_PATH_NOT_FOUND,
    ERROR_REPARSE_POINT_ENCOUNTERED, E_OUTOFMEMORY, S_OK,
};
use windows::Win32::Storage::ProjectedFileSystem::{
    PrjAllocateAlignedBuffer, PrjClearNegativePathCache, PrjCompleteCommand, PrjDeleteFile,
    PrjFreeAlignedBuffer, PrjGetOnDiskFileState, PrjMarkDirectoryAsPlaceholder,
    PrjStartVirtualizing, PrjStopVirtualizing, PrjUpdateFileIfNeeded, PrjWriteFileData,
    PrjWritePlaceholderInfo, PRJ_FILE_BASIC_INFO, PRJ_FILE_STATE, PRJ_FILE_STATE_FULL,
    PRJ_FILE_STATE_TOMBSTONE, PRJ_FLAG_NONE, PRJ_FLAG_USE_NEGATIVE_PATH_CACHE,
    PRJ_NOTIFICATION_MAPPING, PRJ_NOTIFY_TYPES, PRJ_PLACEHOLDER_INFO,
    PRJ_STARTVIRTUALIZING_OPTIONS, PRJ_UPDATE_FAILURE_CAUSES, PRJ_UPDATE_TYPES,
};

use crate::error::DriveError;
use crate::native::callbacks::{build_callbacks, CallbackContext};
use crate::native::sendable::{ContextPtr, SendableContext};
use crate::native::{
    BufferError, CommandId, OnDiskState, ProjectionCallbacks, ProjectionLayer, ResultCode,
    StreamId, UpdateFailureCause, UpdateFlags, WriteBuffer,
};
use crate::options::{EngineOptions, NotificationMapping};
use crate::projection::PlaceholderInfo;
use crate::util::filetime::to_filetime;
use crate::util::wstr::{string_to_wide, to_wide_buf, WideBuf};

/// One ProjFS virtualization root.
pub struct ProjFsInstance {
    root_path: PathBuf,
    instance_id: Uuid,
    pool_thread_count: u32,
    concurrent_thread_count: u32,
    negative_path_cache: bool,
    context: RwLock<Option<SendableContext>>,
    callback_context: Mutex<Option<ContextPtr>>,
}

impl ProjFsInstance {
    /// Create an instance for the root configured in `options`.
    pub fn new(options: &EngineOptions) -> Self {
        Self {
            root_path: options.root_path.clone(),
            instance_id: options.instance_id,
            pool_thread_count: options.pool_thread_count,
            concurrent_thread_count: options.concurrent_thread_count,
            negative_path_cache: options.enable_negative_path_cache,
            context: RwLock::new(None),
            callback_context: Mutex::new(None),
        }
    }

    /// Virtualization root.
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn context(&self) -> Option<SendableContext> {
        *self.context.read()
    }

    fn absolute(&self, relative_path: &str) -> PathBuf {
        relative_path
            .split('/')
            .filter(|component| !component.is_empty())
            .fold(self.root_path.clone(), |acc, component| acc.join(component))
    }

    fn instance_guid(&self) -> GUID {
        GUID::from_u128(self.instance_id.as_u128())
    }
}

impl ProjectionLayer for ProjFsInstance {
    fn start_virtualizing(
        &self,
        handler: Arc<dyn ProjectionCallbacks>,
        mappings: &[NotificationMapping],
    ) -> Result<(), DriveError> {
        let mut context_slot = self.context.write();
        if context_slot.is_some() {
            return Err(DriveError::AlreadyStarted);
        }

        std::fs::create_dir_all(&self.root_path)?;
        let root: Vec<u16> = wide_path(&self.root_path)?;
        let guid: GUID = self.instance_guid();

        // SAFETY: `root` and `guid` outlive the call.
        let marked = unsafe {
            PrjMarkDirectoryAsPlaceholder(PCWSTR(root.as_ptr()), PCWSTR::null(), None, &guid)
        };
        if let Err(e) = marked {
            // Already a virtualization root from a previous session.
            if e.code() != HRESULT::from(ERROR_REPARSE_POINT_ENCOUNTERED) {
                return Err(DriveError::ProjFsApi {
                    operation: "PrjMarkDirectoryAsPlaceholder",
                    hresult: e.code().0,
                });
            }
        }

        let mapping_roots: Vec<Vec<u16>> = mappings
            .iter()
            .map(|mapping| string_to_wide(&native_path(&mapping.root)))
            .collect();
        let mut native_mappings: Vec<PRJ_NOTIFICATION_MAPPING> = mappings
            .iter()
            .zip(&mapping_roots)
            .map(|(mapping, root)| PRJ_NOTIFICATION_MAPPING {
                NotificationBitMask: PRJ_NOTIFY_TYPES(mapping.mask.bits()),
                NotificationRoot: PCWSTR(root.as_ptr()),
            })
            .collect();

        let start_options = PRJ_STARTVIRTUALIZING_OPTIONS {
            Flags: if self.negative_path_cache {
                PRJ_FLAG_USE_NEGATIVE_PATH_CACHE
            } else {
                PRJ_FLAG_NONE
            },
            PoolThreadCount: self.pool_thread_count,
            ConcurrentThreadCount: self.concurrent_thread_count,
            NotificationMappings: if native_mappings.is_empty() {
                std::ptr::null_mut()
            } else {
                native_mappings.as_mut_ptr()
            },
            NotificationMappingsCount: native_mappings.len() as u32,
        };

        let callbacks = build_callbacks();
        let ctx_ptr: *mut CallbackContext =
            Box::into_raw(Box::new(CallbackContext::new(handler)));

        // SAFETY: every pointer in `start_options` stays valid for the call;
        // `ctx_ptr` stays alive until `stop_virtualizing` reclaims it.
        let started = unsafe {
            PrjStartVirtualizing(
                PCWSTR(root.as_ptr()),
                &callbacks,
                Some(ctx_ptr as *const c_void),
                Some(&start_options),
            )
        };

        match started {
            Ok(namespace_context) => {
                *context_slot = Some(SendableContext::new(namespace_context));
                *self.callback_context.lock() = Some(ContextPtr(ctx_ptr as *mut c_void));
                tracing::info!(root = %self.root_path.display(), "ProjFS virtualization started");
                Ok(())
            }
            Err(e) => {
                // SAFETY: ProjFS did not keep the pointer.
                drop(unsafe { Box::from_raw(ctx_ptr) });
                Err(DriveError::ProjFsApi {
                    operation: "PrjStartVirtualizing",
                    hresult: e.code().0,
                })
            }
        }
    }

    fn stop_virtualizing(&self) {
        let Some(context) = self.context.write().take() else {
            return;
        };

        // SAFETY: the context came from PrjStartVirtualizing and is stopped once.
        unsafe { PrjStopVirtualizing(context.inner()) };

        if let Some(ContextPtr(ptr)) = self.callback_context.lock().take() {
            // SAFETY: created with Box::into_raw; no callbacks run after stop returns.
            drop(unsafe { Box::from_raw(ptr as *mut CallbackContext) });
        }
        tracing::info!(root = %self.root_path.display(), "ProjFS virtualization stopped");
    }

    fn complete_command(&self, command_id: CommandId, result: ResultCode) {
        // ProjFS already considers a cancelled command finished.
        if result == ResultCode::Cancelled {
            return;
        }
        let Some(context) = self.context() else {
            return;
        };

        // SAFETY: context is live while stored.
        let completed =
            unsafe { PrjCompleteCommand(context.inner(), command_id, to_hresult(result), None) };
        if let Err(e) = completed {
            tracing::warn!(command_id, hresult = e.code().0, "PrjCompleteCommand failed");
        }
    }

    fn write_placeholder_info(&self, info: &PlaceholderInfo) -> ResultCode {
        let Some(context) = self.context() else {
            return ResultCode::InternalError;
        };
        let path: WideBuf = to_wide_buf(&native_path(&info.relative_path));
        let placeholder: PRJ_PLACEHOLDER_INFO = placeholder_info(info);

        // SAFETY: all pointers are valid for the call.
        let written = unsafe {
            PrjWritePlaceholderInfo(
                context.inner(),
                PCWSTR(path.as_ptr()),
                &placeholder,
                std::mem::size_of::<PRJ_PLACEHOLDER_INFO>() as u32,
            )
        };
        from_result(written)
    }

    fn create_write_buffer(
        &self,
        byte_offset: u64,
        size: usize,
    ) -> Result<Box<dyn WriteBuffer>, BufferError> {
        let Some(context) = self.context() else {
            return Err(BufferError::Failed(ResultCode::InternalError));
        };

        // SAFETY: context is live while stored.
        let ptr: *mut c_void = unsafe { PrjAllocateAlignedBuffer(context.inner(), size) };
        if ptr.is_null() {
            return Err(BufferError::OutOfMemory);
        }

        Ok(Box::new(AlignedBuffer {
            ptr,
            len: size,
            offset: byte_offset,
        }))
    }

    fn write_file_data(
        &self,
        stream_id: StreamId,
        buffer: &dyn WriteBuffer,
        byte_offset: u64,
        length: u32,
    ) -> ResultCode {
        let Some(context) = self.context() else {
            return ResultCode::InternalError;
        };
        let data = buffer.as_slice();
        if (length as usize) > data.len() {
            return ResultCode::InternalError;
        }
        let stream: GUID = GUID::from_u128(stream_id.as_u128());

        // SAFETY: `data` points into a buffer from PrjAllocateAlignedBuffer.
        let written = unsafe {
            PrjWriteFileData(
                context.inner(),
                &stream,
                data.as_ptr() as *const c_void,
                byte_offset,
                length,
            )
        };
        from_result(written)
    }

    fn update_file_if_needed(
        &self,
        info: &PlaceholderInfo,
        flags: UpdateFlags,
    ) -> (ResultCode, UpdateFailureCause) {
        let Some(context) = self.context() else {
            return (ResultCode::InternalError, UpdateFailureCause::empty());
        };
        let path: WideBuf = to_wide_buf(&native_path(&info.relative_path));
        let placeholder: PRJ_PLACEHOLDER_INFO = placeholder_info(info);
        let mut cause = PRJ_UPDATE_FAILURE_CAUSES(0);

        // SAFETY: all pointers are valid for the call.
        let updated = unsafe {
            PrjUpdateFileIfNeeded(
                context.inner(),
                PCWSTR(path.as_ptr()),
                &placeholder,
                std::mem::size_of::<PRJ_PLACEHOLDER_INFO>() as u32,
                PRJ_UPDATE_TYPES(flags.bits()),
                Some(&mut cause),
            )
        };
        (
            from_result(updated),
            UpdateFailureCause::from_bits_truncate(cause.0 as u32),
        )
    }

    fn delete_file(
        &self,
        relative_path: &str,
        flags: UpdateFlags,
    ) -> (ResultCode, UpdateFailureCause) {
        let Some(context) = self.context() else {
            return (ResultCode::InternalError, UpdateFailureCause::empty());
        };
        let path: WideBuf = to_wide_buf(&native_path(relative_path));
        let mut cause = PRJ_UPDATE_FAILURE_CAUSES(0);

        // SAFETY: all pointers are valid for the call.
        let deleted = unsafe {
            PrjDeleteFile(
                context.inner(),
                PCWSTR(path.as_ptr()),
                PRJ_UPDATE_TYPES(flags.bits()),
                Some(&mut cause),
            )
        };
        (
            from_result(deleted),
            UpdateFailureCause::from_bits_truncate(cause.0 as u32),
        )
    }

    fn mark_directory_as_placeholder(&self, relative_path: &str) -> ResultCode {
        let root: Vec<u16> = match wide_path(&self.root_path) {
            Ok(root) => root,
            Err(_) => return ResultCode::InternalError,
        };
        let target: Vec<u16> = match wide_path(&self.absolute(relative_path)) {
            Ok(target) => target,
            Err(_) => return ResultCode::InternalError,
        };
        let guid: GUID = self.instance_guid();

        // SAFETY: all pointers are valid for the call.
        let marked = unsafe {
            PrjMarkDirectoryAsPlaceholder(
                PCWSTR(root.as_ptr()),
                PCWSTR(target.as_ptr()),
                None,
                &guid,
            )
        };
        from_result(marked)
    }

    fn on_disk_state(&self, relative_path: &str) -> OnDiskState {
        let path: Vec<u16> = match wide_path(&self.absolute(relative_path)) {
            Ok(path) => path,
            Err(_) => return OnDiskState::Missing,
        };

        // SAFETY: `path` outlives the call.
        match unsafe { PrjGetOnDiskFileState(PCWSTR(path.as_ptr())) } {
            Ok(state) => disk_state(state),
            Err(_) => OnDiskState::Missing,
        }
    }

    fn clear_negative_path_cache(&self) -> ResultCode {
        let Some(context) = self.context() else {
            return ResultCode::InternalError;
        };
        let mut cleared: u32 = 0;

        // SAFETY: context is live while stored.
        let result = unsafe { PrjClearNegativePathCache(context.inner(), Some(&mut cleared)) };
        tracing::debug!(entries = cleared, "cleared negative path cache");
        from_result(result)
    }
}

impl Drop for ProjFsInstance {
    fn drop(&mut self) {
        self.stop_virtualizing();
    }
}

/// Buffer from `PrjAllocateAlignedBuffer`, freed on drop.
struct AlignedBuffer {
    ptr: *mut c_void,
    len: usize,
    offset: u64,
}

// SAFETY: the buffer is plain memory owned exclusively by this value.
unsafe impl Send for AlignedBuffer {}

impl WriteBuffer for AlignedBuffer {
    fn aligned_offset(&self) -> u64 {
        self.offset
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is a live allocation of `len` bytes.
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `ptr` is a live allocation of `len` bytes, uniquely borrowed.
        unsafe { std::slice::from_raw_parts_mut(self.ptr as *mut u8, self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated by PrjAllocateAlignedBuffer and freed once.
        unsafe { PrjFreeAlignedBuffer(self.ptr) };
    }
}

/// HRESULT reported to ProjFS for a result code.
pub(crate) fn to_hresult(code: ResultCode) -> HRESULT {
    match code {
        ResultCode::Ok => S_OK,
        ResultCode::Pending => HRESULT::from(ERROR_IO_PENDING),
        ResultCode::PathNotFound => HRESULT::from(ERROR_FILE_NOT_FOUND),
        ResultCode::InsufficientBuffer => HRESULT::from(ERROR_INSUFFICIENT_BUFFER),
        ResultCode::OutOfMemory => E_OUTOFMEMORY,
        ResultCode::InternalError => HRESULT::from(ERROR_INTERNAL_ERROR),
        ResultCode::Cancelled | ResultCode::Aborted => HRESULT::from(ERROR_OPERATION_ABORTED),
    }
}

fn from_hresult(hr: HRESULT) -> ResultCode {
    if hr == S_OK {
        ResultCode::Ok
    } else if hr == HRESULT::from(ERROR_FILE_NOT_FOUND)
        || hr == HRESULT::from(ERROR_PATH_NOT_FOUND)
    {
        ResultCode::PathNotFound
    } else if hr == HRESULT::from(ERROR_INSUFFICIENT_BUFFER) {
        ResultCode::InsufficientBuffer
    } else if hr == E_OUTOFMEMORY {
        ResultCode::OutOfMemory
    } else if hr == HRESULT::from(ERROR_IO_PENDING) {
        ResultCode::Pending
    } else if hr == HRESULT::from(ERROR_OPERATION_ABORTED) {
        ResultCode::Aborted
    } else {
        ResultCode::InternalError
    }
}

fn from_result(result: windows::core::Result<()>) -> ResultCode {
    match result {
        Ok(()) => ResultCode::Ok,
        Err(e) => from_hresult(e.code()),
    }
}

fn disk_state(state: PRJ_FILE_STATE) -> OnDiskState {
    if state.0 & PRJ_FILE_STATE_TOMBSTONE.0 != 0 {
        OnDiskState::Tombstone
    } else if state.0 & PRJ_FILE_STATE_FULL.0 != 0 {
        OnDiskState::Full
    } else if state.0 != 0 {
        OnDiskState::Placeholder
    } else {
        OnDiskState::Missing
    }
}

/// Relative path with the separators ProjFS expects.
fn native_path(relative_path: &str) -> String {
    crate::util::path::normalize(relative_path).replace('/', "\\")
}

fn wide_path(path: &Path) -> Result<Vec<u16>, DriveError> {
    path.to_str()
        .map(string_to_wide)
        .ok_or_else(|| DriveError::InvalidRootPath(format!("{:?}", path)))
}

/// Basic info block shared by enumeration entries and placeholders.
pub(crate) fn basic_info(info: &PlaceholderInfo) -> PRJ_FILE_BASIC_INFO {
    PRJ_FILE_BASIC_INFO {
        IsDirectory: BOOLEAN(u8::from(info.is_directory)),
        FileSize: if info.is_directory { 0 } else { info.size as i64 },
        CreationTime: to_filetime(info.creation_time),
        LastAccessTime: to_filetime(info.last_access_time),
        LastWriteTime: to_filetime(info.last_write_time),
        ChangeTime: to_filetime(info.change_time),
        FileAttributes: info.attributes.bits(),
    }
}

fn placeholder_info(info: &PlaceholderInfo) -> PRJ_PLACEHOLDER_INFO {
    let mut placeholder = PRJ_PLACEHOLDER_INFO {
        FileBasicInfo: basic_info(info),
        ..Default::default()
    };
    encode_id(&mut placeholder.VersionInfo.ContentID, &info.content_id);
    encode_id(&mut placeholder.VersionInfo.ProviderID, &info.provider_id);
    placeholder
}

/// Store an id in a fixed-size ProjFS id field as `[len, bytes.., 0..]`.
///
/// ProjFS zero-pads the field, so the length byte is what keeps ids that
/// end in zero bytes intact.
fn encode_id(dest: &mut [u8], id: &[u8]) {
    let len: usize = id.len().min(dest.len().saturating_sub(1));
    if let Some(first) = dest.first_mut() {
        *first = len as u8;
    }
    dest[1..=len].copy_from_slice(&id[..len]);
}

/// Inverse of [`encode_id`] for the ids ProjFS hands back to callbacks.
pub(crate) fn decode_id(field: &[u8]) -> Vec<u8> {
    match field.split_first() {
        Some((&len, rest)) => rest[..(len as usize).min(rest.len())].to_vec(),
        None => Vec::new(),
    }
}
