//! `extern "system"` entry points registered with ProjFS.
//!
//! Each callback decodes its arguments and forwards to the
//! [`ProjectionCallbacks`] handler stored in the instance context. Panics are
//! caught here so they never unwind into the driver.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use uuid::Uuid;
use windows::core::{GUID, HRESULT, PCWSTR};
use windows::Win32::Foundation::{BOOLEAN, ERROR_INTERNAL_ERROR, S_OK};
use windows::Win32::Storage::ProjectedFileSystem::{
    PrjFillDirEntryBuffer, PRJ_CALLBACKS, PRJ_CALLBACK_DATA, PRJ_CB_DATA_FLAG_ENUM_RESTART_SCAN,
    PRJ_DIR_ENTRY_BUFFER_HANDLE, PRJ_NOTIFICATION, PRJ_NOTIFICATION_PARAMETERS,
    PRJ_PLACEHOLDER_VERSION_INFO,
};

use crate::native::projfs::{basic_info, decode_id, to_hresult};
use crate::native::{EnumerationSink, FileDataRequest, ProjectionCallbacks};
use crate::projection::PlaceholderInfo;
use crate::util::path;
use crate::util::wstr::{pcwstr_to_option, pcwstr_to_string, to_wide_buf, WideBuf};

/// State ProjFS hands back to every callback.
pub struct CallbackContext {
    handler: Arc<dyn ProjectionCallbacks>,
}

impl CallbackContext {
    /// Wrap the engine's callback handler.
    pub fn new(handler: Arc<dyn ProjectionCallbacks>) -> Self {
        Self { handler }
    }
}

/// Sink writing entries into a ProjFS directory entry buffer.
struct DirEntryBufferSink {
    handle: PRJ_DIR_ENTRY_BUFFER_HANDLE,
}

impl EnumerationSink for DirEntryBufferSink {
    fn add(&mut self, info: &PlaceholderInfo) -> bool {
        let name: WideBuf = to_wide_buf(&info.name);
        let basic = basic_info(info);
        // SAFETY: `name` and `basic` outlive the call; the handle is valid for
        // the duration of the enumeration callback.
        unsafe { PrjFillDirEntryBuffer(PCWSTR(name.as_ptr()), Some(&basic), self.handle).is_ok() }
    }
}

fn guid_to_uuid(guid: &GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

fn guarded(callback: &'static str, f: impl FnOnce() -> HRESULT) -> HRESULT {
    std::panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        tracing::error!(callback, "callback panicked");
        HRESULT::from(ERROR_INTERNAL_ERROR)
    })
}

/// # Safety
/// `callback_data` must be the pointer ProjFS passed to a callback of an
/// instance started with a `CallbackContext` as its instance context.
unsafe fn context<'a>(callback_data: *const PRJ_CALLBACK_DATA) -> &'a CallbackContext {
    &*((*callback_data).InstanceContext as *const CallbackContext)
}

/// # Safety
/// Same contract as [`context`].
unsafe fn relative_path(callback_data: *const PRJ_CALLBACK_DATA) -> Option<String> {
    match pcwstr_to_string((*callback_data).FilePathName) {
        Ok(p) => Some(path::normalize(&p)),
        Err(e) => {
            tracing::warn!(error = %e, "undecodable callback path");
            None
        }
    }
}

unsafe extern "system" fn start_dir_enum_cb(
    callback_data: *const PRJ_CALLBACK_DATA,
    enumeration_id: *const GUID,
) -> HRESULT {
    guarded("start_enumeration", || {
        let ctx: &CallbackContext = context(callback_data);
        let Some(relative_path) = relative_path(callback_data) else {
            return HRESULT::from(ERROR_INTERNAL_ERROR);
        };
        to_hresult(ctx.handler.start_enumeration(
            (*callback_data).CommandId,
            guid_to_uuid(&*enumeration_id),
            &relative_path,
        ))
    })
}

unsafe extern "system" fn end_dir_enum_cb(
    callback_data: *const PRJ_CALLBACK_DATA,
    enumeration_id: *const GUID,
) -> HRESULT {
    guarded("end_enumeration", || {
        let ctx: &CallbackContext = context(callback_data);
        to_hresult(ctx.handler.end_enumeration(guid_to_uuid(&*enumeration_id)))
    })
}

unsafe extern "system" fn get_dir_enum_cb(
    callback_data: *const PRJ_CALLBACK_DATA,
    enumeration_id: *const GUID,
    search_expression: PCWSTR,
    dir_entry_buffer_handle: PRJ_DIR_ENTRY_BUFFER_HANDLE,
) -> HRESULT {
    guarded("get_enumeration_page", || {
        let ctx: &CallbackContext = context(callback_data);
        let filter: Option<String> = match pcwstr_to_option(search_expression) {
            Ok(filter) => filter,
            Err(_) => return HRESULT::from(ERROR_INTERNAL_ERROR),
        };
        let restart: bool =
            ((*callback_data).Flags.0 & PRJ_CB_DATA_FLAG_ENUM_RESTART_SCAN.0) != 0;
        let mut sink = DirEntryBufferSink {
            handle: dir_entry_buffer_handle,
        };

        to_hresult(ctx.handler.get_enumeration_page(
            (*callback_data).CommandId,
            guid_to_uuid(&*enumeration_id),
            filter.as_deref(),
            restart,
            &mut sink,
        ))
    })
}

unsafe extern "system" fn get_placeholder_info_cb(
    callback_data: *const PRJ_CALLBACK_DATA,
) -> HRESULT {
    guarded("get_placeholder_info", || {
        let ctx: &CallbackContext = context(callback_data);
        let Some(relative_path) = relative_path(callback_data) else {
            return HRESULT::from(ERROR_INTERNAL_ERROR);
        };
        to_hresult(
            ctx.handler
                .get_placeholder_info((*callback_data).CommandId, &relative_path),
        )
    })
}

unsafe extern "system" fn get_file_data_cb(
    callback_data: *const PRJ_CALLBACK_DATA,
    byte_offset: u64,
    length: u32,
) -> HRESULT {
    guarded("get_file_data", || {
        let ctx: &CallbackContext = context(callback_data);
        let Some(relative_path) = relative_path(callback_data) else {
            return HRESULT::from(ERROR_INTERNAL_ERROR);
        };

        let version: *const PRJ_PLACEHOLDER_VERSION_INFO = (*callback_data).VersionInfo;
        let (content_id, provider_id) = if version.is_null() {
            (Vec::new(), Vec::new())
        } else {
            (decode_id(&(*version).ContentID), decode_id(&(*version).ProviderID))
        };

        to_hresult(ctx.handler.get_file_data(FileDataRequest {
            command_id: (*callback_data).CommandId,
            relative_path,
            byte_offset,
            length,
            stream_id: guid_to_uuid(&(*callback_data).DataStreamId),
            content_id,
            provider_id,
        }))
    })
}

unsafe extern "system" fn notification_cb(
    callback_data: *const PRJ_CALLBACK_DATA,
    is_directory: BOOLEAN,
    notification: PRJ_NOTIFICATION,
    _destination_file_name: PCWSTR,
    _operation_parameters: *mut PRJ_NOTIFICATION_PARAMETERS,
) -> HRESULT {
    if let Some(relative_path) = relative_path(callback_data) {
        tracing::debug!(
            path = %relative_path,
            directory = is_directory.as_bool(),
            notification = notification.0,
            "notification"
        );
    }
    S_OK
}

unsafe extern "system" fn cancel_command_cb(callback_data: *const PRJ_CALLBACK_DATA) {
    let _ = guarded("cancel_command", || {
        let ctx: &CallbackContext = context(callback_data);
        ctx.handler.cancel_command((*callback_data).CommandId);
        S_OK
    });
}

/// Callback table passed to `PrjStartVirtualizing`.
pub fn build_callbacks() -> PRJ_CALLBACKS {
    PRJ_CALLBACKS {
        StartDirectoryEnumerationCallback: Some(start_dir_enum_cb),
        EndDirectoryEnumerationCallback: Some(end_dir_enum_cb),
        GetDirectoryEnumerationCallback: Some(get_dir_enum_cb),
        GetPlaceholderInfoCallback: Some(get_placeholder_info_cb),
        GetFileDataCallback: Some(get_file_data_cb),
        QueryFileNameCallback: None,
        NotificationCallback: Some(notification_cb),
        CancelCommandCallback: Some(cancel_command_cb),
    }
}
