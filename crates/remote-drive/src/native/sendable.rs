//! Thread-safe handles for ProjFS resources.

use std::ffi::c_void;

use windows::Win32::Storage::ProjectedFileSystem::PRJ_NAMESPACE_VIRTUALIZATION_CONTEXT;

/// Namespace virtualization context that may cross threads.
///
/// `PrjCompleteCommand`, `PrjWriteFileData` and the placeholder APIs are
/// documented as callable from any thread while the instance is running.
#[derive(Clone, Copy)]
pub struct SendableContext(PRJ_NAMESPACE_VIRTUALIZATION_CONTEXT);

// SAFETY: the handle is an opaque token ProjFS accepts from any thread.
unsafe impl Send for SendableContext {}
// SAFETY: see above; the handle is never dereferenced on our side.
unsafe impl Sync for SendableContext {}

impl SendableContext {
    /// Wrap a context returned by `PrjStartVirtualizing`.
    pub fn new(context: PRJ_NAMESPACE_VIRTUALIZATION_CONTEXT) -> Self {
        Self(context)
    }

    /// Get the inner context.
    pub fn inner(&self) -> PRJ_NAMESPACE_VIRTUALIZATION_CONTEXT {
        self.0
    }
}

/// Owned pointer to the callback context registered with ProjFS.
///
/// Reclaimed with `Box::from_raw` once `PrjStopVirtualizing` has returned.
pub struct ContextPtr(pub *mut c_void);

// SAFETY: the pointee is `CallbackContext`, which is Send + Sync.
unsafe impl Send for ContextPtr {}
// SAFETY: see above.
unsafe impl Sync for ContextPtr {}
