//! Applying remote changes to placeholders that already exist on disk.

use std::collections::HashMap;

use tracing::{debug, error, info, warn};

use crate::error::DriveError;
use crate::native::{OnDiskState, ResultCode, UpdateFailureCause, UpdateFlags};
use crate::projection::PlaceholderInfo;
use crate::util::path;
use crate::virtualizer::engine::VirtualizationEngine;

/// One change reported by a content source's sync.
#[derive(Debug, Clone)]
pub enum RemoteChange {
    /// Entry added or modified.
    Upsert(PlaceholderInfo),
    /// Entry removed (relative path).
    Remove(String),
}

/// Outcome of [`VirtualizationEngine::apply_changes`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Placeholders updated.
    pub updated: usize,
    /// Placeholders deleted.
    pub removed: usize,
    /// Parent directories inspected for promotion.
    pub directories_checked: usize,
}

impl VirtualizationEngine {
    /// Apply a batch of remote changes.
    ///
    /// Clears the folder cache and the native negative path cache while
    /// holding the fetch exclusion, then updates or deletes each path.
    ///
    /// # Returns
    /// Counts of what was applied, or the first placeholder conflict.
    pub async fn apply_changes(
        &self,
        changes: Vec<RemoteChange>,
    ) -> Result<SyncReport, DriveError> {
        {
            let guard = self.provider.exclusive().await;
            guard.clear();
            let code: ResultCode = self.projection.clear_negative_path_cache();
            if !code.is_ok() {
                warn!(?code, "failed to clear negative path cache");
            }
        }

        let mut memo: HashMap<String, ResultCode> = HashMap::new();
        let mut report = SyncReport::default();

        for change in changes {
            match change {
                RemoteChange::Upsert(info) => {
                    info.validate(self.options.placeholder_id_length)?;
                    self.ensure_parent_promoted(&info.relative_path, &mut memo);
                    self.update_placeholder(&info)?;
                    report.updated += 1;
                }
                RemoteChange::Remove(relative_path) => {
                    self.delete_placeholder(&relative_path)?;
                    report.removed += 1;
                }
            }
        }

        report.directories_checked = memo.len();
        info!(
            updated = report.updated,
            removed = report.removed,
            directories = report.directories_checked,
            "applied remote changes"
        );
        Ok(report)
    }

    /// Refresh a placeholder, overwriting local state.
    ///
    /// # Returns
    /// `PlaceholderConflict` if the native layer refuses.
    pub fn update_placeholder(&self, info: &PlaceholderInfo) -> Result<(), DriveError> {
        let (code, cause) = self
            .projection
            .update_file_if_needed(info, UpdateFlags::PERMISSIVE);
        check_reconcile("update_placeholder", &info.relative_path, code, cause)
    }

    /// Delete a placeholder, overwriting local state.
    ///
    /// # Returns
    /// `PlaceholderConflict` if the native layer refuses.
    pub fn delete_placeholder(&self, relative_path: &str) -> Result<(), DriveError> {
        let relative_path: String = path::normalize(relative_path);
        let (code, cause) = self
            .projection
            .delete_file(&relative_path, UpdateFlags::PERMISSIVE);
        check_reconcile("delete_placeholder", &relative_path, code, cause)
    }

    /// Make sure the immediate parent of `relative_path` is a placeholder.
    ///
    /// Each parent is inspected once per `memo`. Only one level is handled.
    ///
    /// # Returns
    /// Result recorded for the parent, `Ok` for entries at the root.
    pub fn ensure_parent_promoted(
        &self,
        relative_path: &str,
        memo: &mut HashMap<String, ResultCode>,
    ) -> ResultCode {
        let relative_path: String = path::normalize(relative_path);
        let Some(parent) = path::parent(&relative_path) else {
            return ResultCode::Ok;
        };

        if let Some(code) = memo.get(parent) {
            return *code;
        }

        let code: ResultCode = self.update_placeholder_directory(parent);
        memo.insert(parent.to_string(), code);
        code
    }

    /// Bring one directory into the projection.
    ///
    /// A tombstone is deleted; an ordinary directory is marked as a
    /// placeholder; anything else is left alone.
    pub fn update_placeholder_directory(&self, relative_path: &str) -> ResultCode {
        let state: OnDiskState = self.projection.on_disk_state(relative_path);
        debug!(path = relative_path, ?state, "checking parent directory");

        match state {
            OnDiskState::Tombstone => {
                let (code, cause) = self
                    .projection
                    .delete_file(relative_path, UpdateFlags::PERMISSIVE);
                if !code.is_ok() {
                    warn!(
                        path = relative_path,
                        ?code,
                        ?cause,
                        "failed to remove directory tombstone"
                    );
                }
                code
            }
            OnDiskState::Full => self.mark_directory_as_placeholder(relative_path),
            OnDiskState::Missing | OnDiskState::Placeholder => ResultCode::Ok,
        }
    }

    /// Convert an ordinary directory into a placeholder directory.
    pub fn mark_directory_as_placeholder(&self, relative_path: &str) -> ResultCode {
        let code: ResultCode = self.projection.mark_directory_as_placeholder(relative_path);
        if !code.is_ok() {
            warn!(path = relative_path, ?code, "failed to mark directory as placeholder");
        }
        code
    }
}

fn check_reconcile(
    operation: &'static str,
    relative_path: &str,
    code: ResultCode,
    cause: UpdateFailureCause,
) -> Result<(), DriveError> {
    if code.is_ok() {
        return Ok(());
    }

    error!(
        operation,
        path = relative_path,
        ?code,
        ?cause,
        "placeholder reconciliation conflict"
    );
    Err(DriveError::PlaceholderConflict {
        operation,
        path: relative_path.to_string(),
        code,
        cause,
    })
}
