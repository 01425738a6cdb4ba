//! Registry of in-flight commands.
//!
//! Every callback that returns `Pending` registers its command id here with
//! a fresh cancellation token. Whoever removes the entry first (the finishing
//! task or a cancel request) is the one that reports completion, so each
//! command completes exactly once.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DriveError;
use crate::native::{CommandId, ProjectionLayer, ResultCode};

/// Active commands keyed by id.
pub struct CommandRegistry {
    active: DashMap<CommandId, CancellationToken>,
    projection: Arc<dyn ProjectionLayer>,
}

impl CommandRegistry {
    /// Create an empty registry reporting completions to `projection`.
    pub fn new(projection: Arc<dyn ProjectionLayer>) -> Self {
        Self {
            active: DashMap::new(),
            projection,
        }
    }

    /// Register a command.
    ///
    /// # Returns
    /// The command's cancellation token, or `DuplicateCommand` if the id is
    /// already active.
    pub fn register(&self, command_id: CommandId) -> Result<CancellationToken, DriveError> {
        match self.active.entry(command_id) {
            Entry::Occupied(_) => {
                warn!(command_id, "command id already active");
                Err(DriveError::DuplicateCommand(command_id))
            }
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(token.clone());
                Ok(token)
            }
        }
    }

    /// Drop a registration without notifying the native layer.
    ///
    /// Used when a command fails before it ever returned `Pending`.
    pub fn unregister(&self, command_id: CommandId) {
        self.active.remove(&command_id);
    }

    /// Report the result of a finished command.
    ///
    /// # Returns
    /// False if the command was already completed or cancelled.
    pub fn complete(&self, command_id: CommandId, result: ResultCode) -> bool {
        if self.active.remove(&command_id).is_none() {
            debug!(command_id, ?result, "command already finished");
            return false;
        }

        debug!(command_id, ?result, "completing command");
        self.projection.complete_command(command_id, result);
        true
    }

    /// Cancel a command at the native layer's request.
    ///
    /// Triggers the token so the task stops at its next check. The native
    /// layer is told `Cancelled`, which it treats as already finished.
    /// Unknown ids are ignored.
    pub fn cancel(&self, command_id: CommandId) -> bool {
        self.abandon(command_id, ResultCode::Cancelled)
    }

    /// Abort every active command.
    ///
    /// Unlike [`cancel`](Self::cancel) these were never cancelled by the
    /// native layer, so each one is completed with `Aborted`.
    pub fn abort_all(&self) {
        let ids: Vec<CommandId> = self.active.iter().map(|entry| *entry.key()).collect();
        for command_id in ids {
            self.abandon(command_id, ResultCode::Aborted);
        }
    }

    fn abandon(&self, command_id: CommandId, result: ResultCode) -> bool {
        let Some((_, token)) = self.active.remove(&command_id) else {
            debug!(command_id, "no active command to abandon");
            return false;
        };

        token.cancel();
        debug!(command_id, ?result, "command abandoned");
        self.projection.complete_command(command_id, result);
        true
    }

    /// Number of active commands.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Check if no commands are active.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
