//! The virtualization engine: turns native callbacks into content-source
//! lookups and reports the results back to the native layer.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::DriveError;
use crate::executor::TaskExecutor;
use crate::native::{
    BufferError, CommandId, EnumerationSink, FileDataRequest, ProjectionCallbacks,
    ProjectionLayer, ResultCode, SessionId, StreamId, WriteBuffer,
};
use crate::options::{EngineOptions, NotificationMapping};
use crate::provider::{ContentSource, VirtualFileProvider};
use crate::virtualizer::commands::CommandRegistry;
use crate::virtualizer::enumeration::ActiveEnumeration;

/// How long `stop` waits for the content source to shut down.
const SOURCE_STOP_GRACE: Duration = Duration::from_secs(10);

/// Orchestrates commands, enumeration sessions and reconciliation for one
/// virtualization root.
///
/// Created with [`VirtualizationEngine::new`] and handed to the native layer
/// by [`VirtualizationEngine::start`].
pub struct VirtualizationEngine {
    pub(crate) provider: Arc<VirtualFileProvider>,
    pub(crate) projection: Arc<dyn ProjectionLayer>,
    executor: TaskExecutor,
    commands: Arc<CommandRegistry>,
    enumerations: Arc<DashMap<SessionId, ActiveEnumeration>>,
    pub(crate) options: EngineOptions,
    started: Mutex<bool>,
}

impl VirtualizationEngine {
    /// Create an engine.
    ///
    /// # Arguments
    /// * `source` - Content source to project
    /// * `projection` - Native layer to report to
    /// * `options` - Engine configuration
    ///
    /// # Returns
    /// The engine, or an error if the background executor could not start.
    pub fn new(
        source: Arc<dyn ContentSource>,
        projection: Arc<dyn ProjectionLayer>,
        options: EngineOptions,
    ) -> Result<Arc<Self>, DriveError> {
        let executor = TaskExecutor::new(options.executor_config())?;
        let provider = Arc::new(VirtualFileProvider::new(source, options.case_sensitivity));

        Ok(Arc::new(Self {
            provider,
            commands: Arc::new(CommandRegistry::new(projection.clone())),
            projection,
            executor,
            enumerations: Arc::new(DashMap::new()),
            options,
            started: Mutex::new(false),
        }))
    }

    /// Start the content source, then begin receiving native callbacks.
    ///
    /// Must not be called from inside an async runtime.
    pub fn start(self: &Arc<Self>) -> Result<(), DriveError> {
        let mut started = self.started.lock();
        if *started {
            return Err(DriveError::AlreadyStarted);
        }

        let source: Arc<dyn ContentSource> = self.provider.source().clone();
        let mappings: Vec<NotificationMapping> = source.notification_mappings();
        let starter = source.clone();
        if let Err(e) = self.executor.block_on(async move { starter.start().await })? {
            error!(error = %e, "content source refused to start");
            return Err(e);
        }

        let handler: Arc<dyn ProjectionCallbacks> = self.clone();
        if let Err(e) = self.projection.start_virtualizing(handler, &mappings) {
            error!(error = %e, "native layer failed to start");
            let _ = self.executor.block_on(async move { source.stop().await });
            return Err(e);
        }

        *started = true;
        info!(root = %self.options.root_path.display(), "virtualization started");
        Ok(())
    }

    /// Abort outstanding commands, stop the native layer and the content source.
    ///
    /// Must not be called from inside an async runtime.
    pub fn stop(&self) -> Result<(), DriveError> {
        let mut started = self.started.lock();
        if !*started {
            return Err(DriveError::NotStarted);
        }

        self.commands.abort_all();
        self.projection.stop_virtualizing();

        let source: Arc<dyn ContentSource> = self.provider.source().clone();
        let stopping = async move { source.stop().await };
        if let Err(e) = self.executor.block_on_timeout(stopping, SOURCE_STOP_GRACE) {
            warn!(error = %e, "content source did not stop cleanly");
        }

        self.enumerations.clear();
        *started = false;
        info!(root = %self.options.root_path.display(), "virtualization stopped");
        Ok(())
    }

    /// Check if virtualization is started.
    pub fn is_started(&self) -> bool {
        *self.started.lock()
    }

    /// Provider and folder cache.
    pub fn provider(&self) -> &Arc<VirtualFileProvider> {
        &self.provider
    }

    /// Engine configuration.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Number of commands still pending.
    pub fn active_commands(&self) -> usize {
        self.commands.len()
    }

    /// Number of open enumeration sessions.
    pub fn active_enumerations(&self) -> usize {
        self.enumerations.len()
    }

    /// Register `command_id` and run `work` in the background.
    ///
    /// The task races `work` against the command's cancellation token and
    /// reports whichever finishes first. A panic inside `work` is reported as
    /// an internal error.
    fn dispatch<F, Fut>(
        &self,
        command_id: CommandId,
        operation: &'static str,
        work: F,
    ) -> ResultCode
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ResultCode> + Send + 'static,
    {
        let token: CancellationToken = match self.commands.register(command_id) {
            Ok(token) => token,
            Err(_) => return ResultCode::InternalError,
        };

        let work: Fut = work(token.clone());
        let commands: Arc<CommandRegistry> = self.commands.clone();
        let task = async move {
            let result: ResultCode = tokio::select! {
                biased;
                _ = token.cancelled() => ResultCode::Cancelled,
                outcome = AssertUnwindSafe(work).catch_unwind() => match outcome {
                    Ok(code) => code,
                    Err(_) => {
                        error!(command_id, operation, "command task panicked");
                        ResultCode::InternalError
                    }
                },
            };
            commands.complete(command_id, result);
        };

        if let Err(e) = self.executor.spawn(task) {
            error!(command_id, operation, error = %e, "failed to queue command");
            self.commands.unregister(command_id);
            return ResultCode::InternalError;
        }

        ResultCode::Pending
    }
}

impl ProjectionCallbacks for VirtualizationEngine {
    fn start_enumeration(
        &self,
        command_id: CommandId,
        session_id: SessionId,
        relative_path: &str,
    ) -> ResultCode {
        debug!(command_id, %session_id, path = relative_path, "start enumeration");

        let provider: Arc<VirtualFileProvider> = self.provider.clone();
        let enumerations = self.enumerations.clone();
        let relative_path: String = relative_path.to_string();

        self.dispatch(command_id, "start_enumeration", move |_| async move {
            match provider.find_folder(&relative_path).await {
                Ok(Some(snapshot)) => match enumerations.entry(session_id) {
                    Entry::Occupied(_) => {
                        let e = DriveError::DuplicateSession(session_id);
                        warn!(error = %e, "rejecting enumeration");
                        e.result_code()
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(ActiveEnumeration::new(snapshot));
                        ResultCode::Ok
                    }
                },
                Ok(None) => ResultCode::PathNotFound,
                Err(e) => {
                    error!(path = %relative_path, error = %e, "folder lookup failed");
                    e.result_code()
                }
            }
        })
    }

    fn end_enumeration(&self, session_id: SessionId) -> ResultCode {
        debug!(%session_id, "end enumeration");
        match self.enumerations.remove(&session_id) {
            Some(_) => ResultCode::Ok,
            None => {
                let e = DriveError::UnknownSession(session_id);
                warn!(error = %e, "end enumeration");
                e.result_code()
            }
        }
    }

    fn get_enumeration_page(
        &self,
        command_id: CommandId,
        session_id: SessionId,
        filter: Option<&str>,
        restart: bool,
        sink: &mut dyn EnumerationSink,
    ) -> ResultCode {
        debug!(command_id, %session_id, ?filter, restart, "get enumeration page");

        let Some(mut enumeration) = self.enumerations.get_mut(&session_id) else {
            let e = DriveError::UnknownSession(session_id);
            warn!(error = %e, "get enumeration page");
            return e.result_code();
        };

        if restart {
            enumeration.restart(filter);
        } else {
            enumeration.try_save_filter(filter);
        }

        let mut added: usize = 0;
        while let Some(entry) = enumeration.current() {
            if !sink.add(entry) {
                if added == 0 {
                    return ResultCode::InsufficientBuffer;
                }
                break;
            }
            enumeration.move_next();
            added += 1;
        }

        ResultCode::Ok
    }

    fn get_placeholder_info(&self, command_id: CommandId, relative_path: &str) -> ResultCode {
        debug!(command_id, path = relative_path, "get placeholder info");

        let provider: Arc<VirtualFileProvider> = self.provider.clone();
        let projection: Arc<dyn ProjectionLayer> = self.projection.clone();
        let max_id_len: usize = self.options.placeholder_id_length;
        let relative_path: String = relative_path.to_string();

        self.dispatch(command_id, "get_placeholder_info", move |_| async move {
            match provider.find_placeholder_info(&relative_path).await {
                Ok(Some(info)) => match info.validate(max_id_len) {
                    Ok(()) => projection.write_placeholder_info(&info),
                    Err(e) => {
                        error!(error = %e, "content source produced an invalid placeholder");
                        e.result_code()
                    }
                },
                Ok(None) => ResultCode::PathNotFound,
                Err(e) => {
                    error!(path = %relative_path, error = %e, "placeholder lookup failed");
                    e.result_code()
                }
            }
        })
    }

    fn get_file_data(&self, request: FileDataRequest) -> ResultCode {
        debug!(
            command_id = request.command_id,
            path = %request.relative_path,
            offset = request.byte_offset,
            length = request.length,
            "get file data"
        );

        let provider: Arc<VirtualFileProvider> = self.provider.clone();
        let projection: Arc<dyn ProjectionLayer> = self.projection.clone();
        let max_chunk: usize = self.options.max_write_chunk_size;
        let command_id: CommandId = request.command_id;

        self.dispatch(command_id, "get_file_data", move |token| async move {
            let data: Vec<u8> = match provider
                .find_placeholder_data(
                    &request.relative_path,
                    &request.content_id,
                    &request.provider_id,
                )
                .await
            {
                Ok(Some(data)) => data,
                Ok(None) => return ResultCode::PathNotFound,
                Err(e) => {
                    error!(path = %request.relative_path, error = %e, "content fetch failed");
                    return e.result_code();
                }
            };

            if request.byte_offset != 0 || data.len() as u64 != u64::from(request.length) {
                let e = DriveError::UnsupportedRange {
                    path: request.relative_path.clone(),
                    offset: request.byte_offset,
                    length: request.length,
                    content_length: data.len() as u64,
                };
                error!(error = %e, "partial file reads are not supported");
                return e.result_code();
            }

            write_file_chunks(
                projection.as_ref(),
                request.stream_id,
                request.byte_offset,
                &data,
                max_chunk,
                &token,
            )
        })
    }

    fn cancel_command(&self, command_id: CommandId) {
        debug!(command_id, "cancel command");
        self.commands.cancel(command_id);
    }
}

/// Stream `data` to the native layer in chunks of at most `max_chunk` bytes
/// through a single write buffer.
fn write_file_chunks(
    projection: &dyn ProjectionLayer,
    stream_id: StreamId,
    byte_offset: u64,
    data: &[u8],
    max_chunk: usize,
    token: &CancellationToken,
) -> ResultCode {
    if data.is_empty() {
        return ResultCode::Ok;
    }

    let chunk_size: usize = data.len().min(max_chunk.max(1));
    let buffer = projection.create_write_buffer(byte_offset, chunk_size);
    let mut buffer: Box<dyn WriteBuffer> = match buffer {
        Ok(buffer) => buffer,
        Err(BufferError::OutOfMemory) => {
            warn!(size = chunk_size, "write buffer allocation failed");
            return ResultCode::OutOfMemory;
        }
        Err(BufferError::Failed(code)) => {
            error!(?code, "write buffer creation failed");
            return ResultCode::InternalError;
        }
    };

    if buffer.as_slice().len() < chunk_size {
        error!(
            size = buffer.as_slice().len(),
            wanted = chunk_size,
            "write buffer smaller than requested"
        );
        return ResultCode::InternalError;
    }

    let mut offset: u64 = buffer.aligned_offset();
    for chunk in data.chunks(chunk_size) {
        if token.is_cancelled() {
            return ResultCode::Cancelled;
        }

        buffer.as_mut_slice()[..chunk.len()].copy_from_slice(chunk);
        let result: ResultCode =
            projection.write_file_data(stream_id, buffer.as_ref(), offset, chunk.len() as u32);
        if !result.is_ok() {
            let e = DriveError::Native {
                operation: "write_file_data",
                code: result,
            };
            error!(error = %e, offset, "file data write failed");
            return ResultCode::InternalError;
        }
        offset += chunk.len() as u64;
    }

    ResultCode::Ok
}
