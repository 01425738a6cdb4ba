//! Shared test infrastructure: a recording projection layer, a scripted
//! content source and a bounded enumeration sink.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use remote_drive::{
    BufferError, CommandId, ContentSource, DriveError, EngineOptions, EnumerationSink,
    NotificationMapping, OnDiskState, PlaceholderInfo, ProjectionCallbacks, ProjectionLayer,
    ResultCode, StreamId, UpdateFailureCause, UpdateFlags, VirtualizationEngine, WriteBuffer,
};

// ============================================================================
// Projection layer
// ============================================================================

/// Heap buffer handed out by [`RecordingProjection`].
pub struct VecWriteBuffer {
    offset: u64,
    data: Vec<u8>,
}

impl WriteBuffer for VecWriteBuffer {
    fn aligned_offset(&self) -> u64 {
        self.offset
    }

    fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// One `write_file_data` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenChunk {
    pub stream_id: StreamId,
    pub offset: u64,
    pub data: Vec<u8>,
}

/// Projection layer that records every call.
#[derive(Default)]
pub struct RecordingProjection {
    completions: Mutex<Vec<(CommandId, ResultCode)>>,
    completed: Condvar,
    pub placeholders: Mutex<Vec<PlaceholderInfo>>,
    pub chunks: Mutex<Vec<WrittenChunk>>,
    pub buffers_created: AtomicUsize,
    pub updates: Mutex<Vec<String>>,
    pub deletes: Mutex<Vec<String>>,
    pub marked: Mutex<Vec<String>>,
    pub negative_cache_clears: AtomicUsize,
    pub disk_states: Mutex<HashMap<String, OnDiskState>>,
    pub update_result: Mutex<Option<(ResultCode, UpdateFailureCause)>>,
    pub out_of_memory: AtomicBool,
    /// Index of the `write_file_data` call that fails, if any.
    pub fail_write_at: Mutex<Option<usize>>,
    pub write_attempts: AtomicUsize,
    pub fail_start: AtomicBool,
    pub running: AtomicBool,
}

impl RecordingProjection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Block until `command_id` has been completed.
    pub fn wait_for_completion(&self, command_id: CommandId) -> ResultCode {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        let mut completions = self.completions.lock().unwrap();
        loop {
            if let Some((_, code)) = completions.iter().find(|(id, _)| *id == command_id) {
                return *code;
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            assert!(!remaining.is_zero(), "command {command_id} never completed");
            completions = self.completed.wait_timeout(completions, remaining).unwrap().0;
        }
    }

    /// Every completion reported for `command_id`.
    pub fn completions_for(&self, command_id: CommandId) -> Vec<ResultCode> {
        self.completions
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == command_id)
            .map(|(_, code)| *code)
            .collect()
    }

    pub fn set_disk_state(&self, relative_path: &str, state: OnDiskState) {
        self.disk_states
            .lock()
            .unwrap()
            .insert(relative_path.to_string(), state);
    }

    pub fn fail_updates(&self, code: ResultCode, cause: UpdateFailureCause) {
        *self.update_result.lock().unwrap() = Some((code, cause));
    }

    fn update_outcome(&self) -> (ResultCode, UpdateFailureCause) {
        self.update_result
            .lock()
            .unwrap()
            .unwrap_or((ResultCode::Ok, UpdateFailureCause::empty()))
    }
}

impl ProjectionLayer for RecordingProjection {
    fn start_virtualizing(
        &self,
        _handler: Arc<dyn ProjectionCallbacks>,
        _mappings: &[NotificationMapping],
    ) -> Result<(), DriveError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(DriveError::ProjFsApi {
                operation: "start",
                hresult: -1,
            });
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_virtualizing(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn complete_command(&self, command_id: CommandId, result: ResultCode) {
        self.completions.lock().unwrap().push((command_id, result));
        self.completed.notify_all();
    }

    fn write_placeholder_info(&self, info: &PlaceholderInfo) -> ResultCode {
        self.placeholders.lock().unwrap().push(info.clone());
        ResultCode::Ok
    }

    fn create_write_buffer(
        &self,
        byte_offset: u64,
        size: usize,
    ) -> Result<Box<dyn WriteBuffer>, BufferError> {
        if self.out_of_memory.load(Ordering::SeqCst) {
            return Err(BufferError::OutOfMemory);
        }
        self.buffers_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(VecWriteBuffer {
            offset: byte_offset,
            data: vec![0; size],
        }))
    }

    fn write_file_data(
        &self,
        stream_id: StreamId,
        buffer: &dyn WriteBuffer,
        byte_offset: u64,
        length: u32,
    ) -> ResultCode {
        let attempt: usize = self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if *self.fail_write_at.lock().unwrap() == Some(attempt) {
            return ResultCode::InternalError;
        }
        self.chunks.lock().unwrap().push(WrittenChunk {
            stream_id,
            offset: byte_offset,
            data: buffer.as_slice()[..length as usize].to_vec(),
        });
        ResultCode::Ok
    }

    fn update_file_if_needed(
        &self,
        info: &PlaceholderInfo,
        _flags: UpdateFlags,
    ) -> (ResultCode, UpdateFailureCause) {
        self.updates.lock().unwrap().push(info.relative_path.clone());
        self.update_outcome()
    }

    fn delete_file(
        &self,
        relative_path: &str,
        _flags: UpdateFlags,
    ) -> (ResultCode, UpdateFailureCause) {
        self.deletes.lock().unwrap().push(relative_path.to_string());
        self.update_outcome()
    }

    fn mark_directory_as_placeholder(&self, relative_path: &str) -> ResultCode {
        self.marked.lock().unwrap().push(relative_path.to_string());
        ResultCode::Ok
    }

    fn on_disk_state(&self, relative_path: &str) -> OnDiskState {
        self.disk_states
            .lock()
            .unwrap()
            .get(relative_path)
            .copied()
            .unwrap_or(OnDiskState::Missing)
    }

    fn clear_negative_path_cache(&self) -> ResultCode {
        self.negative_cache_clears.fetch_add(1, Ordering::SeqCst);
        ResultCode::Ok
    }
}

// ============================================================================
// Content source
// ============================================================================

/// In-memory content source with call counting.
pub struct ScriptedSource {
    root: PathBuf,
    pub folders: Mutex<HashMap<String, Vec<PlaceholderInfo>>>,
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub folder_fetches: AtomicUsize,
    pub file_fetches: AtomicUsize,
    pub fetch_delay: Mutex<Option<Duration>>,
    pub fail_fetch: AtomicBool,
    pub panic_on_fetch: AtomicBool,
    pub fail_start: AtomicBool,
    pub stopped: AtomicBool,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            root: PathBuf::from("drive"),
            folders: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            folder_fetches: AtomicUsize::new(0),
            file_fetches: AtomicUsize::new(0),
            fetch_delay: Mutex::new(None),
            fail_fetch: AtomicBool::new(false),
            panic_on_fetch: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Source with a root holding `B.txt`, `a.txt` and directory `C`.
    pub fn sample() -> Arc<Self> {
        let source = Self::new();
        source.add_folder(
            "",
            vec![
                PlaceholderInfo::file("B.txt", 3, UNIX_EPOCH),
                PlaceholderInfo::file("a.txt", 5, UNIX_EPOCH),
                PlaceholderInfo::directory("C", UNIX_EPOCH),
            ],
        );
        source.add_folder("C", vec![PlaceholderInfo::file("C/inner.bin", 4, UNIX_EPOCH)]);
        source.add_file("a.txt", b"hello".to_vec());
        source.add_file("B.txt", b"abc".to_vec());
        source
    }

    pub fn add_folder(&self, relative_path: &str, entries: Vec<PlaceholderInfo>) {
        self.folders
            .lock()
            .unwrap()
            .insert(relative_path.to_string(), entries);
    }

    pub fn add_file(&self, relative_path: &str, data: Vec<u8>) {
        self.files
            .lock()
            .unwrap()
            .insert(relative_path.to_string(), data);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    pub fn folder_fetches(&self) -> usize {
        self.folder_fetches.load(Ordering::SeqCst)
    }

    /// Apply the scripted failure modes shared by both fetches.
    fn check_fetch(&self) -> Result<(), DriveError> {
        if self.panic_on_fetch.load(Ordering::SeqCst) {
            panic!("scripted source panic");
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(DriveError::SourceUnavailable("scripted fetch failure".to_string()));
        }
        Ok(())
    }

    async fn pause(&self) {
        let delay: Option<Duration> = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ContentSource for ScriptedSource {
    fn root_path(&self) -> &Path {
        &self.root
    }

    async fn start(&self) -> Result<(), DriveError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(DriveError::SourceUnavailable("scripted failure".to_string()));
        }
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    async fn fetch_folder(
        &self,
        relative_path: &str,
    ) -> Result<Option<Vec<PlaceholderInfo>>, DriveError> {
        self.folder_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_fetch()?;
        self.pause().await;
        Ok(self.folders.lock().unwrap().get(relative_path).cloned())
    }

    async fn fetch_file(
        &self,
        relative_path: &str,
        _content_id: &[u8],
        _provider_id: &[u8],
    ) -> Result<Option<Vec<u8>>, DriveError> {
        self.file_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_fetch()?;
        self.pause().await;
        Ok(self.files.lock().unwrap().get(relative_path).cloned())
    }
}

// ============================================================================
// Enumeration sink
// ============================================================================

/// Sink that accepts at most `capacity` entries.
pub struct VecSink {
    pub names: Vec<String>,
    capacity: usize,
}

impl VecSink {
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            names: Vec::new(),
            capacity,
        }
    }
}

impl EnumerationSink for VecSink {
    fn add(&mut self, info: &PlaceholderInfo) -> bool {
        if self.names.len() >= self.capacity {
            return false;
        }
        self.names.push(info.name.to_string());
        true
    }
}

// ============================================================================
// Engine setup
// ============================================================================

/// Options with small chunks so chunking is observable.
pub fn test_options() -> EngineOptions {
    EngineOptions::new("drive")
        .with_worker_threads(2)
        .with_max_write_chunk_size(2)
}

/// Engine wired to a recording projection.
pub fn create_engine(
    source: Arc<ScriptedSource>,
    options: EngineOptions,
) -> (Arc<VirtualizationEngine>, Arc<RecordingProjection>) {
    let projection = RecordingProjection::new();
    let engine = VirtualizationEngine::new(source, projection.clone(), options).unwrap();
    (engine, projection)
}
