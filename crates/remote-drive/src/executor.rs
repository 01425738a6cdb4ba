//! Background runtime that runs callback work off the native callback threads.
//!
//! ProjFS invokes callbacks on its own thread pool. Long-running work is
//! handed to a dedicated Tokio runtime living on its own thread, so a callback
//! never calls `block_on()` from a runtime worker.
//!
//! ```text
//! ProjFS thread                  Executor thread
//! ─────────────                  ───────────────
//!     │ spawn(future) ──────────────►│ tokio::spawn
//!     │ return Pending               │ ...
//!     │                              │ complete_command()
//!     │ block_on(future) ───────────►│
//!     │ blocking_recv() ◄────────────│ send result
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long a stopping runtime waits for in-flight tasks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Failure to run work on the background runtime.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    /// Runtime stopped or no longer accepting work.
    #[error("Executor has been shut down")]
    Shutdown,
    /// Waiter released by `cancel_all`.
    #[error("Operation was cancelled")]
    Cancelled,
    /// Deadline passed before the future finished.
    #[error("Operation timed out after {duration:?}")]
    Timeout {
        /// Deadline that was applied.
        duration: Duration,
    },
    /// The future panicked.
    #[error("Task panicked during execution")]
    TaskPanicked,
    /// The runtime or its thread could not be created.
    #[error("Executor failed to start: {0}")]
    Startup(String),
}

struct WorkItem {
    work: BoxFuture<'static, ()>,
}

/// Configuration for the task executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Runtime worker threads (at least 1).
    pub worker_threads: usize,
    /// Default timeout for `block_on` (None = no timeout).
    pub default_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            default_timeout: None,
        }
    }
}

impl ExecutorConfig {
    /// Set the worker thread count.
    ///
    /// # Arguments
    /// * `worker_threads` - Number of Tokio worker threads
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads.max(1);
        self
    }

    /// Set default timeout for `block_on`.
    ///
    /// # Arguments
    /// * `timeout` - Default timeout duration (None = no timeout)
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }
}

/// Tokio runtime on a dedicated thread.
///
/// `spawn` is fire-and-forget and safe from any thread. `block_on` parks the
/// calling thread on a oneshot channel and must not be called from inside
/// the executor's own runtime.
pub struct TaskExecutor {
    tx: mpsc::UnboundedSender<WorkItem>,
    cancel_token: CancellationToken,
    thread: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    default_timeout: Option<Duration>,
}

impl TaskExecutor {
    /// Start the runtime thread.
    ///
    /// # Arguments
    /// * `config` - Executor configuration
    ///
    /// # Returns
    /// Running executor, or `Startup` if the runtime could not be built.
    pub fn new(config: ExecutorConfig) -> Result<Self, ExecutorError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkItem>();
        let cancel_token = CancellationToken::new();
        let token_clone: CancellationToken = cancel_token.clone();
        let running = Arc::new(AtomicBool::new(true));
        let running_clone: Arc<AtomicBool> = running.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();
        let worker_threads: usize = config.worker_threads.max(1);

        let thread: JoinHandle<()> = std::thread::Builder::new()
            .name("drive-executor".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(worker_threads)
                    .thread_name("drive-worker")
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        running_clone.store(false, Ordering::Release);
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                rt.block_on(async move {
                    loop {
                        tokio::select! {
                            biased;

                            _ = token_clone.cancelled() => break,
                            item = rx.recv() => match item {
                                Some(work_item) => {
                                    tokio::spawn(work_item.work);
                                }
                                None => break,
                            },
                        }
                    }
                });

                running_clone.store(false, Ordering::Release);
                rt.shutdown_timeout(SHUTDOWN_GRACE);
                debug!("executor runtime stopped");
            })
            .map_err(|e| ExecutorError::Startup(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(msg)) => {
                let _ = thread.join();
                return Err(ExecutorError::Startup(msg));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(ExecutorError::Startup("executor thread exited".to_string()));
            }
        }

        Ok(Self {
            tx,
            cancel_token,
            thread: Some(thread),
            running,
            default_timeout: config.default_timeout,
        })
    }

    /// Queue a future to run on the runtime without waiting for it.
    ///
    /// # Returns
    /// `Shutdown` if the runtime is no longer accepting work.
    pub fn spawn<F>(&self, future: F) -> Result<(), ExecutorError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_running() {
            return Err(ExecutorError::Shutdown);
        }

        self.tx
            .send(WorkItem {
                work: future.boxed(),
            })
            .map_err(|_| ExecutorError::Shutdown)
    }

    /// Run a future on the runtime and block until it finishes.
    ///
    /// Applies the configured default timeout, if any.
    pub fn block_on<F, T>(&self, future: F) -> Result<T, ExecutorError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        match self.default_timeout {
            Some(timeout) => self.block_on_timeout(future, timeout),
            None => self.run_blocking(future.map(Ok)),
        }
    }

    /// Run a future on the runtime with an explicit timeout.
    ///
    /// # Returns
    /// Ok(result) on success, Err(Timeout) if the deadline passed.
    pub fn block_on_timeout<F, T>(&self, future: F, timeout: Duration) -> Result<T, ExecutorError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_blocking(async move {
            tokio::time::timeout(timeout, future)
                .await
                .map_err(|_| ExecutorError::Timeout { duration: timeout })
        })
    }

    fn run_blocking<F, T>(&self, future: F) -> Result<T, ExecutorError>
    where
        F: Future<Output = Result<T, ExecutorError>> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel::<Result<T, ExecutorError>>();
        let token: CancellationToken = self.cancel_token.clone();

        self.spawn(async move {
            let result: Result<T, ExecutorError> = tokio::select! {
                biased;
                _ = token.cancelled() => Err(ExecutorError::Cancelled),
                result = std::panic::AssertUnwindSafe(future).catch_unwind() => {
                    result.unwrap_or(Err(ExecutorError::TaskPanicked))
                }
            };
            let _ = result_tx.send(result);
        })?;

        match result_rx.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::Shutdown),
        }
    }

    /// Stop accepting work and cancel anything waiting in `block_on`.
    pub fn cancel_all(&self) {
        if !self.cancel_token.is_cancelled() {
            debug!("cancelling executor");
        }
        self.cancel_token.cancel();
    }

    /// True while work is accepted.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.cancel_token.is_cancelled()
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.cancel_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
