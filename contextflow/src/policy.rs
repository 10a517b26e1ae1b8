//! Admission-controlled task execution.
//!
//! The [`PolicyExecutor`] is the "where tasks run" half of a managed
//! executor: a bounded facility that accepts already-wrapped tasks, runs
//! each at most once on a worker thread, and applies admission control at
//! submission time. Concurrency is bounded by a semaphore
//! ([`PolicyExecutorConfig::max_async`] permits); tasks that cannot start
//! immediately wait in a bounded queue
//! ([`PolicyExecutorConfig::max_queue`]); a queued task that cannot begin
//! within [`PolicyExecutorConfig::start_timeout`] resolves its handle with
//! [`TaskError::StartTimeout`] without ever starting.
//!
//! Submission never blocks the submitting thread: the hand-off is
//! asynchronous, and the returned [`TaskHandle`] is the caller's join point.
//! Task bodies run on the blocking pool, so a task stays on one worker
//! thread for its entire execution.

use crate::errors::{SubmitError, SubmitResult, TaskError, TaskResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Semaphore};
use tokio::time::timeout;
use tracing::debug;

/// Configuration for a [`PolicyExecutor`].
#[derive(Debug, Clone)]
pub struct PolicyExecutorConfig {
    /// Maximum number of tasks running concurrently.
    pub max_async: usize,
    /// Maximum number of admitted tasks waiting to start. With a capacity
    /// of zero, a task that cannot start immediately is rejected.
    pub max_queue: usize,
    /// How long a queued task may wait before it is failed with
    /// [`TaskError::StartTimeout`]. `None` waits indefinitely.
    pub start_timeout: Option<Duration>,
}

impl Default for PolicyExecutorConfig {
    fn default() -> Self {
        Self {
            max_async: 8,
            max_queue: 1024,
            start_timeout: None,
        }
    }
}

/// A bounded executor for wrapped tasks.
///
/// Shared by all submitting threads of a managed executor; all state is
/// internally synchronized.
pub struct PolicyExecutor {
    config: PolicyExecutorConfig,
    permits: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    shut_down: Arc<AtomicBool>,
    runtime: Handle,
}

impl PolicyExecutor {
    /// Creates an executor on the current Tokio runtime.
    ///
    /// Panics if called outside a Tokio runtime context.
    pub fn new(config: PolicyExecutorConfig) -> Self {
        Self::with_runtime(config, Handle::current())
    }

    /// Creates an executor on an explicit runtime handle.
    pub fn with_runtime(config: PolicyExecutorConfig, runtime: Handle) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_async));
        Self {
            config,
            permits,
            queued: Arc::new(AtomicUsize::new(0)),
            shut_down: Arc::new(AtomicBool::new(false)),
            runtime,
        }
    }

    /// The configuration this executor enforces.
    pub const fn config(&self) -> &PolicyExecutorConfig {
        &self.config
    }

    /// Number of admitted tasks currently waiting to start.
    pub fn queue_depth(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Submits a wrapped task for execution at most once.
    ///
    /// Returns immediately: either a handle to the task's eventual result,
    /// or a [`SubmitError`] if admission control rejects the task. A
    /// rejected or shut-down submission never runs the task and has no
    /// partial side effects.
    pub fn submit<T, F>(&self, task: F) -> SubmitResult<TaskHandle<T>>
    where
        F: FnOnce() -> TaskResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(SubmitError::ShutDown);
        }

        // Fast path: a concurrency permit is free right now, skip the queue.
        let permit = self.permits.clone().try_acquire_owned().ok();
        if permit.is_none() {
            let claimed = self
                .queued
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |waiting| {
                    (waiting < self.config.max_queue).then_some(waiting + 1)
                });
            if claimed.is_err() {
                debug!(capacity = self.config.max_queue, "task rejected: queue full");
                return Err(SubmitError::QueueFull {
                    capacity: self.config.max_queue,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let permits = Arc::clone(&self.permits);
        let queued = Arc::clone(&self.queued);
        let start_timeout = self.config.start_timeout;

        self.runtime.spawn(async move {
            let permit = match permit {
                Some(permit) => permit,
                None => {
                    let acquired = match start_timeout {
                        Some(window) => match timeout(window, permits.acquire_owned()).await {
                            Ok(acquired) => acquired,
                            Err(_elapsed) => {
                                queued.fetch_sub(1, Ordering::SeqCst);
                                let _ = tx.send(Err(TaskError::StartTimeout { waited: window }));
                                return;
                            }
                        },
                        None => permits.acquire_owned().await,
                    };
                    queued.fetch_sub(1, Ordering::SeqCst);
                    match acquired {
                        Ok(permit) => permit,
                        // Semaphore closed: the executor shut down while
                        // this task was queued.
                        Err(_closed) => {
                            let _ = tx.send(Err(TaskError::Cancelled));
                            return;
                        }
                    }
                }
            };

            if flag.load(Ordering::SeqCst) {
                drop(permit);
                let _ = tx.send(Err(TaskError::Cancelled));
                return;
            }

            let joined = tokio::task::spawn_blocking(task).await;
            drop(permit);
            let result = joined.unwrap_or_else(|join_error| {
                if join_error.is_panic() {
                    Err(TaskError::from_panic(join_error.into_panic()))
                } else {
                    Err(TaskError::Cancelled)
                }
            });
            let _ = tx.send(result);
        });

        Ok(TaskHandle { rx, cancelled })
    }

    /// Shuts the executor down.
    ///
    /// New submissions are rejected with [`SubmitError::ShutDown`]; tasks
    /// still waiting to start resolve their handles with
    /// [`TaskError::Cancelled`]; tasks already running complete normally.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();
        debug!("policy executor shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for PolicyExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyExecutor")
            .field("config", &self.config)
            .field("queue_depth", &self.queue_depth())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// A handle to a submitted task's eventual result.
///
/// Awaiting the handle is the caller's synchronous join point. Dropping the
/// handle detaches from the task without cancelling it.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<TaskResult<T>>,
    cancelled: Arc<AtomicBool>,
}

impl<T> TaskHandle<T> {
    /// Requests cancellation.
    ///
    /// A task that has not started yet will never start and resolves with
    /// [`TaskError::Cancelled`]. A task already running is not interrupted;
    /// cancellation after start is cooperative.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = TaskResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|received| match received {
            Ok(result) => result,
            // Sender dropped without a result: the runtime was torn down.
            Err(_) => Err(TaskError::Cancelled),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn config(max_async: usize, max_queue: usize) -> PolicyExecutorConfig {
        PolicyExecutorConfig {
            max_async,
            max_queue,
            start_timeout: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn runs_a_task_and_returns_its_result() {
        let executor = PolicyExecutor::new(config(2, 8));
        let handle = executor.submit(|| Ok(21 * 2)).unwrap();
        assert_eq!(handle.await, Ok(42));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_max_async() {
        let executor = PolicyExecutor::new(config(2, 16));
        let running = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let handle = executor
                .submit(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(30));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
            handles.push(handle);
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rejects_when_queue_is_full() {
        let executor = PolicyExecutor::new(config(1, 0));
        let (release, held) = std::sync::mpsc::channel::<()>();

        let blocker = executor
            .submit(move || {
                held.recv().ok();
                Ok(())
            })
            .unwrap();
        // Give the first task time to claim the only permit.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let rejected = executor.submit(|| Ok(()));
        assert_eq!(
            rejected.map(|_| ()),
            Err(SubmitError::QueueFull { capacity: 0 })
        );

        release.send(()).unwrap();
        blocker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn queued_task_times_out_without_starting() {
        let executor = PolicyExecutor::new(PolicyExecutorConfig {
            max_async: 1,
            max_queue: 4,
            start_timeout: Some(Duration::from_millis(40)),
        });
        let started = Arc::new(AtomicBool::new(false));

        let blocker = executor
            .submit(|| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let flag = Arc::clone(&started);
        let queued = executor
            .submit(move || {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        assert!(matches!(queued.await, Err(TaskError::StartTimeout { .. })));
        assert!(!started.load(Ordering::SeqCst));
        blocker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancel_before_start_prevents_the_task() {
        let executor = PolicyExecutor::new(config(1, 4));
        let started = Arc::new(AtomicBool::new(false));

        let blocker = executor
            .submit(|| {
                std::thread::sleep(Duration::from_millis(100));
                Ok(())
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let flag = Arc::clone(&started);
        let queued = executor
            .submit(move || {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        queued.cancel();

        assert_eq!(queued.await, Err(TaskError::Cancelled));
        assert!(!started.load(Ordering::SeqCst));
        blocker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_rejects_new_work_and_cancels_queued_work() {
        let executor = PolicyExecutor::new(config(1, 4));

        let blocker = executor
            .submit(|| {
                std::thread::sleep(Duration::from_millis(80));
                Ok(())
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let queued = executor.submit(|| Ok(())).unwrap();
        executor.shutdown();

        assert_eq!(
            executor.submit(|| Ok(())).map(|_| ()),
            Err(SubmitError::ShutDown)
        );
        assert_eq!(queued.await, Err(TaskError::Cancelled));
        blocker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn panicking_task_surfaces_as_panicked() {
        let executor = PolicyExecutor::new(config(2, 8));
        let handle = executor.submit(|| -> TaskResult<()> { panic!("boom") }).unwrap();
        match handle.await {
            Err(TaskError::Panicked(message)) => assert!(message.contains("boom")),
            other => panic!("expected Panicked, got {other:?}"),
        }
    }
}
