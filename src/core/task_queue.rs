//! Priority task queue drained by a fixed set of async workers.
//!
//! Work units are either futures, run on the tokio runtime, or blocking closures,
//! handed to a [`BlockingPool`] so they never stall a runtime thread. Each unit is
//! ordered by `(priority, submission time)` and yields its result, error or panic
//! through a [`TaskHandle`]. A failing unit never takes its worker down.
//!
//! Lifecycle:
//!
//! ```text
//! start(n) ──► n workers poll the heap
//! submit ────► wait for a free slot, push, wake one worker
//! stop() ────► reject submits, wait for queued + running units, stop workers,
//!              join blocking threads
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::TaskQueueConfig;
use crate::core::blocking_pool::BlockingPool;
use crate::core::{ResourceError, TaskError};
use crate::infra::queue::PriorityQueue;
use crate::util::serde::{Priority, TaskId};

type BoxFuture = Pin<Box<dyn Future<Output = bool> + Send + 'static>>;

/// Type-erased unit of work. Resolves to `true` when the callable succeeded.
type TaskFn = Box<dyn FnOnce(&BlockingPool) -> BoxFuture + Send + 'static>;

struct QueuedTask {
    id: TaskId,
    run: TaskFn,
}

/// Awaitable result of a submitted unit of work.
///
/// Dropping the handle does not cancel the work; its result is discarded.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: TaskId,
    priority: Priority,
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    /// Queue-unique identifier of the task.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Priority the task was submitted with.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TaskError::Abandoned)))
    }
}

/// Queue counters and live sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Worker loops started by the last `start`.
    pub max_workers: usize,
    /// Whether the queue accepts submissions.
    pub running: bool,
    /// Units waiting in the heap.
    pub queue_size: usize,
    /// Units accepted since creation.
    pub submitted: u64,
    /// Units whose callable succeeded.
    pub completed: u64,
    /// Units whose callable failed or panicked.
    pub failed: u64,
    /// Units queued or executing.
    pub pending: usize,
}

struct Shared {
    heap: Mutex<PriorityQueue<QueuedTask>>,
    /// Free queue capacity; submitters wait here when the heap is full.
    slots: Semaphore,
    /// One permit per unit in the heap.
    ready: Semaphore,
    /// Flipped under the `heap` lock so `stop` never misses a racing submit.
    accepting: AtomicBool,
    /// Cleared by `stop` once the heap has drained; idle workers exit on their next poll.
    running: AtomicBool,
    /// Queued plus executing units.
    unfinished: AtomicUsize,
    drained: Notify,
    next_id: AtomicU64,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Shared {
    fn finish(&self, succeeded: bool) {
        if succeeded {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if self.unfinished.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }
}

struct Workers {
    handles: Vec<JoinHandle<()>>,
    blocking: Arc<BlockingPool>,
}

/// Bounded priority queue executed by async workers.
pub struct AsyncTaskQueue {
    config: TaskQueueConfig,
    shared: Arc<Shared>,
    workers: Mutex<Option<Workers>>,
    worker_count: AtomicUsize,
}

impl AsyncTaskQueue {
    /// Create a stopped queue.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: TaskQueueConfig) -> Result<Self, ResourceError> {
        config.validate().map_err(ResourceError::InvalidConfig)?;
        Ok(Self {
            shared: Arc::new(Shared {
                heap: Mutex::new(PriorityQueue::with_capacity(config.max_queue_size)),
                slots: Semaphore::new(config.max_queue_size),
                ready: Semaphore::new(0),
                accepting: AtomicBool::new(false),
                running: AtomicBool::new(false),
                unfinished: AtomicUsize::new(0),
                drained: Notify::new(),
                next_id: AtomicU64::new(1),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            worker_count: AtomicUsize::new(config.max_workers),
            config,
            workers: Mutex::new(None),
        })
    }

    /// Start `num_workers` worker loops (configured `max_workers` when `None`).
    ///
    /// No-op if already running. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `ResourceError::InvalidConfig` if `num_workers` is zero
    /// - `ResourceError::Backend` if there is no runtime or the blocking pool cannot start
    pub fn start(&self, num_workers: Option<usize>) -> Result<(), ResourceError> {
        let count = num_workers.unwrap_or(self.config.max_workers);
        if count == 0 {
            return Err(ResourceError::InvalidConfig(
                "task queue needs at least one worker".into(),
            ));
        }

        let mut workers = self.workers.lock();
        if workers.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ResourceError::Backend(format!("task queue needs a tokio runtime: {e}")))?;
        let blocking = Arc::new(BlockingPool::new(
            self.config.blocking_threads,
            "resource-blocking",
        )?);

        self.shared.running.store(true, Ordering::Release);
        {
            let _heap = self.shared.heap.lock();
            self.shared.accepting.store(true, Ordering::Release);
        }

        let poll = self.config.poll_timeout();
        let handles = (0..count)
            .map(|index| {
                runtime.spawn(worker_loop(
                    index,
                    Arc::clone(&self.shared),
                    Arc::clone(&blocking),
                    poll,
                ))
            })
            .collect();

        self.worker_count.store(count, Ordering::Release);
        *workers = Some(Workers { handles, blocking });
        info!(
            workers = count,
            blocking_threads = self.config.blocking_threads,
            max_queue_size = self.config.max_queue_size,
            "task queue started"
        );
        Ok(())
    }

    /// Queue a future and return a handle to its result.
    ///
    /// Waits for a free slot while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::QueueStopped` if the queue is not running.
    pub async fn submit_async<Fut, T>(
        &self,
        fut: Fut,
        priority: Priority,
    ) -> Result<TaskHandle<T>, ResourceError>
    where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let run: TaskFn = Box::new(move |_blocking: &BlockingPool| -> BoxFuture {
            Box::pin(async move {
                let outcome = match tokio::spawn(fut).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(TaskError::Failed(e)),
                    Err(join) if join.is_panic() => {
                        Err(TaskError::from_panic(join.into_panic().as_ref()))
                    }
                    Err(_) => Err(TaskError::Abandoned),
                };
                deliver(id, tx, outcome)
            })
        });

        self.enqueue(QueuedTask { id, run }, priority).await?;
        Ok(TaskHandle { id, priority, rx })
    }

    /// Queue a blocking closure and return a handle to its result.
    ///
    /// The closure runs on the blocking pool, never on a runtime thread.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::QueueStopped` if the queue is not running.
    pub async fn submit_blocking<F, T>(
        &self,
        f: F,
        priority: Priority,
    ) -> Result<TaskHandle<T>, ResourceError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let run: TaskFn = Box::new(move |blocking: &BlockingPool| -> BoxFuture {
            let job = blocking.execute(f);
            Box::pin(async move {
                let outcome = match job {
                    Ok(job) => match job.await {
                        Ok(Ok(Ok(value))) => Ok(value),
                        Ok(Ok(Err(e))) => Err(TaskError::Failed(e)),
                        Ok(Err(panic)) => Err(TaskError::from_panic(panic.as_ref())),
                        Err(_) => Err(TaskError::Abandoned),
                    },
                    Err(_) => Err(TaskError::Abandoned),
                };
                deliver(id, tx, outcome)
            })
        });

        self.enqueue(QueuedTask { id, run }, priority).await?;
        Ok(TaskHandle { id, priority, rx })
    }

    async fn enqueue(&self, task: QueuedTask, priority: Priority) -> Result<(), ResourceError> {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err(ResourceError::QueueStopped);
        }

        let permit = self
            .shared
            .slots
            .acquire()
            .await
            .map_err(|_| ResourceError::QueueStopped)?;

        let id = task.id;
        {
            let mut heap = self.shared.heap.lock();
            // Re-checked under the lock; dropping the permit returns the slot.
            if !self.shared.accepting.load(Ordering::Acquire) {
                return Err(ResourceError::QueueStopped);
            }
            permit.forget();
            self.shared.unfinished.fetch_add(1, Ordering::AcqRel);
            heap.push(priority, task);
        }
        self.shared.ready.add_permits(1);
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);

        debug!(task_id = id, priority = %priority, "task submitted");
        Ok(())
    }

    /// Wait until every queued and executing unit has finished.
    pub async fn join(&self) {
        loop {
            // Registered before the check so a concurrent notify is not lost.
            let drained = self.shared.drained.notified();
            if self.shared.unfinished.load(Ordering::Acquire) == 0 {
                return;
            }
            drained.await;
        }
    }

    /// Stop accepting work, finish everything already queued, then stop the workers
    /// and join the blocking threads. No-op if not running.
    pub async fn stop(&self) {
        if self.workers.lock().is_none() {
            return;
        }

        {
            let _heap = self.shared.heap.lock();
            self.shared.accepting.store(false, Ordering::Release);
        }
        info!(
            pending = self.shared.unfinished.load(Ordering::Acquire),
            "task queue stopping, draining pending tasks"
        );
        self.join().await;
        self.shared.running.store(false, Ordering::Release);

        let taken = self.workers.lock().take();
        let Some(workers) = taken else {
            return;
        };
        for handle in workers.handles {
            handle.abort();
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!("task worker panicked");
                }
            }
        }

        let blocking = workers.blocking;
        if tokio::task::spawn_blocking(move || blocking.shutdown())
            .await
            .is_err()
        {
            warn!("blocking pool shutdown did not complete");
        }
        info!("task queue stopped");
    }

    /// Whether the queue accepts submissions.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Queue configuration.
    #[must_use]
    pub const fn config(&self) -> &TaskQueueConfig {
        &self.config
    }

    /// Counters and live sizes.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            max_workers: self.worker_count.load(Ordering::Acquire),
            running: self.is_running(),
            queue_size: self.shared.heap.lock().len(),
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            pending: self.shared.unfinished.load(Ordering::Acquire),
        }
    }
}

impl Drop for AsyncTaskQueue {
    fn drop(&mut self) {
        // Queued units are dropped with the heap; their handles resolve to `Abandoned`.
        if let Some(workers) = self.workers.get_mut().take() {
            for handle in &workers.handles {
                handle.abort();
            }
            debug!("task queue dropped without stop - workers aborted");
        }
    }
}

async fn worker_loop(index: usize, shared: Arc<Shared>, blocking: Arc<BlockingPool>, poll: Duration) {
    debug!(worker = index, "task worker started");

    loop {
        let permit = match tokio::time::timeout(poll, shared.ready.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => break,
            Err(_elapsed) => {
                if shared.running.load(Ordering::Acquire) {
                    continue;
                }
                break;
            }
        };
        permit.forget();

        let popped = shared.heap.lock().pop();
        let Some((priority, task)) = popped else {
            continue;
        };
        shared.slots.add_permits(1);

        debug!(worker = index, task_id = task.id, priority = %priority, "task started");
        let succeeded = (task.run)(blocking.as_ref()).await;
        shared.finish(succeeded);
    }

    debug!(worker = index, "task worker exiting");
}

fn deliver<T>(
    task_id: TaskId,
    tx: oneshot::Sender<Result<T, TaskError>>,
    outcome: Result<T, TaskError>,
) -> bool {
    let succeeded = outcome.is_ok();
    match &outcome {
        Ok(_) => debug!(task_id, "task completed"),
        Err(e) => error!(task_id, error = %e, "task failed"),
    }
    if tx.send(outcome).is_err() {
        debug!(task_id, "task handle dropped before completion");
    }
    succeeded
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    async fn explode() -> anyhow::Result<()> {
        panic!("worker boom")
    }

    fn queue(workers: usize) -> AsyncTaskQueue {
        let q = AsyncTaskQueue::new(
            TaskQueueConfig::new()
                .with_max_workers(workers)
                .with_blocking_threads(2),
        )
        .unwrap();
        q.start(None).unwrap();
        q
    }

    #[tokio::test]
    async fn test_submit_requires_start() {
        let q = AsyncTaskQueue::new(TaskQueueConfig::new()).unwrap();
        let err = q
            .submit_blocking(|| Ok(1), Priority::NORMAL)
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::QueueStopped));
    }

    #[tokio::test]
    async fn test_async_and_blocking_results() {
        let q = queue(2);
        let a = q
            .submit_async(async { Ok::<_, anyhow::Error>(40 + 2) }, Priority::NORMAL)
            .await
            .unwrap();
        let b = q
            .submit_blocking(|| Ok(String::from("done")), Priority::HIGHEST)
            .await
            .unwrap();
        assert_eq!(a.await.unwrap(), 42);
        assert_eq!(b.await.unwrap(), "done");
        q.stop().await;
    }

    #[tokio::test]
    async fn test_failure_and_panic_do_not_kill_worker() {
        let q = queue(1);
        let failing = q
            .submit_blocking(|| -> anyhow::Result<()> { Err(anyhow!("bad input")) }, Priority::NORMAL)
            .await
            .unwrap();
        let panicking = q.submit_async(explode(), Priority::NORMAL).await.unwrap();
        let after = q.submit_blocking(|| Ok(1u8), Priority::NORMAL).await.unwrap();

        assert!(matches!(failing.await, Err(TaskError::Failed(_))));
        assert!(matches!(panicking.await, Err(TaskError::Panicked(ref m)) if m == "worker boom"));
        assert_eq!(after.await.unwrap(), 1);

        let stats = q.stats();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.completed, 1);
        q.stop().await;
    }

    #[tokio::test]
    async fn test_priority_order_with_single_worker() {
        let q = queue(1);
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let order = Arc::new(Mutex::new(Vec::new()));

        let gate = q
            .submit_blocking(
                move || {
                    let _ = gate_rx.recv();
                    Ok(())
                },
                Priority::HIGHEST,
            )
            .await
            .unwrap();
        // Let the worker pick up the gate before queuing the rest.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut handles = Vec::new();
        for (label, priority) in [("low", 9u8), ("critical", 0), ("normal", 5), ("high", 1)] {
            let order = Arc::clone(&order);
            handles.push(
                q.submit_blocking(
                    move || {
                        order.lock().push(label);
                        Ok(())
                    },
                    Priority(priority),
                )
                .await
                .unwrap(),
            );
        }

        gate_tx.send(()).unwrap();
        gate.await.unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec!["critical", "high", "normal", "low"]);
        q.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drains_then_rejects() {
        let q = queue(2);
        let mut handles = Vec::new();
        for i in 0..5u32 {
            handles.push(
                q.submit_async(
                    async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(i)
                    },
                    Priority::NORMAL,
                )
                .await
                .unwrap(),
            );
        }

        q.stop().await;
        let stats = q.stats();
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.pending, 0);
        assert!(!stats.running);
        for handle in handles {
            assert!(handle.await.is_ok());
        }

        assert!(matches!(
            q.submit_blocking(|| Ok(()), Priority::NORMAL).await,
            Err(ResourceError::QueueStopped)
        ));
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let q = queue(1);
        q.stop().await;
        q.start(Some(3)).unwrap();
        assert_eq!(q.stats().max_workers, 3);
        let h = q.submit_blocking(|| Ok(5), Priority::LOWEST).await.unwrap();
        assert_eq!(h.await.unwrap(), 5);
        q.stop().await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let q = queue(2);
        q.start(Some(8)).unwrap();
        assert_eq!(q.stats().max_workers, 2);
        q.stop().await;
        q.stop().await;
    }
}
