//! Bounded pool of OS threads for blocking callables.
//!
//! The task queue never runs a synchronous callable on the async runtime; it hands
//! the closure to a `BlockingPool` and awaits a oneshot carrying the outcome.
//!
//! # Design
//!
//! - **Fixed thread count**: threads are spawned once, never per call
//! - **No polling**: threads block on channel recv
//! - **Clean shutdown**: dropping the sender lets each thread finish its current
//!   job, drain what is already queued, then exit

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::core::ResourceError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Receiver for the outcome of a job; `Err` carries a caught panic payload.
pub type JobReceiver<R> = oneshot::Receiver<thread::Result<R>>;

/// Fixed-size pool of named worker threads.
pub struct BlockingPool {
    thread_count: usize,
    /// Job sender. `None` once shut down.
    job_tx: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: AtomicBool,
    in_flight: Arc<AtomicUsize>,
}

impl BlockingPool {
    /// Spawn `thread_count` threads named `{name}-{index}`.
    ///
    /// # Errors
    ///
    /// - `ResourceError::InvalidConfig` if `thread_count` is zero
    /// - `ResourceError::Backend` if the OS refuses to spawn a thread
    pub fn new(thread_count: usize, name: &str) -> Result<Self, ResourceError> {
        if thread_count == 0 {
            return Err(ResourceError::InvalidConfig(
                "blocking pool needs at least one thread".into(),
            ));
        }

        let (job_tx, job_rx) = unbounded::<Job>();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let mut workers = Vec::with_capacity(thread_count);

        for index in 0..thread_count {
            match spawn_thread(format!("{name}-{index}"), job_rx.clone(), Arc::clone(&in_flight)) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Release the threads that did start before reporting.
                    drop(job_tx);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(ResourceError::Backend(format!(
                        "failed to spawn blocking thread: {e}"
                    )));
                }
            }
        }

        info!(thread_count, name, "blocking pool started");

        Ok(Self {
            thread_count,
            job_tx: Mutex::new(Some(job_tx)),
            workers: Mutex::new(workers),
            shutdown: AtomicBool::new(false),
            in_flight,
        })
    }

    /// Queue `f` on a pool thread and return a receiver for its outcome.
    ///
    /// A panic inside `f` is caught and delivered as `Err(payload)`; the thread survives.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::QueueStopped` if the pool has been shut down.
    pub fn execute<F, R>(&self, f: F) -> Result<JobReceiver<R>, ResourceError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(f));
            // The caller may have stopped listening; that is not our failure.
            let _ = tx.send(outcome);
        });

        let guard = self.job_tx.lock();
        let Some(job_tx) = guard.as_ref() else {
            return Err(ResourceError::QueueStopped);
        };
        job_tx.send(job).map_err(|_| ResourceError::QueueStopped)?;
        drop(guard);
        Ok(rx)
    }

    /// Number of threads in the pool.
    #[must_use]
    pub const fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Jobs currently executing.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Whether `shutdown` has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting jobs and block until every thread has finished its work and exited.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropping the sender unblocks every thread waiting on recv().
        self.job_tx.lock().take();

        let mut workers = self.workers.lock();
        let count = workers.len();
        for (idx, worker) in workers.drain(..).enumerate() {
            if worker.join().is_err() {
                warn!(thread = idx, "blocking thread panicked outside a job");
            } else {
                debug!(thread = idx, "blocking thread joined");
            }
        }
        info!(thread_count = count, "blocking pool shut down");
    }
}

impl Drop for BlockingPool {
    fn drop(&mut self) {
        // Signal only; joining here could hang a runtime that dropped us mid-job.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.job_tx.lock().take();
            debug!("BlockingPool dropped without explicit shutdown - threads will be detached");
        }
    }
}

fn spawn_thread(
    name: String,
    job_rx: Receiver<Job>,
    in_flight: Arc<AtomicUsize>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name).spawn(move || {
        // Sender dropped (shutdown) ends the loop once the channel is drained.
        while let Ok(job) = job_rx.recv() {
            in_flight.fetch_add(1, Ordering::AcqRel);
            job();
            in_flight.fetch_sub(1, Ordering::AcqRel);
        }
    })
}
