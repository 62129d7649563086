//! Background execution for the heavier operations.
//!
//! A `WorkerPool` owns a handful of named threads pulling boxed jobs off a
//! shared channel. Components never submit to the pool directly; each one
//! holds a `TaskScope`, which tags its jobs with a cancellation flag so
//! `release()` can drop everything still queued for that component without
//! touching work submitted by others.
//!
//! Results come back through a `TaskHandle`, a one-shot channel the caller
//! can block on (`wait`), poll (`try_get`) or simply drop.
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

static SHARED: Lazy<Arc<WorkerPool>> = Lazy::new(|| Arc::new(WorkerPool::new(0)));

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    threads: usize,
}

impl WorkerPool {
    /// Spawn a pool with `threads` workers. 0 picks a count from the
    /// available parallelism, capped at 4 (the workload is short bursts).
    pub fn new(threads: usize) -> Self {
        let threads = if threads == 0 {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(4)
        } else {
            threads
        };

        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut spawned = 0;
        for i in 0..threads {
            let rx = Arc::clone(&rx);
            let res = thread::Builder::new()
                .name(format!("wordpredict-worker-{i}"))
                .spawn(move || worker_loop(rx));
            match res {
                Ok(_) => spawned += 1,
                Err(e) => warn!(error = %e, "failed to spawn prediction worker"),
            }
        }
        debug!(threads = spawned, "worker pool started");

        Self {
            sender: Mutex::new(Some(tx)),
            threads: spawned,
        }
    }

    /// Process-wide pool used by components built without an explicit one.
    pub fn shared() -> Arc<WorkerPool> {
        Arc::clone(&SHARED)
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Create a cancellation scope bound to this pool.
    pub fn scope(self: &Arc<Self>) -> TaskScope {
        TaskScope {
            pool: Arc::clone(self),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn submit(&self, job: Job) -> Result<(), Job> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(job).map_err(|e| e.0),
            None => Err(job),
        }
    }

    /// Stop accepting work. Queued jobs still run; worker threads exit once
    /// the queue drains.
    pub fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .finish()
    }
}

fn worker_loop(rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        let job = {
            let guard = rx.lock().unwrap_or_else(PoisonError::into_inner);
            guard.recv()
        };
        match job {
            Ok(job) => {
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
                    warn!("background job panicked");
                }
            }
            Err(_) => break,
        }
    }
}

/// A group of jobs that can be cancelled together.
#[derive(Clone)]
pub struct TaskScope {
    pool: Arc<WorkerPool>,
    cancelled: Arc<AtomicBool>,
}

impl TaskScope {
    /// Submit `f` to the pool. The returned handle yields `None` if the scope
    /// was cancelled before the job started, or if the job panicked.
    pub fn spawn<T, F>(&self, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel::<T>(1);
        if self.is_cancelled() {
            return TaskHandle { rx };
        }
        let cancelled = Arc::clone(&self.cancelled);
        let job: Job = Box::new(move || {
            if cancelled.load(Ordering::Acquire) {
                return;
            }
            let _ = tx.send(f());
        });
        if let Err(job) = self.pool.submit(job) {
            // Pool is shut down: run inline so callers still get an answer.
            job();
        }
        TaskHandle { rx }
    }

    /// Cancel every job of this scope that has not started yet. Subsequent
    /// `spawn` calls return handles that resolve to `None` immediately.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for TaskScope {
    fn default() -> Self {
        WorkerPool::shared().scope()
    }
}

impl std::fmt::Debug for TaskScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScope")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Pending result of a background job.
pub struct TaskHandle<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block until the job finishes. `None` means it was cancelled.
    pub fn wait(self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Non-blocking poll.
    pub fn try_get(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    #[test]
    fn spawn_returns_result() {
        let pool = Arc::new(WorkerPool::new(2));
        let scope = pool.scope();
        let h = scope.spawn(|| 21 * 2);
        assert_eq!(h.wait(), Some(42));
    }

    #[test]
    fn cancelled_scope_drops_queued_jobs() {
        let pool = Arc::new(WorkerPool::new(1));
        let scope = pool.scope();

        // Block the single worker so the next job stays queued.
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let blocker = pool.scope().spawn(move || {
            let _ = release_rx.recv();
        });
        let queued = scope.spawn(|| 1);
        scope.cancel();
        release_tx.send(()).unwrap();

        assert_eq!(blocker.wait(), Some(()));
        assert_eq!(queued.wait(), None);
        assert_eq!(scope.spawn(|| 2).wait(), None);
    }

    #[test]
    fn shutdown_pool_runs_inline() {
        let pool = Arc::new(WorkerPool::new(1));
        let scope = pool.scope();
        pool.shutdown();
        assert_eq!(scope.spawn(|| "inline").wait(), Some("inline"));
    }
}
