//! Worker thread pool executing handlers and callbacks.
//!
//! A fixed set of OS threads drains a bounded channel of tasks submitted
//! by the proxy. Handlers and callbacks therefore never run on the proxy
//! task, and a slow handler delays only its own task.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::connection::{ConnectCallback, ConnectFailureCallback, ConnectionId, ConnectionInfo};
use crate::correlator::ReplyCallback;
use crate::error::Error;
use crate::message::Message;
use crate::registry::Handler;

/// Work item executed on a worker thread.
pub(crate) enum Task {
    /// Invoke a registered command handler.
    Dispatch { handler: Handler, message: Message },
    /// Deliver a request outcome.
    ReplyCallback {
        callback: ReplyCallback,
        ok: bool,
        frames: Vec<Vec<u8>>,
    },
    /// Deliver a connect success.
    ConnectSuccess {
        callback: ConnectCallback,
        info: ConnectionInfo,
    },
    /// Deliver a connect failure.
    ConnectFailure {
        callback: ConnectFailureCallback,
        id: ConnectionId,
        error: Error,
    },
    /// Stop the receiving worker.
    Shutdown,
}

/// Fixed-size pool of worker threads.
pub(crate) struct WorkerPool {
    task_tx: Sender<Task>,
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    tasks_processed: Arc<AtomicU64>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool. `num_workers == 0` auto-detects from the CPU count.
    pub fn new(num_workers: usize, queue_capacity: usize) -> Self {
        let size = if num_workers == 0 {
            num_cpus::get()
        } else {
            num_workers
        };

        debug!("starting worker pool with {size} threads");

        let (task_tx, task_rx) = bounded(queue_capacity);
        let shutdown = Arc::new(AtomicBool::new(false));
        let tasks_processed = Arc::new(AtomicU64::new(0));

        let handles = (0..size)
            .map(|id| {
                let rx = task_rx.clone();
                let shutdown = Arc::clone(&shutdown);
                let processed = Arc::clone(&tasks_processed);
                thread::Builder::new()
                    .name(format!("courier-worker-{id}"))
                    .spawn(move || worker_loop(id, &rx, &shutdown, &processed))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            task_tx,
            handles,
            shutdown,
            tasks_processed,
            size,
        }
    }

    /// Submit a task. Blocks only if the queue is full.
    pub fn submit(&self, task: Task) {
        if self.task_tx.send(task).is_err() {
            warn!("worker pool queue disconnected; task dropped");
        }
    }

    /// Total tasks executed across all workers.
    #[allow(dead_code)]
    pub fn tasks_processed(&self) -> u64 {
        self.tasks_processed.load(Ordering::Relaxed)
    }

    /// Stop all workers after the queued tasks drain, then join them.
    pub fn shutdown(self) {
        for _ in 0..self.size {
            let _ = self.task_tx.send(Task::Shutdown);
        }
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.handles {
            if handle.join().is_err() {
                error!("worker thread panicked during shutdown");
            }
        }
        debug!("worker pool stopped");
    }
}

fn worker_loop(
    id: usize,
    rx: &Receiver<Task>,
    shutdown: &AtomicBool,
    processed: &AtomicU64,
) {
    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Task::Shutdown) => break,
            Ok(task) => {
                run_task(task);
                processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("worker {id} exiting");
}

/// Run one task, containing any panic from user code to this task.
fn run_task(task: Task) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| match task {
        Task::Dispatch { handler, message } => handler(message),
        Task::ReplyCallback { callback, ok, frames } => callback(ok, frames),
        Task::ConnectSuccess { callback, info } => callback(info),
        Task::ConnectFailure { callback, id, error } => callback(id, error),
        Task::Shutdown => unreachable!("shutdown handled by worker loop"),
    }));
    if result.is_err() {
        error!("handler or callback panicked on worker thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_tasks_run_and_pool_joins() {
        let pool = WorkerPool::new(2, 64);
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let count = Arc::clone(&count);
            pool.submit(Task::ReplyCallback {
                callback: Box::new(move |ok, frames| {
                    assert!(ok);
                    assert_eq!(frames.len(), 1);
                    count.fetch_add(1, Ordering::SeqCst);
                }),
                ok: true,
                frames: vec![b"x".to_vec()],
            });
        }
        pool.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let pool = WorkerPool::new(1, 16);
        let count = Arc::new(AtomicUsize::new(0));
        pool.submit(Task::ReplyCallback {
            callback: Box::new(|_, _| panic!("user callback panic")),
            ok: false,
            frames: vec![],
        });
        let count2 = Arc::clone(&count);
        pool.submit(Task::ReplyCallback {
            callback: Box::new(move |_, _| {
                count2.fetch_add(1, Ordering::SeqCst);
            }),
            ok: true,
            frames: vec![],
        });
        pool.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_auto_detect_size() {
        let pool = WorkerPool::new(0, 16);
        assert_eq!(pool.handles.len(), num_cpus::get());
        pool.shutdown();
    }
}
