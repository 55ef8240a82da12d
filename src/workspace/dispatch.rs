//! Callback dispatch: inline on the I/O thread, or handed to a worker pool.
//!
//! Listener and eval callbacks may call back into the workspace (for
//! example, issue a `get` from inside a change notification). Doing that on
//! the transport's I/O thread deadlocks, because `get` blocks until the I/O
//! thread delivers `ReplyFinal`. Workspaces that need callback-driven
//! interaction must therefore be constructed with a pool.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::warn;

/// A unit of callback work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Where subscription and eval callbacks run.
#[derive(Debug, Clone)]
pub enum DispatchPolicy {
    /// Run callbacks inline on the transport's I/O thread. Cheapest, but the
    /// callback must never call back into the workspace.
    Inline,
    /// Submit callbacks to a worker pool.
    Pooled(Arc<DispatchPool>),
}

impl DispatchPolicy {
    /// A pooled policy with `workers` threads.
    #[must_use]
    pub fn pooled(workers: usize) -> Self {
        Self::Pooled(Arc::new(DispatchPool::new(workers)))
    }

    /// Runs or submits `task` according to the policy.
    pub(crate) fn dispatch(&self, task: Task) {
        match self {
            Self::Inline => task(),
            Self::Pooled(pool) => pool.submit(task),
        }
    }
}

/// A worker pool with an unbounded queue.
///
/// Tasks are isolated: a panicking task is logged and its worker keeps
/// serving. Dropping the pool closes the queue, drains queued tasks and
/// joins the workers.
#[derive(Debug)]
pub struct DispatchPool {
    tx: Sender<Task>,
    workers: Vec<JoinHandle<()>>,
}

impl DispatchPool {
    /// Starts a pool with `workers` threads (at least one).
    #[must_use]
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = unbounded::<Task>();

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Task> = rx.clone();
            let thread_name = format!("canopy-dispatch-{idx}");
            let handle = thread::Builder::new()
                .name(thread_name)
                .spawn(move || {
                    while let Ok(task) = rx.recv() {
                        if catch_unwind(AssertUnwindSafe(task)).is_err() {
                            warn!("dispatched callback panicked");
                        }
                    }
                })
                .expect("failed to spawn canopy dispatch worker");
            handles.push(handle);
        }

        Self {
            tx,
            workers: handles,
        }
    }

    /// Queues a task. Silently dropped if the pool is shutting down.
    pub fn submit(&self, task: Task) {
        let _ = self.tx.send(task);
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        // Close the channel: workers drain queued tasks then exit.
        let (dummy_tx, _) = unbounded::<Task>();
        drop(std::mem::replace(&mut self.tx, dummy_tx));
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crossbeam_channel::bounded;

    #[test]
    fn test_pool_runs_tasks() {
        let pool = DispatchPool::new(2);
        let (tx, rx) = bounded::<usize>(16);
        for i in 0..8 {
            let tx = tx.clone();
            pool.submit(Box::new(move || {
                let _ = tx.send(i);
            }));
        }
        let mut seen: Vec<usize> = (0..8)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let pool = DispatchPool::new(1);
        pool.submit(Box::new(|| panic!("boom")));

        let (tx, rx) = bounded::<()>(1);
        pool.submit(Box::new(move || {
            let _ = tx.send(());
        }));
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn test_drop_drains_queued_tasks() {
        let ran = Arc::new(AtomicUsize::new(0));
        let pool = DispatchPool::new(1);
        for _ in 0..4 {
            let ran = Arc::clone(&ran);
            pool.submit(Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }
        drop(pool);
        assert_eq!(ran.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_inline_policy_runs_immediately() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        DispatchPolicy::Inline.dispatch(Box::new(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
