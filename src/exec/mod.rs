//! Execution plumbing for asynchronous notification delivery.
//!
//! The crate schedules nothing on its own hot paths; when a watcher asks
//! for asynchronous delivery, its callbacks go through a
//! [`WorkSerializer`] — a submission-ordered, one-at-a-time callable
//! queue that borrows threads from an [`Executor`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::queue::LockedMpscQueue;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs callables on some worker thread. Hosts plug in their own; the
/// crate ships [`ThreadExecutor`] as a fallback.
pub trait Executor: Send + Sync + 'static {
    fn spawn(&self, task: Task);
}

/// Thread-per-task fallback executor. Fine for tests and low-rate
/// notification traffic; hosts with real schedulers should supply their
/// own [`Executor`].
#[derive(Debug, Default)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn spawn(&self, task: Task) {
        std::thread::spawn(task);
    }
}

/// Cooperative callable queue: submitted tasks run one at a time, in
/// submission order, on an arbitrary executor thread. Two tasks never
/// overlap.
///
/// The submitter that finds the serializer idle schedules a drain; the
/// drain keeps running tasks until the pending count hits zero. Tasks are
/// counted only after their push completes, so a positive count always
/// has work reachable behind it.
pub struct WorkSerializer {
    queue: LockedMpscQueue<Task>,
    pending: AtomicUsize,
    executor: Arc<dyn Executor>,
}

impl WorkSerializer {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            queue: LockedMpscQueue::new(),
            pending: AtomicUsize::new(0),
            executor,
        }
    }

    /// Queues `task` for ordered execution. Callable from any thread.
    pub fn run(self: &Arc<Self>, task: impl FnOnce() + Send + 'static) {
        self.queue.push(Box::new(task));
        if self.pending.fetch_add(1, Ordering::AcqRel) == 0 {
            let serializer = Arc::clone(self);
            self.executor.spawn(Box::new(move || serializer.drain()));
        }
    }

    fn drain(&self) {
        loop {
            let Some(task) = self.queue.pop() else {
                // The counter is ahead of the queue only while a producer
                // is mid-push; the task lands momentarily.
                std::hint::spin_loop();
                continue;
            };
            task();
            if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                return;
            }
        }
    }
}

impl std::fmt::Debug for WorkSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkSerializer")
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .finish()
    }
}
