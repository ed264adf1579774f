//! Executors that run scheduled autosaves.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs tasks some time after they are spawned.
///
/// Contexts never expect `spawn` to run the task before returning; an
/// executor that does so anyway must not be called while holding context
/// state, which contexts guarantee.
pub trait Executor: Send + Sync {
    /// Queues a task.
    fn spawn(&self, task: Task);
}

/// A single-threaded FIFO queue driven by its owner.
///
/// Nothing runs until [`CooperativeExecutor::turn`] or
/// [`CooperativeExecutor::run_until_idle`] is called, which makes "the next
/// turn of the loop" an explicit, testable point.
///
/// ```
/// use relata_core::{CooperativeExecutor, Executor};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let executor = CooperativeExecutor::new();
/// let hits = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&hits);
/// executor.spawn(Box::new(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// }));
///
/// assert_eq!(hits.load(Ordering::SeqCst), 0);
/// assert_eq!(executor.run_until_idle(), 1);
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
#[derive(Default)]
pub struct CooperativeExecutor {
    queue: Mutex<VecDeque<Task>>,
}

impl CooperativeExecutor {
    /// Creates an empty executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs the tasks queued before this call. Tasks they spawn wait for the
    /// next turn. Returns how many ran.
    pub fn turn(&self) -> usize {
        let batch: Vec<Task> = self.queue.lock().drain(..).collect();
        let ran = batch.len();
        for task in batch {
            task();
        }
        ran
    }

    /// Runs turns until the queue is empty. Returns how many tasks ran.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.turn();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }
}

impl Executor for CooperativeExecutor {
    fn spawn(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}

impl fmt::Debug for CooperativeExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CooperativeExecutor")
            .field("pending", &self.pending())
            .finish()
    }
}
