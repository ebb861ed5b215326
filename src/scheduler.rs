//! Deferred flush queue approximating a microtask boundary.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Task = Box<dyn FnOnce() + Send>;

/// A cooperative flush queue.
///
/// Batching combinators schedule one flush per dirty window; the store drains
/// the queue after each processed action, which makes "one action" the
/// batching boundary. For inputs unrelated to any store, the owner of the
/// scheduler drives the boundary by calling [`Scheduler::drain`] directly.
///
/// A scheduler mounted under a parent (feature composition) forwards every
/// task to the root queue so one drain covers the whole tree.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    queue: Mutex<VecDeque<Task>>,
    parent: Mutex<Option<Scheduler>>,
    draining: AtomicBool,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            inner: Arc::new(SchedulerInner {
                queue: Mutex::new(VecDeque::new()),
                parent: Mutex::new(None),
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Enqueue a task for the next drain. Forwards to the adopted parent when
    /// mounted under one.
    pub fn schedule(&self, task: Task) {
        let parent = self.inner.parent.lock().clone();
        match parent {
            Some(parent) => parent.schedule(task),
            None => self.inner.queue.lock().push_back(task),
        }
    }

    /// Run queued tasks until the queue is empty, including tasks scheduled
    /// while draining. Re-entrant drains return immediately; the outer drain
    /// picks up whatever they would have run.
    pub fn drain(&self) {
        if let Some(parent) = self.inner.parent.lock().clone() {
            return parent.drain();
        }
        if self.inner.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        loop {
            let task = self.inner.queue.lock().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
        self.inner.draining.store(false, Ordering::SeqCst);
    }

    pub fn is_empty(&self) -> bool {
        if let Some(parent) = self.inner.parent.lock().clone() {
            return parent.is_empty();
        }
        self.inner.queue.lock().is_empty()
    }

    /// Adopt a parent queue. Tasks already queued locally move to the parent.
    pub(crate) fn attach_to(&self, parent: &Scheduler) {
        let pending: Vec<Task> = {
            let mut queue = self.inner.queue.lock();
            queue.drain(..).collect()
        };
        *self.inner.parent.lock() = Some(parent.clone());
        for task in pending {
            parent.schedule(task);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_drain_runs_tasks_in_order() {
        let scheduler = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            scheduler.schedule(Box::new(move || log.lock().push(i)));
        }
        assert!(!scheduler.is_empty());
        scheduler.drain();
        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_tasks_scheduled_while_draining_run_in_same_drain() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        {
            let scheduler2 = scheduler.clone();
            let count = Arc::clone(&count);
            scheduler.schedule(Box::new(move || {
                let count = Arc::clone(&count);
                scheduler2.schedule(Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                }));
            }));
        }
        scheduler.drain();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_attached_scheduler_forwards_to_parent() {
        let root = Scheduler::new();
        let child = Scheduler::new();

        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = Arc::clone(&count);
            child.schedule(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }

        // Pending child tasks migrate on attach.
        child.attach_to(&root);
        assert!(!root.is_empty());

        {
            let count = Arc::clone(&count);
            child.schedule(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        root.drain();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
