//! Virtual-clock scheduler
//!
//! All deferred work in Rill (debounce windows, delays, deferred `next`
//! dispatch) goes through a [`Scheduler`]. Time is virtual: it only moves when
//! the host calls [`Scheduler::advance`] or [`Scheduler::run_until_idle`].
//! Tasks due at the same instant run in the order they were scheduled.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::rc::Rc;

use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Handle to a scheduled task
    pub struct TaskId;
}

/// Default cap on tasks executed by a single `run_until_idle` call.
pub const DEFAULT_TASK_LIMIT: usize = 100_000;

type Task = Box<dyn FnOnce()>;

struct Inner {
    now: u64,
    seq: u64,
    queue: BinaryHeap<Reverse<(u64, u64, TaskId)>>,
    tasks: SlotMap<TaskId, Task>,
    task_limit: usize,
}

/// Shared handle to a single-threaded task queue with a virtual clock.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<RefCell<Inner>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_task_limit(DEFAULT_TASK_LIMIT)
    }

    /// Create a scheduler whose `run_until_idle` stops after `limit` tasks.
    pub fn with_task_limit(limit: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                now: 0,
                seq: 0,
                queue: BinaryHeap::new(),
                tasks: SlotMap::with_key(),
                task_limit: limit.max(1),
            })),
        }
    }

    /// Current virtual time in milliseconds.
    pub fn now(&self) -> u64 {
        self.inner.borrow().now
    }

    /// Number of tasks still waiting.
    pub fn pending(&self) -> usize {
        self.inner.borrow().tasks.len()
    }

    /// Run `task` once `delay_ms` of virtual time has passed.
    pub fn schedule<F>(&self, delay_ms: u64, task: F) -> TaskId
    where
        F: FnOnce() + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let due = inner.now + delay_ms;
        let seq = inner.seq;
        inner.seq += 1;
        let id = inner.tasks.insert(Box::new(task));
        inner.queue.push(Reverse((due, seq, id)));
        id
    }

    /// Cancel a pending task. Returns false if it already ran.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.inner.borrow_mut().tasks.remove(id).is_some()
    }

    /// Pop the earliest task due at or before `deadline`, moving the clock to it.
    fn pop_due(&self, deadline: Option<u64>) -> Option<Task> {
        let mut inner = self.inner.borrow_mut();
        loop {
            let Reverse((due, _, id)) = *inner.queue.peek()?;
            if deadline.is_some_and(|deadline| due > deadline) {
                return None;
            }
            inner.queue.pop();
            if let Some(task) = inner.tasks.remove(id) {
                if due > inner.now {
                    inner.now = due;
                }
                return Some(task);
            }
        }
    }

    /// Move the clock forward by `ms`, running every task that falls due.
    ///
    /// Returns the number of tasks executed.
    pub fn advance(&self, ms: u64) -> usize {
        let deadline = self.now() + ms;
        let mut ran = 0;
        while let Some(task) = self.pop_due(Some(deadline)) {
            task();
            ran += 1;
        }
        self.inner.borrow_mut().now = deadline;
        ran
    }

    /// Run tasks due at the current instant without moving the clock.
    pub fn flush(&self) -> usize {
        self.advance(0)
    }

    /// Run until the queue is empty, moving the clock as needed.
    ///
    /// Stops after the configured task limit so a self-rescheduling task
    /// cannot spin forever.
    pub fn run_until_idle(&self) -> usize {
        let limit = self.inner.borrow().task_limit;
        let mut ran = 0;
        while ran < limit {
            let Some(task) = self.pop_due(None) else {
                return ran;
            };
            task();
            ran += 1;
        }
        if self.pending() > 0 {
            tracing::warn!(
                limit,
                pending = self.pending(),
                "scheduler task limit reached with work still queued"
            );
        }
        ran
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Scheduler")
            .field("now", &inner.now)
            .field("pending", &inner.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_tasks_run_in_due_order() {
        let scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for (delay, label) in [(20, "c"), (5, "a"), (10, "b")] {
            let log = log.clone();
            scheduler.schedule(delay, move || log.borrow_mut().push(label));
        }

        assert_eq!(scheduler.advance(9), 1);
        assert_eq!(scheduler.now(), 9);
        scheduler.run_until_idle();
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
        assert_eq!(scheduler.now(), 20);
    }

    #[test]
    fn test_same_instant_keeps_insertion_order() {
        let scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let log = log.clone();
            scheduler.schedule(0, move || log.borrow_mut().push(label));
        }
        scheduler.flush();
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_cancel() {
        let scheduler = Scheduler::new();
        let hit = Rc::new(RefCell::new(false));
        let flag = hit.clone();
        let id = scheduler.schedule(1, move || *flag.borrow_mut() = true);
        assert!(scheduler.cancel(id));
        scheduler.run_until_idle();
        assert!(!*hit.borrow());
        assert!(!scheduler.cancel(id));
    }

    #[test]
    fn test_tasks_scheduled_while_running() {
        let scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner_scheduler = scheduler.clone();
        let inner_log = log.clone();
        scheduler.schedule(5, move || {
            inner_log.borrow_mut().push(inner_scheduler.now());
            let log = inner_log.clone();
            let s = inner_scheduler.clone();
            inner_scheduler.schedule(5, move || log.borrow_mut().push(s.now()));
        });

        scheduler.run_until_idle();
        assert_eq!(*log.borrow(), vec![5, 10]);
    }

    #[test]
    fn test_task_limit_stops_runaway_loops() {
        fn reschedule(s: Scheduler) {
            let next = s.clone();
            s.schedule(1, move || reschedule(next));
        }
        let scheduler = Scheduler::with_task_limit(50);
        reschedule(scheduler.clone());
        assert_eq!(scheduler.run_until_idle(), 50);
        assert_eq!(scheduler.pending(), 1);
    }
}
