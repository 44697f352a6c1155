//! Stream core
//!
//! A `Stream<T>` is a lazily started, multicast, push-based sequence of values.
//! The producer behind a stream starts when the first listener subscribes and
//! stops when the last listener unsubscribes. Streams never complete.
//!
//! Everything here is single-threaded (`Rc` + `RefCell`). Emission never holds
//! a borrow while listeners run, so listeners may subscribe, unsubscribe or
//! push into other streams re-entrantly.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

type ListenerFn<T> = Rc<dyn Fn(&T)>;

/// Producer start function: receives an emitter, returns the teardown to run
/// when the stream stops.
pub(crate) type StartFn<T> = Box<dyn FnMut(Emitter<T>) -> Teardown>;

struct Listener<T> {
    id: u64,
    f: ListenerFn<T>,
}

struct Core<T> {
    listeners: RefCell<Vec<Listener<T>>>,
    start: RefCell<Option<StartFn<T>>>,
    teardown: RefCell<Option<Teardown>>,
    running: Cell<bool>,
    /// Present on remembered streams. Holds the last emitted value.
    memory: Option<RefCell<Option<T>>>,
    next_id: Cell<u64>,
}

impl<T: Clone + 'static> Core<T> {
    fn emit(&self, value: T) {
        if let Some(memory) = &self.memory {
            *memory.borrow_mut() = Some(value.clone());
        }
        let listeners: Vec<ListenerFn<T>> = self
            .listeners
            .borrow()
            .iter()
            .map(|l| Rc::clone(&l.f))
            .collect();
        for listener in listeners {
            listener(&value);
        }
    }

    fn remove_listener(&self, id: u64) {
        let empty = {
            let mut listeners = self.listeners.borrow_mut();
            listeners.retain(|l| l.id != id);
            listeners.is_empty()
        };
        if empty && self.running.get() {
            self.running.set(false);
            let teardown = self.teardown.borrow_mut().take();
            if let Some(teardown) = teardown {
                teardown.run();
            }
        }
    }
}

/// A push-based reactive stream.
///
/// Cloning is cheap and yields a handle to the same stream.
pub struct Stream<T> {
    core: Rc<Core<T>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("listeners", &self.core.listeners.borrow().len())
            .field("running", &self.core.running.get())
            .field("remembered", &self.core.memory.is_some())
            .finish()
    }
}

impl<T: Clone + 'static> Stream<T> {
    fn from_parts(start: Option<StartFn<T>>, remembered: bool) -> Self {
        Self {
            core: Rc::new(Core {
                listeners: RefCell::new(Vec::new()),
                start: RefCell::new(start),
                teardown: RefCell::new(None),
                running: Cell::new(false),
                memory: remembered.then(|| RefCell::new(None)),
                next_id: Cell::new(1),
            }),
        }
    }

    /// Create a stream from a producer function.
    ///
    /// `start` runs each time the stream goes from zero to one listener. The
    /// returned teardown runs when the last listener leaves.
    pub fn create<F>(start: F) -> Self
    where
        F: FnMut(Emitter<T>) -> Teardown + 'static,
    {
        Self::from_parts(Some(Box::new(start)), false)
    }

    /// Like [`Stream::create`] but the stream replays its last value to new
    /// listeners.
    pub fn create_remembered<F>(start: F) -> Self
    where
        F: FnMut(Emitter<T>) -> Teardown + 'static,
    {
        Self::from_parts(Some(Box::new(start)), true)
    }

    /// A stream that never emits.
    pub fn never() -> Self {
        Self::from_parts(None, false)
    }

    /// A stream that emits `value` every time it starts.
    pub fn of(value: T) -> Self {
        Self::create(move |tx| {
            tx.emit(value.clone());
            Teardown::none()
        })
    }

    /// A stream that emits every item of `values`, in order, every time it starts.
    pub fn from_iter<I>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let values: Vec<T> = values.into_iter().collect();
        Self::create(move |tx| {
            for value in &values {
                tx.emit(value.clone());
            }
            Teardown::none()
        })
    }

    /// Attach a listener. Starts the producer if this is the first one.
    ///
    /// Remembered streams replay their last value to the new listener
    /// synchronously.
    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        let core = &self.core;
        let id = core.next_id.get();
        core.next_id.set(id + 1);

        let f: ListenerFn<T> = Rc::new(f);
        core.listeners.borrow_mut().push(Listener {
            id,
            f: Rc::clone(&f),
        });

        if let Some(memory) = &core.memory {
            let last = memory.borrow().clone();
            if let Some(last) = last {
                f(&last);
            }
        }

        if !core.running.get() {
            core.running.set(true);
            self.start_producer();
        }

        let weak: Weak<Core<T>> = Rc::downgrade(core);
        Subscription::new(move || {
            if let Some(core) = weak.upgrade() {
                core.remove_listener(id);
            }
        })
    }

    fn start_producer(&self) {
        let core = &self.core;
        let start = core.start.borrow_mut().take();
        let Some(mut start) = start else {
            return;
        };
        let teardown = start(Emitter {
            core: Rc::clone(core),
        });
        *core.start.borrow_mut() = Some(start);

        // The last listener may have left while the producer was starting.
        if core.running.get() {
            *core.teardown.borrow_mut() = Some(teardown);
        } else {
            teardown.run();
        }
    }

    /// Whether this stream replays its last value.
    pub fn is_remembered(&self) -> bool {
        self.core.memory.is_some()
    }

    /// Last value seen by a remembered stream.
    pub fn last(&self) -> Option<T> {
        self.core
            .memory
            .as_ref()
            .and_then(|memory| memory.borrow().clone())
    }

    /// Whether the producer is currently running.
    pub fn is_active(&self) -> bool {
        self.core.running.get()
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.core.listeners.borrow().len()
    }

    /// Whether two handles point at the same stream.
    pub fn ptr_eq(&self, other: &Stream<T>) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    pub(crate) fn emit_now(&self, value: T) {
        self.core.emit(value);
    }
}

/// Handle given to producers for pushing values downstream.
///
/// An emitter keeps its stream alive. Producers hand it to upstream
/// listeners, so a running stream survives every `Stream` handle to it
/// being dropped; the reference cycle ends when the producer's teardown
/// detaches those listeners.
pub struct Emitter<T> {
    core: Rc<Core<T>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + 'static> Emitter<T> {
    /// Push a value to every listener. Ignored once the stream has stopped.
    pub fn emit(&self, value: T) {
        if self.core.running.get() {
            self.core.emit(value);
        }
    }
}

/// Cleanup work run when a producer stops.
#[must_use]
pub struct Teardown(Option<Box<dyn FnOnce()>>);

impl Teardown {
    pub fn new<F: FnOnce() + 'static>(f: F) -> Self {
        Self(Some(Box::new(f)))
    }

    pub fn none() -> Self {
        Self(None)
    }

    /// Combine several teardowns into one, run in order.
    pub fn all(teardowns: Vec<Teardown>) -> Self {
        Self::new(move || {
            for teardown in teardowns {
                teardown.run();
            }
        })
    }

    pub fn run(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl From<Subscription> for Teardown {
    fn from(subscription: Subscription) -> Self {
        Teardown::new(move || subscription.unsubscribe())
    }
}

/// Handle for a listener attached with [`Stream::subscribe`].
///
/// Dropping the handle keeps the listener attached; call
/// [`Subscription::unsubscribe`] to detach it.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    fn new<F: FnOnce() + 'static>(f: F) -> Self {
        Self {
            cancel: Some(Box::new(f)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.cancel.is_some())
            .finish()
    }
}

/// A stream whose values are pushed imperatively.
///
/// This is the imitation point for cycles in a stream graph (the action bus
/// root, prop channels, the state reducer proxy).
pub struct Subject<T> {
    stream: Stream<T>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            stream: self.stream.clone(),
        }
    }
}

impl<T: Clone + 'static> Subject<T> {
    pub fn new() -> Self {
        Self {
            stream: Stream::from_parts(None, false),
        }
    }

    /// A subject that remembers its last pushed value.
    pub fn remembered() -> Self {
        Self {
            stream: Stream::from_parts(None, true),
        }
    }

    /// A remembered subject seeded with `initial`.
    pub fn with_initial(initial: T) -> Self {
        let subject = Self::remembered();
        subject.push(initial);
        subject
    }

    /// Push a value to current listeners (and memory, if remembered).
    pub fn push(&self, value: T) {
        self.stream.emit_now(value);
    }

    pub fn stream(&self) -> Stream<T> {
        self.stream.clone()
    }
}

impl<T: Clone + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_starts_lazily() {
        let started = Rc::new(Cell::new(0));
        let s = started.clone();
        let stream: Stream<i32> = Stream::create(move |tx| {
            s.set(s.get() + 1);
            tx.emit(7);
            Teardown::none()
        });
        assert_eq!(started.get(), 0);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let sub = stream.subscribe(move |v| sink.borrow_mut().push(*v));
        assert_eq!(started.get(), 1);
        assert_eq!(*seen.borrow(), vec![7]);

        // A second listener does not restart the producer.
        let _other = stream.subscribe(|_| {});
        assert_eq!(started.get(), 1);
        sub.unsubscribe();
    }

    #[test]
    fn test_teardown_runs_when_last_listener_leaves() {
        let stopped = Rc::new(Cell::new(false));
        let flag = stopped.clone();
        let stream: Stream<i32> = Stream::create(move |_tx| {
            let flag = flag.clone();
            Teardown::new(move || flag.set(true))
        });

        let a = stream.subscribe(|_| {});
        let b = stream.subscribe(|_| {});
        a.unsubscribe();
        assert!(!stopped.get());
        b.unsubscribe();
        assert!(stopped.get());
        assert!(!stream.is_active());
    }

    #[test]
    fn test_remembered_subject_replays() {
        let subject = Subject::with_initial(1);
        subject.push(2);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _sub = subject.stream().subscribe(move |v| sink.borrow_mut().push(*v));
        subject.push(3);

        assert_eq!(*seen.borrow(), vec![2, 3]);
        assert_eq!(subject.stream().last(), Some(3));
    }

    #[test]
    fn test_plain_subject_drops_values_without_listeners() {
        let subject: Subject<i32> = Subject::new();
        subject.push(1);
        assert_eq!(subject.stream().last(), None);
    }

    #[test]
    fn test_listener_may_unsubscribe_reentrantly() {
        let subject: Subject<i32> = Subject::new();
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let count = Rc::new(Cell::new(0));

        let inner_slot = slot.clone();
        let inner_count = count.clone();
        let sub = subject.stream().subscribe(move |_| {
            inner_count.set(inner_count.get() + 1);
            if let Some(sub) = inner_slot.borrow_mut().take() {
                sub.unsubscribe();
            }
        });
        *slot.borrow_mut() = Some(sub);

        subject.push(1);
        subject.push(2);
        assert_eq!(count.get(), 1);
    }
}
