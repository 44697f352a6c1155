//! Test helper that records everything a stream emits.

use std::cell::RefCell;
use std::rc::Rc;

use crate::stream::{Stream, Subscription};

/// Subscribes to a stream and keeps every emitted value.
pub struct Recorder<T> {
    values: Rc<RefCell<Vec<T>>>,
    subscription: RefCell<Option<Subscription>>,
}

impl<T: Clone + 'static> Recorder<T> {
    pub fn new(stream: &Stream<T>) -> Self {
        let values = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&values);
        let subscription = stream.subscribe(move |v| sink.borrow_mut().push(v.clone()));
        Self {
            values,
            subscription: RefCell::new(Some(subscription)),
        }
    }

    /// Snapshot of every value recorded so far.
    pub fn values(&self) -> Vec<T> {
        self.values.borrow().clone()
    }

    pub fn last(&self) -> Option<T> {
        self.values.borrow().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.values.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.values.borrow_mut().clear();
    }

    /// Detach from the stream. Recorded values are kept.
    pub fn stop(&self) {
        let subscription = self.subscription.borrow_mut().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }
}
