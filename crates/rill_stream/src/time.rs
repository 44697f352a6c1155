//! Time-based operators
//!
//! These take the [`Scheduler`] explicitly; there is no ambient clock.

use std::cell::Cell;
use std::rc::Rc;

use crate::scheduler::Scheduler;
use crate::stream::{Stream, Teardown};

impl<T: Clone + 'static> Stream<T> {
    /// Emit a value only after `ms` of silence, keeping the latest one.
    pub fn debounce(&self, scheduler: &Scheduler, ms: u64) -> Stream<T> {
        let source = self.clone();
        let scheduler = scheduler.clone();
        Stream::create(move |tx| {
            let epoch = Rc::new(Cell::new(0u64));

            let scheduler = scheduler.clone();
            let pending = Rc::clone(&epoch);
            let sub = source.subscribe(move |v| {
                let mine = pending.get() + 1;
                pending.set(mine);
                let live = Rc::clone(&pending);
                let tx = tx.clone();
                let value = v.clone();
                scheduler.schedule(ms, move || {
                    if live.get() == mine {
                        tx.emit(value);
                    }
                });
            });

            Teardown::new(move || {
                epoch.set(epoch.get() + 1);
                sub.unsubscribe();
            })
        })
    }

    /// Shift every value `ms` later in time.
    pub fn delay(&self, scheduler: &Scheduler, ms: u64) -> Stream<T> {
        let source = self.clone();
        let scheduler = scheduler.clone();
        Stream::create(move |tx| {
            let epoch = Rc::new(Cell::new(0u64));
            let current = epoch.get();

            let scheduler = scheduler.clone();
            let live = Rc::clone(&epoch);
            let sub = source.subscribe(move |v| {
                let tx = tx.clone();
                let value = v.clone();
                let live = Rc::clone(&live);
                scheduler.schedule(ms, move || {
                    if live.get() == current {
                        tx.emit(value);
                    }
                });
            });

            Teardown::new(move || {
                epoch.set(epoch.get() + 1);
                sub.unsubscribe();
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::Recorder;
    use crate::stream::Subject;

    #[test]
    fn test_debounce_collapses_bursts() {
        let scheduler = Scheduler::new();
        let subject = Subject::new();
        let rec = Recorder::new(&subject.stream().debounce(&scheduler, 5));

        subject.push(1);
        scheduler.advance(3);
        subject.push(2);
        scheduler.advance(3);
        assert!(rec.values().is_empty());
        scheduler.advance(2);
        assert_eq!(rec.values(), vec![2]);

        subject.push(3);
        scheduler.run_until_idle();
        assert_eq!(rec.values(), vec![2, 3]);
    }

    #[test]
    fn test_delay_preserves_every_value() {
        let scheduler = Scheduler::new();
        let subject = Subject::new();
        let rec = Recorder::new(&subject.stream().delay(&scheduler, 10));

        subject.push("a");
        scheduler.advance(4);
        subject.push("b");
        scheduler.advance(6);
        assert_eq!(rec.values(), vec!["a"]);
        scheduler.advance(4);
        assert_eq!(rec.values(), vec!["a", "b"]);
    }

    #[test]
    fn test_delay_drops_pending_values_after_stop() {
        let scheduler = Scheduler::new();
        let subject = Subject::new();
        let rec = Recorder::new(&subject.stream().delay(&scheduler, 10));
        subject.push(1);
        rec.stop();
        scheduler.run_until_idle();
        assert!(rec.values().is_empty());
    }
}
