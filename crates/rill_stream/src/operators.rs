//! Stream operators
//!
//! Each operator returns a new lazy stream that subscribes to its upstream
//! only while it has listeners of its own.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::stream::{Stream, Subscription, Teardown};

impl<T: Clone + 'static> Stream<T> {
    pub fn map<U, F>(&self, f: F) -> Stream<U>
    where
        U: Clone + 'static,
        F: Fn(&T) -> U + 'static,
    {
        let source = self.clone();
        let f = Rc::new(f);
        Stream::create(move |tx| {
            let f = Rc::clone(&f);
            source.subscribe(move |v| tx.emit(f(v))).into()
        })
    }

    /// Replace every value with a clone of `value`.
    pub fn map_to<U: Clone + 'static>(&self, value: U) -> Stream<U> {
        self.map(move |_| value.clone())
    }

    pub fn filter<F>(&self, predicate: F) -> Stream<T>
    where
        F: Fn(&T) -> bool + 'static,
    {
        let source = self.clone();
        let predicate = Rc::new(predicate);
        Stream::create(move |tx| {
            let predicate = Rc::clone(&predicate);
            source
                .subscribe(move |v| {
                    if predicate(v) {
                        tx.emit(v.clone());
                    }
                })
                .into()
        })
    }

    pub fn filter_map<U, F>(&self, f: F) -> Stream<U>
    where
        U: Clone + 'static,
        F: Fn(&T) -> Option<U> + 'static,
    {
        let source = self.clone();
        let f = Rc::new(f);
        Stream::create(move |tx| {
            let f = Rc::clone(&f);
            source
                .subscribe(move |v| {
                    if let Some(out) = f(v) {
                        tx.emit(out);
                    }
                })
                .into()
        })
    }

    /// Run a side effect for every value without changing it.
    pub fn inspect<F>(&self, f: F) -> Stream<T>
    where
        F: Fn(&T) + 'static,
    {
        let source = self.clone();
        let f = Rc::new(f);
        Stream::create(move |tx| {
            let f = Rc::clone(&f);
            source
                .subscribe(move |v| {
                    f(v);
                    tx.emit(v.clone());
                })
                .into()
        })
    }

    /// Emit `initial` on start, then forward upstream values.
    pub fn start_with(&self, initial: T) -> Stream<T> {
        let source = self.clone();
        Stream::create(move |tx| {
            tx.emit(initial.clone());
            source.subscribe(move |v| tx.emit(v.clone())).into()
        })
    }

    /// A stream that replays its last value to late listeners.
    pub fn remember(&self) -> Stream<T> {
        if self.is_remembered() {
            return self.clone();
        }
        let source = self.clone();
        Stream::create_remembered(move |tx| source.subscribe(move |v| tx.emit(v.clone())).into())
    }

    /// Drop values equal to the previous one according to `eq`.
    pub fn drop_repeats_by<F>(&self, eq: F) -> Stream<T>
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        let source = self.clone();
        let eq = Rc::new(eq);
        Stream::create(move |tx| {
            let eq = Rc::clone(&eq);
            let last: RefCell<Option<T>> = RefCell::new(None);
            source
                .subscribe(move |v| {
                    let repeat = last.borrow().as_ref().is_some_and(|prev| eq(prev, v));
                    if !repeat {
                        *last.borrow_mut() = Some(v.clone());
                        tx.emit(v.clone());
                    }
                })
                .into()
        })
    }

    /// Accumulate values, emitting `seed` on start and every intermediate result.
    pub fn fold<A, F>(&self, seed: A, f: F) -> Stream<A>
    where
        A: Clone + 'static,
        F: Fn(&A, &T) -> A + 'static,
    {
        let source = self.clone();
        let f = Rc::new(f);
        Stream::create(move |tx| {
            let f = Rc::clone(&f);
            let acc = RefCell::new(seed.clone());
            tx.emit(seed.clone());
            source
                .subscribe(move |v| {
                    let next = f(&acc.borrow(), v);
                    *acc.borrow_mut() = next.clone();
                    tx.emit(next);
                })
                .into()
        })
    }

    /// Forward only the first `n` values of each run.
    pub fn take(&self, n: usize) -> Stream<T> {
        let source = self.clone();
        Stream::create(move |tx| {
            let seen = Cell::new(0usize);
            source
                .subscribe(move |v| {
                    if seen.get() < n {
                        seen.set(seen.get() + 1);
                        tx.emit(v.clone());
                    }
                })
                .into()
        })
    }

    /// Merge several streams into one, interleaving by emission order.
    pub fn merge(streams: Vec<Stream<T>>) -> Stream<T> {
        match streams.len() {
            0 => return Stream::never(),
            1 => return streams.into_iter().next().unwrap_or_else(Stream::never),
            _ => {}
        }
        Stream::create(move |tx| {
            let subs: Vec<Teardown> = streams
                .iter()
                .map(|s| {
                    let tx = tx.clone();
                    s.subscribe(move |v| tx.emit(v.clone())).into()
                })
                .collect();
            Teardown::all(subs)
        })
    }

    /// Combine the latest value of every stream. Emits once all have emitted.
    pub fn combine(streams: Vec<Stream<T>>) -> Stream<Vec<T>> {
        if streams.is_empty() {
            return Stream::of(Vec::new());
        }
        Stream::create(move |tx| {
            let latest: Rc<RefCell<Vec<Option<T>>>> =
                Rc::new(RefCell::new(vec![None; streams.len()]));
            let subs: Vec<Teardown> = streams
                .iter()
                .enumerate()
                .map(|(index, s)| {
                    let tx = tx.clone();
                    let latest = Rc::clone(&latest);
                    s.subscribe(move |v| {
                        let ready = {
                            let mut slots = latest.borrow_mut();
                            slots[index] = Some(v.clone());
                            slots.iter().cloned().collect::<Option<Vec<T>>>()
                        };
                        if let Some(values) = ready {
                            tx.emit(values);
                        }
                    })
                    .into()
                })
                .collect();
            Teardown::all(subs)
        })
    }

    /// Combine this stream's latest value with `other`'s.
    pub fn combine_with<U: Clone + 'static>(&self, other: &Stream<U>) -> Stream<(T, U)> {
        let left = self.clone();
        let right = other.clone();
        Stream::create(move |tx| {
            let state: Rc<RefCell<(Option<T>, Option<U>)>> = Rc::new(RefCell::new((None, None)));

            let l_tx = tx.clone();
            let l_state = Rc::clone(&state);
            let l_sub = left.subscribe(move |v| {
                let ready = {
                    let mut s = l_state.borrow_mut();
                    s.0 = Some(v.clone());
                    s.1.clone().map(|u| (v.clone(), u))
                };
                if let Some(pair) = ready {
                    l_tx.emit(pair);
                }
            });

            let r_state = Rc::clone(&state);
            let r_sub = right.subscribe(move |u| {
                let ready = {
                    let mut s = r_state.borrow_mut();
                    s.1 = Some(u.clone());
                    s.0.clone().map(|v| (v, u.clone()))
                };
                if let Some(pair) = ready {
                    tx.emit(pair);
                }
            });

            Teardown::all(vec![l_sub.into(), r_sub.into()])
        })
    }
}

impl<T: Clone + PartialEq + 'static> Stream<T> {
    /// Drop values equal to the previous one.
    pub fn drop_repeats(&self) -> Stream<T> {
        self.drop_repeats_by(|a, b| a == b)
    }
}

impl<T: Clone + 'static> Stream<Stream<T>> {
    /// Follow the most recent inner stream (switch semantics).
    ///
    /// The new inner stream is attached before the previous one is detached,
    /// so switching to a stream that shares upstream work with the previous
    /// one never stops and restarts that work.
    pub fn flatten(&self) -> Stream<T> {
        let source = self.clone();
        Stream::create(move |tx| {
            let current: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
            let generation = Rc::new(Cell::new(0u64));

            let slot = Rc::clone(&current);
            let outer = source.subscribe(move |inner: &Stream<T>| {
                let gen = generation.get() + 1;
                generation.set(gen);

                let tx = tx.clone();
                let live = Rc::clone(&generation);
                let sub = inner.subscribe(move |v| {
                    if live.get() == gen {
                        tx.emit(v.clone());
                    }
                });
                // Starting `inner` may have pushed a newer inner stream.
                if generation.get() != gen {
                    sub.unsubscribe();
                    return;
                }
                let previous = slot.borrow_mut().replace(sub);
                if let Some(previous) = previous {
                    previous.unsubscribe();
                }
            });

            Teardown::new(move || {
                outer.unsubscribe();
                let inner = current.borrow_mut().take();
                if let Some(inner) = inner {
                    inner.unsubscribe();
                }
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
    fn test_map_filter_chain() {
        let subject = Subject::new();
        let out = subject.stream().map(|v: &i32| v * 10).filter(|v| *v > 10);
        let rec = Recorder::new(&out);
        for v in 1..=3 {
            subject.push(v);
        }
        assert_eq!(rec.values(), vec![20, 30]);
    }

    #[test]
    fn test_fold_emits_seed_then_accumulates() {
        let subject = Subject::new();
        let sum = subject.stream().fold(0, |acc, v: &i32| acc + v);
        let rec = Recorder::new(&sum);
        subject.push(2);
        subject.push(3);
        assert_eq!(rec.values(), vec![0, 2, 5]);
    }

    #[test]
    fn test_combine_waits_for_all_inputs() {
        let a = Subject::new();
        let b = Subject::new();
        let combined = Stream::combine(vec![a.stream(), b.stream()]);
        let rec = Recorder::new(&combined);

        a.push(1);
        assert!(rec.values().is_empty());
        b.push(2);
        a.push(3);
        assert_eq!(rec.values(), vec![vec![1, 2], vec![3, 2]]);
    }

    #[test]
    fn test_combine_empty_emits_empty_vec() {
        let combined: Stream<Vec<i32>> = Stream::combine(Vec::new());
        let rec = Recorder::new(&combined);
        assert_eq!(rec.values(), vec![Vec::<i32>::new()]);
    }

    #[test]
    fn test_drop_repeats() {
        let subject = Subject::new();
        let rec = Recorder::new(&subject.stream().drop_repeats());
        for v in [1, 1, 2, 2, 1] {
            subject.push(v);
        }
        assert_eq!(rec.values(), vec![1, 2, 1]);
    }

    #[test]
    fn test_flatten_switches_to_latest_inner() {
        let outer: Subject<Stream<i32>> = Subject::new();
        let first = Subject::new();
        let second = Subject::new();
        let rec = Recorder::new(&outer.stream().flatten());

        outer.push(first.stream());
        first.push(1);
        outer.push(second.stream());
        first.push(2);
        second.push(3);

        assert_eq!(rec.values(), vec![1, 3]);
        assert_eq!(first.stream().listener_count(), 0);
    }

    #[test]
    fn test_flatten_same_inner_does_not_restart_it() {
        let starts = Rc::new(Cell::new(0));
        let counter = starts.clone();
        let inner: Stream<i32> = Stream::create(move |tx| {
            counter.set(counter.get() + 1);
            tx.emit(counter.get());
            Teardown::none()
        })
        .remember();

        let outer: Subject<Stream<i32>> = Subject::new();
        let rec = Recorder::new(&outer.stream().flatten());
        outer.push(inner.clone());
        outer.push(inner.clone());

        assert_eq!(starts.get(), 1);
        assert_eq!(rec.values(), vec![1, 1]);
    }

    #[test]
    fn test_derived_temporaries_outlive_their_handles() {
        let subject = Subject::new();
        let mapped = Recorder::new(&subject.stream().map(|v: &i32| *v));
        let kept = Recorder::new(&subject.stream().filter_map(|v: &i32| Some(*v)));

        subject.push(1);
        assert_eq!(mapped.values(), vec![1]);
        assert_eq!(kept.values(), vec![1]);

        mapped.stop();
        kept.stop();
        assert_eq!(subject.stream().listener_count(), 0);
    }

    #[test]
    fn test_flatten_inner_may_switch_while_starting() {
        let outer: Subject<Stream<i32>> = Subject::new();
        let late = Subject::new();
        let rec = Recorder::new(&outer.stream().flatten());

        let redirect = outer.clone();
        let next = late.stream();
        let early: Stream<i32> = Stream::create(move |_tx| {
            redirect.push(next.clone());
            Teardown::none()
        });
        outer.push(early.clone());

        late.push(7);
        assert_eq!(rec.values(), vec![7]);
        assert!(!early.is_active());
        assert_eq!(late.stream().listener_count(), 1);
    }

    #[test]
    fn test_merge_interleaves() {
        let a = Subject::new();
        let b = Subject::new();
        let rec = Recorder::new(&Stream::merge(vec![a.stream(), b.stream()]));
        a.push(1);
        b.push(2);
        a.push(3);
        assert_eq!(rec.values(), vec![1, 2, 3]);
    }

    #[test]
    fn test_start_with_and_remember() {
        let subject = Subject::new();
        let remembered = subject.stream().start_with(0).remember();
        let first = Recorder::new(&remembered);
        subject.push(5);
        let late = Recorder::new(&remembered);
        assert_eq!(first.values(), vec![0, 5]);
        assert_eq!(late.values(), vec![5]);
    }

    #[test]
    fn test_combine_with_pairs_latest() {
        let a = Subject::new();
        let b = Subject::new();
        let rec = Recorder::new(&a.stream().combine_with(&b.stream()));
        a.push(1);
        b.push("x");
        a.push(2);
        assert_eq!(rec.values(), vec![(1, "x"), (2, "x")]);
    }
}
