//! Model reducer bank
//!
//! A model maps action kinds to per-sink reducers. Each (action, sink) pair
//! becomes a stream of [`Reduction`]s; the variant is fixed by the sink it
//! targets:
//!
//! - the state sink gets lazy [`Transition`]s, applied when folded against
//!   live state;
//! - every other sink gets values computed eagerly against the current state.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use rill_stream::Stream;
use serde_json::Value;

use crate::action::{correlate, Action, ActionBus, Next, Request, INITIALIZE};
use crate::calculated::Calculated;
use crate::lens::Transition;
use crate::runtime::Diag;

/// Result of a reducer: a value, or `Abort` to leave things unchanged
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Value(Value),
    Abort,
}

impl From<Value> for Outcome {
    fn from(value: Value) -> Self {
        Outcome::Value(value)
    }
}

/// `(state, data, next, request) -> outcome`
pub type ReducerFn = Rc<dyn Fn(&Value, &Value, &Next, Option<&Request>) -> Outcome>;

/// How one action feeds one sink
#[derive(Clone)]
pub enum SinkReducer {
    Reduce(ReducerFn),
    /// Emit this value every time
    Constant(Value),
    /// Forward the action data as is
    Passthrough,
}

impl SinkReducer {
    pub fn reduce<F, R>(f: F) -> Self
    where
        F: Fn(&Value, &Value, &Next) -> R + 'static,
        R: Into<Outcome>,
    {
        SinkReducer::Reduce(Rc::new(move |state, data, next, _| f(state, data, next).into()))
    }

    fn run(&self, state: &Value, data: &Value, next: &Next, request: Option<&Request>) -> Outcome {
        match self {
            SinkReducer::Reduce(f) => f(state, data, next, request),
            SinkReducer::Constant(value) => Outcome::Value(value.clone()),
            SinkReducer::Passthrough => Outcome::Value(data.clone()),
        }
    }
}

/// Sink name to reducer, for one action kind
pub type ActionModel = IndexMap<String, SinkReducer>;

/// Action kind to [`ActionModel`]
pub type Model = IndexMap<String, ActionModel>;

/// One reducer output
#[derive(Clone)]
pub enum Reduction {
    StateTransition(Transition),
    DirectValue(Value),
}

/// Merged reducer output per sink
pub(crate) struct ModelOutputs {
    pub state: Stream<Transition>,
    pub channels: IndexMap<String, Stream<Value>>,
}

/// Give the model its lifecycle defaults.
///
/// A stateful model gets an `INITIALIZE` state reducer unless it defines one;
/// non-state sinks under `INITIALIZE` are dropped.
pub(crate) fn normalize(mut model: Model, stateful: bool, state_sink: &str, diag: &Diag) -> Model {
    if let Some(init) = model.get_mut(INITIALIZE) {
        let dropped: Vec<String> = init
            .keys()
            .filter(|sink| sink.as_str() != state_sink)
            .cloned()
            .collect();
        for sink in dropped {
            diag.warn(format_args!(
                "'{}' sink attached to INITIALIZE is ignored; INITIALIZE only updates state",
                sink
            ));
            init.shift_remove(&sink);
        }
    } else if stateful && !model.is_empty() {
        let mut init = ActionModel::new();
        init.insert(
            state_sink.to_string(),
            SinkReducer::Reduce(Rc::new(|_, data, _, _| Outcome::Value(data.clone()))),
        );
        model.insert(INITIALIZE.to_string(), init);
    }
    model
}

/// Whether any action in `model` writes to `state_sink`.
pub(crate) fn writes_state(model: &Model, state_sink: &str) -> bool {
    model.values().any(|sinks| sinks.contains_key(state_sink))
}

/// Everything reducers need at dispatch time
pub(crate) struct ReducerBank {
    pub bus: ActionBus,
    /// Bus actions plus the `INITIALIZE` prefix
    pub state_actions: Stream<Action>,
    pub calculated: Rc<Calculated>,
    pub current: Rc<RefCell<Value>>,
    /// Reduce over the mirrored current state instead of the fold argument
    pub mirror: bool,
    pub state_sink: String,
    pub diag: Diag,
}

impl ReducerBank {
    pub(crate) fn build(&self, model: &Model) -> ModelOutputs {
        let mut per_sink: IndexMap<String, Vec<Stream<Reduction>>> = IndexMap::new();
        for (kind, sinks) in model {
            for (sink, reducer) in sinks {
                let stream = if *sink == self.state_sink {
                    self.state_reductions(kind, reducer.clone())
                } else {
                    self.direct_reductions(kind, sink, reducer.clone())
                };
                per_sink.entry(sink.clone()).or_default().push(stream);
            }
        }

        let mut state = Stream::never();
        let mut channels = IndexMap::new();
        for (sink, streams) in per_sink {
            let merged = Stream::merge(streams);
            if sink == self.state_sink {
                state = merged.filter_map(|r| match r {
                    Reduction::StateTransition(t) => Some(Rc::clone(t)),
                    Reduction::DirectValue(_) => None,
                });
            } else {
                channels.insert(
                    sink,
                    merged.filter_map(|r| match r {
                        Reduction::DirectValue(v) => Some(v.clone()),
                        Reduction::StateTransition(_) => None,
                    }),
                );
            }
        }
        ModelOutputs { state, channels }
    }

    fn state_reductions(&self, kind: &str, reducer: SinkReducer) -> Stream<Reduction> {
        let kind = kind.to_string();
        let bus = self.bus.clone();
        let calculated = Rc::clone(&self.calculated);
        let current = Rc::clone(&self.current);
        let mirror = self.mirror;
        let diag = self.diag.clone();
        let reducer = Rc::new(reducer);

        let wanted = kind.clone();
        self.state_actions
            .filter(move |action| action.kind == wanted)
            .map(move |action| {
                diag.trace(format_args!(
                    "state reducer queued for <{}>",
                    action.kind
                ));
                let next = bus.next_for(action);
                let data = action.payload().clone();
                let request = action.request.clone();
                let calculated = Rc::clone(&calculated);
                let current = Rc::clone(&current);
                let reducer = Rc::clone(&reducer);
                let diag = diag.clone();
                let kind = kind.clone();
                let transition: Transition = Rc::new(move |state: Value| {
                    let base = if mirror {
                        let mirrored = current.borrow().clone();
                        if mirrored.is_null() {
                            state
                        } else {
                            mirrored
                        }
                    } else {
                        state
                    };
                    let enhanced = calculated.apply(&base);
                    match reducer.run(&enhanced, &data, &next, request.as_ref()) {
                        Outcome::Abort => {
                            diag.trace(format_args!("<{}> state reducer aborted", kind));
                            base
                        }
                        Outcome::Value(value) => calculated.cleanup(value),
                    }
                });
                Reduction::StateTransition(transition)
            })
    }

    fn direct_reductions(&self, kind: &str, sink: &str, reducer: SinkReducer) -> Stream<Reduction> {
        let wanted = kind.to_string();
        let sink = sink.to_string();
        let bus = self.bus.clone();
        let calculated = Rc::clone(&self.calculated);
        let current = Rc::clone(&self.current);
        let diag = self.diag.clone();

        self.bus
            .actions()
            .filter(move |action| action.kind == wanted)
            .filter_map(move |action| {
                let state = current.borrow().clone();
                let enhanced = calculated.apply(&state);
                let next = bus.next_for(action);
                let outcome = reducer.run(&enhanced, action.payload(), &next, action.request.as_ref());
                let value = match outcome {
                    Outcome::Abort => {
                        diag.trace(format_args!("<{}> reducer for '{}' aborted", action.kind, sink));
                        return None;
                    }
                    Outcome::Value(value) => value,
                };
                if value.is_null() {
                    diag.warn(format_args!(
                        "undefined value sent to '{}' by <{}>",
                        sink, action.kind
                    ));
                }
                let value = match (&action.req_id, value) {
                    (Some(req_id), value @ Value::Object(_)) => correlate(value, req_id, &action.kind),
                    (_, value) => value,
                };
                diag.trace(format_args!("<{}> sent to '{}'", action.kind, sink));
                Some(Reduction::DirectValue(value))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_stream::{Recorder, Scheduler, Subject};
    use serde_json::json;

    struct Fixture {
        scheduler: Scheduler,
        intent: Subject<Action>,
        bank: ReducerBank,
    }

    fn fixture(current: Value) -> Fixture {
        let scheduler = Scheduler::new();
        let intent = Subject::new();
        let diag = Diag::new("Test", 0, false);
        let bus = ActionBus::new(intent.stream(), None, &scheduler, 0, 10, diag.clone());
        let bank = ReducerBank {
            state_actions: bus.actions(),
            bus,
            calculated: Rc::new(Calculated::new("Test", IndexMap::new(), true, None)),
            current: Rc::new(RefCell::new(current)),
            mirror: false,
            state_sink: "STATE".into(),
            diag,
        };
        Fixture {
            scheduler,
            intent,
            bank,
        }
    }

    fn model(kind: &str, sink: &str, reducer: SinkReducer) -> Model {
        let mut sinks = ActionModel::new();
        sinks.insert(sink.to_string(), reducer);
        let mut model = Model::new();
        model.insert(kind.to_string(), sinks);
        model
    }

    #[test]
    fn test_state_reducer_is_lazy_transition() {
        let fx = fixture(Value::Null);
        let out = fx.bank.build(&model(
            "INC",
            "STATE",
            SinkReducer::reduce(|state: &Value, _: &Value, _: &Next| {
                json!({ "n": state["n"].as_i64().unwrap_or(0) + 1 })
            }),
        ));
        let rec = Recorder::new(&out.state);
        fx.intent.push(Action::new("INC", Value::Null));
        fx.scheduler.run_until_idle();

        let transitions = rec.values();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0](json!({ "n": 1 })), json!({ "n": 2 }));
    }

    #[test]
    fn test_abort_leaves_state() {
        let fx = fixture(Value::Null);
        let out = fx.bank.build(&model(
            "NOOP",
            "STATE",
            SinkReducer::reduce(|_: &Value, _: &Value, _: &Next| Outcome::Abort),
        ));
        let rec = Recorder::new(&out.state);
        fx.intent.push(Action::new("NOOP", Value::Null));
        fx.scheduler.run_until_idle();
        let state = json!({ "keep": true });
        assert_eq!(rec.values()[0](state.clone()), state);
    }

    #[test]
    fn test_direct_sink_uses_current_state() {
        let fx = fixture(json!({ "name": "rill" }));
        let out = fx.bank.build(&model(
            "LOG",
            "EVENTS",
            SinkReducer::reduce(|state: &Value, data: &Value, _: &Next| {
                json!({ "who": state["name"], "what": data })
            }),
        ));
        let rec = Recorder::new(&out.channels["EVENTS"]);
        fx.intent.push(Action::new("LOG", json!("hi")));
        fx.scheduler.run_until_idle();
        assert_eq!(rec.values(), vec![json!({ "who": "rill", "what": "hi" })]);
    }

    #[test]
    fn test_abort_drops_direct_emission() {
        let fx = fixture(Value::Null);
        let out = fx.bank.build(&model(
            "X",
            "EVENTS",
            SinkReducer::reduce(|_: &Value, _: &Value, _: &Next| Outcome::Abort),
        ));
        let rec = Recorder::new(&out.channels["EVENTS"]);
        fx.intent.push(Action::new("X", Value::Null));
        fx.scheduler.run_until_idle();
        assert!(rec.is_empty());
    }

    #[test]
    fn test_constant_and_passthrough() {
        let fx = fixture(Value::Null);
        let mut m = model("A", "EVENTS", SinkReducer::Constant(json!("fixed")));
        m.insert("B".into(), {
            let mut sinks = ActionModel::new();
            sinks.insert("EVENTS".into(), SinkReducer::Passthrough);
            sinks
        });
        let out = fx.bank.build(&m);
        let rec = Recorder::new(&out.channels["EVENTS"]);
        fx.intent.push(Action::new("A", json!(1)));
        fx.intent.push(Action::new("B", json!(2)));
        fx.scheduler.run_until_idle();
        assert_eq!(rec.values(), vec![json!("fixed"), json!(2)]);
    }

    #[test]
    fn test_correlated_values_are_tagged() {
        let fx = fixture(Value::Null);
        let out = fx.bank.build(&model("SAVE", "DB", SinkReducer::Passthrough));
        let rec = Recorder::new(&out.channels["DB"]);
        let mut action = Action::new("SAVE", json!({ "doc": 1 }));
        action.req_id = Some("r9".into());
        fx.bank.bus.dispatch(action);
        assert_eq!(
            rec.values(),
            vec![json!({ "doc": 1, "_reqId": "r9", "_action": "SAVE" })]
        );
    }

    #[test]
    fn test_normalize_adds_initialize() {
        let diag = Diag::new("Test", 0, false);
        let m = normalize(model("A", "STATE", SinkReducer::Passthrough), true, "STATE", &diag);
        assert!(m[INITIALIZE].contains_key("STATE"));
    }

    #[test]
    fn test_normalize_strips_non_state_initialize_sinks() {
        let diag = Diag::new("Test", 0, false);
        let mut m = model(INITIALIZE, "STATE", SinkReducer::Passthrough);
        m[INITIALIZE].insert("EVENTS".into(), SinkReducer::Passthrough);
        let m = normalize(m, true, "STATE", &diag);
        assert_eq!(m[INITIALIZE].keys().collect::<Vec<_>>(), vec!["STATE"]);
    }
}
