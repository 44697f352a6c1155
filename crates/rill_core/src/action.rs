//! Actions and the action bus
//!
//! Intent output, lifecycle actions, hydration and deferred dispatch all meet
//! on one merged action stream per component instance.
//!
//! # Lifecycle
//!
//! - `INITIALIZE` seeds state; it runs on the state path only, ahead of
//!   everything else.
//! - `BOOTSTRAP` precedes every intent-derived action.
//! - `HYDRATE` carries server-provided initial data from the request source.
//!
//! # Deferred dispatch
//!
//! Reducers get a [`Next`] handle. Actions sent through it are scheduled on
//! the runtime's scheduler, so the reduction in flight always commits first.

use indexmap::IndexMap;
use rill_stream::{Scheduler, Stream, Subject};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::runtime::Diag;

pub const BOOTSTRAP: &str = "BOOTSTRAP";
pub const INITIALIZE: &str = "INITIALIZE";
pub const HYDRATE: &str = "HYDRATE";

/// Metadata key carrying the request id on correlated values
pub const REQ_ID_KEY: &str = "_reqId";
/// Metadata key carrying the originating action kind on correlated values
pub const ACTION_KEY: &str = "_action";

/// An incoming request as delivered by a [`RequestSource`](crate::RequestSource)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub body: Value,
}

/// A named event flowing through the action bus
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: String,
    pub data: Value,
    pub req_id: Option<String>,
    pub request: Option<Request>,
}

impl Action {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            req_id: None,
            request: None,
        }
    }

    /// Reducer-facing payload: correlated wrappers (`{data, _reqId}`) are
    /// unwrapped to their `data`.
    pub fn payload(&self) -> &Value {
        match &self.data {
            Value::Object(object) if object.contains_key(REQ_ID_KEY) => {
                object.get("data").unwrap_or(&self.data)
            }
            _ => &self.data,
        }
    }
}

/// What an intent function returns
pub enum Intent {
    /// A ready-made action stream
    Actions(Stream<Action>),
    /// Named streams; each value becomes `{kind: name, data: value}`
    Named(IndexMap<String, Stream<Value>>),
}

impl Intent {
    /// Build a named intent from `(kind, stream)` pairs.
    pub fn named<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Stream<Value>)>) -> Self {
        Intent::Named(pairs.into_iter().map(|(k, s)| (k.into(), s)).collect())
    }

    pub fn none() -> Self {
        Intent::Actions(Stream::never())
    }

    pub fn into_actions(self) -> Stream<Action> {
        match self {
            Intent::Actions(actions) => actions,
            Intent::Named(map) => Stream::merge(
                map.into_iter()
                    .map(|(kind, stream)| {
                        stream.map(move |data| Action::new(kind.clone(), data.clone()))
                    })
                    .collect(),
            ),
        }
    }
}

/// Deferred dispatch handle given to reducers
#[derive(Clone)]
pub struct Next {
    root: Subject<Action>,
    scheduler: Scheduler,
    default_delay_ms: u64,
    origin: Option<(String, String)>,
    diag: Diag,
}

impl Next {
    /// Dispatch after the default delay.
    pub fn emit(&self, kind: &str, data: Value) {
        self.emit_after(kind, data, self.default_delay_ms);
    }

    /// Dispatch after `delay_ms` of scheduler time.
    pub fn emit_after(&self, kind: &str, data: Value, delay_ms: u64) {
        let mut action = Action::new(kind, data);
        if let Some((req_id, origin)) = &self.origin {
            action.data = correlate(action.data, req_id, origin);
            action.req_id = Some(req_id.clone());
        }
        self.diag
            .trace(format_args!("next() scheduled <{}> in {}ms", kind, delay_ms));
        let root = self.root.clone();
        self.scheduler.schedule(delay_ms, move || root.push(action));
    }
}

/// Merge `_reqId` and `_action` into `data`, wrapping non-objects.
pub(crate) fn correlate(data: Value, req_id: &str, action: &str) -> Value {
    let mut object = match data {
        Value::Object(object) => object,
        other => {
            let mut wrapper = Map::new();
            wrapper.insert("data".to_string(), other);
            wrapper
        }
    };
    object.insert(REQ_ID_KEY.to_string(), json!(req_id));
    object.insert(ACTION_KEY.to_string(), json!(action));
    Value::Object(object)
}

/// The merged action stream of one component instance
#[derive(Clone)]
pub struct ActionBus {
    root: Subject<Action>,
    actions: Stream<Action>,
    scheduler: Scheduler,
    next_delay_ms: u64,
    diag: Diag,
}

impl ActionBus {
    pub(crate) fn new(
        intent: Stream<Action>,
        hydrate: Option<Stream<Value>>,
        scheduler: &Scheduler,
        bootstrap_delay_ms: u64,
        next_delay_ms: u64,
        diag: Diag,
    ) -> Self {
        let root = Subject::new();
        let bootstrapped = intent
            .start_with(Action::new(BOOTSTRAP, Value::Null))
            .delay(scheduler, bootstrap_delay_ms);

        let mut inputs = vec![bootstrapped, root.stream()];
        if let Some(hydrate) = hydrate {
            inputs.push(hydrate.map(|data| Action::new(HYDRATE, data.clone())));
        }

        let log = diag.clone();
        let actions = Stream::merge(inputs).inspect(move |action| {
            log.trace(format_args!("<{}> action triggered", action.kind));
        });

        Self {
            root,
            actions,
            scheduler: scheduler.clone(),
            next_delay_ms,
            diag,
        }
    }

    pub fn actions(&self) -> Stream<Action> {
        self.actions.clone()
    }

    /// Actions of one kind.
    pub fn select(&self, kind: &str) -> Stream<Action> {
        let kind = kind.to_string();
        self.actions.filter(move |action| action.kind == kind)
    }

    /// Push an action directly, bypassing the bootstrap delay.
    pub fn dispatch(&self, action: Action) {
        self.root.push(action);
    }

    /// A [`Next`] handle for reducers triggered by `action`.
    pub fn next_for(&self, action: &Action) -> Next {
        Next {
            root: self.root.clone(),
            scheduler: self.scheduler.clone(),
            default_delay_ms: self.next_delay_ms,
            origin: action
                .req_id
                .as_ref()
                .map(|id| (id.clone(), action.kind.clone())),
            diag: self.diag.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_stream::Recorder;

    fn bus(intent: Stream<Action>, scheduler: &Scheduler) -> ActionBus {
        ActionBus::new(intent, None, scheduler, 10, 10, Diag::new("Test", 0, false))
    }

    fn kinds(rec: &Recorder<Action>) -> Vec<String> {
        rec.values().into_iter().map(|a| a.kind).collect()
    }

    #[test]
    fn test_bootstrap_precedes_intent() {
        let scheduler = Scheduler::new();
        let intent = Subject::new();
        let bus = bus(intent.stream(), &scheduler);
        let rec = Recorder::new(&bus.actions());

        intent.push(Action::new("CLICK", Value::Null));
        assert!(rec.is_empty());
        scheduler.advance(10);
        assert_eq!(kinds(&rec), vec!["BOOTSTRAP", "CLICK"]);
    }

    #[test]
    fn test_named_intent() {
        let scheduler = Scheduler::new();
        let clicks = Subject::new();
        let intent = Intent::named([("CLICK", clicks.stream())]);
        let bus = bus(intent.into_actions(), &scheduler);
        let rec = Recorder::new(&bus.select("CLICK"));
        clicks.push(json!(1));
        scheduler.run_until_idle();
        assert_eq!(rec.values(), vec![Action::new("CLICK", json!(1))]);
    }

    #[test]
    fn test_next_runs_after_delay() {
        let scheduler = Scheduler::new();
        let bus = bus(Stream::never(), &scheduler);
        let rec = Recorder::new(&bus.select("LATER"));
        let next = bus.next_for(&Action::new("NOW", Value::Null));

        next.emit_after("LATER", json!(1), 25);
        scheduler.advance(24);
        assert!(rec.is_empty());
        scheduler.advance(1);
        assert_eq!(rec.len(), 1);
    }

    #[test]
    fn test_next_tags_correlated_actions() {
        let scheduler = Scheduler::new();
        let bus = bus(Stream::never(), &scheduler);
        let rec = Recorder::new(&bus.select("SAVED"));
        let mut trigger = Action::new("SAVE", Value::Null);
        trigger.req_id = Some("r1".into());

        bus.next_for(&trigger).emit("SAVED", json!({ "ok": true }));
        scheduler.run_until_idle();
        let saved = rec.last().unwrap();
        assert_eq!(saved.req_id.as_deref(), Some("r1"));
        assert_eq!(saved.data, json!({ "ok": true, "_reqId": "r1", "_action": "SAVE" }));
    }

    #[test]
    fn test_payload_unwraps_correlated_data() {
        let action = Action::new("X", correlate(json!(5), "r", "Y"));
        assert_eq!(action.payload(), &json!(5));
        assert_eq!(Action::new("X", json!({ "a": 1 })).payload(), &json!({ "a": 1 }));
    }
}
