//! Root mounting and the state loop
//!
//! The application state lives outside the component graph: a reducer
//! proxy folds every transition the root emits into a remembered state
//! stream, and that stream is handed back to the root as its state source.

use std::fmt;

use rill_stream::{Stream, Subject, Subscription, Teardown};
use serde_json::Value;

use crate::component::{self, ComponentFactory, ComponentSpec, Role};
use crate::error::Result;
use crate::lens::Transition;
use crate::runtime::Runtime;
use crate::sources::{Sinks, Sources, StateSource};
use crate::vnode::VNode;

/// Reducer proxy and the state folded from it
struct StateLoop {
    reducers: Subject<Transition>,
    state: Stream<Value>,
}

impl StateLoop {
    fn new() -> Self {
        let reducers: Subject<Transition> = Subject::new();
        let state = reducers
            .stream()
            .fold(None, |prev: &Option<Value>, reducer: &Transition| {
                Some(reducer(prev.clone().unwrap_or(Value::Null)))
            })
            .filter_map(|state| state.clone())
            .remember();
        Self { reducers, state }
    }

    /// Feed `transitions` back into the proxy until unsubscribed.
    fn feed(&self, transitions: &Stream<Transition>) -> Subscription {
        let reducers = self.reducers.clone();
        transitions.subscribe(move |t| reducers.push(t.clone()))
    }
}

/// Wrap `factory` so it owns its state.
///
/// The returned component needs no state source; its state sink is consumed
/// by the loop while its view is observed.
pub fn with_state(factory: ComponentFactory) -> ComponentFactory {
    let name = format!("{}(with state)", factory.name());
    ComponentFactory::new(name, move |sources: Sources, rt: &Runtime| {
        let state_loop = StateLoop::new();
        let sources = sources.with_state(StateSource::new(state_loop.state.clone()));
        let mut sinks = factory.instantiate(sources, rt)?;

        let inner_view = sinks.view.clone();
        let transitions = sinks.state.clone();
        sinks.view = Stream::create_remembered(move |tx| {
            let fed = state_loop.feed(&transitions);
            let tx = tx.clone();
            let shown = inner_view.subscribe(move |node| tx.emit(node.clone()));
            Teardown::all(vec![fed.into(), shown.into()])
        });
        sinks.state = Stream::never();
        sinks.has_state = false;
        Ok(sinks)
    })
}

/// A running application root
pub struct Mounted {
    state: Stream<Value>,
    view: Stream<VNode>,
    sinks: Sinks,
    subscriptions: Vec<Subscription>,
}

impl Mounted {
    /// Current application state, once the first reducer has run.
    pub fn state(&self) -> Option<Value> {
        self.state.last()
    }

    pub fn state_stream(&self) -> Stream<Value> {
        self.state.clone()
    }

    pub fn view(&self) -> Stream<VNode> {
        self.view.clone()
    }

    pub fn last_view(&self) -> Option<VNode> {
        self.view.last()
    }

    /// Sinks of the root, for hosts wiring their own channels.
    pub fn sinks(&self) -> &Sinks {
        &self.sinks
    }

    /// Detach the state loop and the view. The component graph stops once
    /// no other listener remains.
    pub fn unmount(self) {
        tracing::debug!("unmounting application root");
        for subscription in self.subscriptions {
            subscription.unsubscribe();
        }
    }
}

impl fmt::Debug for Mounted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mounted")
            .field("state", &self.state.last())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

/// Mount `spec` as the application root and start it.
///
/// Any state source already present in `sources` is replaced by the root
/// state loop.
pub fn mount(spec: &ComponentSpec, sources: Sources, rt: &Runtime) -> Result<Mounted> {
    let state_loop = StateLoop::new();
    let sources = sources.with_state(StateSource::new(state_loop.state.clone()));
    let sinks = component::instantiate(spec, sources, rt, Role::Root)?;
    tracing::debug!(component = spec.name(), "mounted as application root");

    let view = sinks.view.remember();
    let subscriptions = vec![
        state_loop.state.subscribe(|_| {}),
        state_loop.feed(&sinks.state),
        view.subscribe(|_| {}),
    ];

    Ok(Mounted {
        state: state_loop.state,
        view,
        sinks,
        subscriptions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::rc::Rc;

    #[test]
    fn test_state_loop_folds_transitions() {
        let state_loop = StateLoop::new();
        let sub = state_loop.state.subscribe(|_| {});
        let set: Transition = Rc::new(|_| json!({ "n": 1 }));
        let bump: Transition = Rc::new(|s: Value| json!({ "n": s["n"].as_i64().unwrap_or(0) + 1 }));
        state_loop.reducers.push(set);
        state_loop.reducers.push(bump);
        assert_eq!(state_loop.state.last(), Some(json!({ "n": 2 })));
        sub.unsubscribe();
    }

    #[test]
    fn test_mount_without_intent_or_model_starts_with_empty_state() {
        let rt = Runtime::default();
        let spec = ComponentSpec::builder("Static")
            .view(|_| VNode::element("p").child("static".into()))
            .build()
            .unwrap();
        let mounted = mount(&spec, Sources::new(), &rt).unwrap();
        rt.scheduler().run_until_idle();

        assert_eq!(mounted.state(), Some(json!({})));
        assert_eq!(mounted.last_view().map(|v| v.text_content()), Some("static".into()));
        mounted.unmount();
    }

    #[test]
    fn test_with_state_runs_nested_component_standalone() {
        let rt = Runtime::default();
        let counter = ComponentSpec::builder("Counter")
            .initial_state(json!({ "count": 3 }))
            .on("INC", |state, _, _| json!({ "count": state["count"].as_i64().unwrap_or(0) + 1 }))
            .view(|p| VNode::element("span").child(p.state["count"].to_string().into()))
            .build()
            .unwrap()
            .into_factory();

        let sinks = with_state(counter).instantiate(Sources::new(), &rt).unwrap();
        let rec = rill_stream::Recorder::new(&sinks.view);
        rt.scheduler().run_until_idle();
        assert_eq!(rec.last().map(|v| v.text_content()), Some("3".into()));
    }
}
