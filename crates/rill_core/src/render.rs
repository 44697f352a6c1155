//! Render pipeline and sub-component reconciliation
//!
//! ```text
//! state ─┐
//! props ─┤
//! kids  ─┼─ combine ─ debounce ─ view ─ discover ─ registry ─┐
//! ctx   ─┤                                                   │
//! peers ─┘                           child views ─ combine ─ inject ─ debounce ─▶ DOM
//! ```
//!
//! The registry maps placeholder identities to live sub-component instances.
//! Each render is folded against the previous registry: known identities
//! get new props and children pushed in, unknown ones are instantiated, and
//! identities that disappear are dropped.

use std::rc::Rc;

use indexmap::IndexMap;
use rill_stream::{Scheduler, Stream, Subject};
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};

use crate::calculated::Calculated;
use crate::collection::{instantiate_collection, ComponentRef};
use crate::component::{ComponentFactory, ComponentSpec, ViewFn, ViewParams};
use crate::discovery::{discover, inject, DiscoveryScope, Placeholder};
use crate::equality::{deep_equal_bounded, node_lists_equal};
use crate::error::{ComponentError, Result};
use crate::lens::Transition;
use crate::runtime::{Diag, Runtime};
use crate::sources::{ChildMessage, Sinks, Sources, StateSource};
use crate::switchable::{instantiate_switchable, SwitchableState};
use crate::vnode::{Embed, PlaceholderKind, VNode, SWITCHABLE_SELECTOR};

/// Sinks of every registered sub-component, merged per channel
#[derive(Clone)]
pub(crate) struct Forwarded {
    pub state: Stream<Transition>,
    pub parent: Stream<ChildMessage>,
    pub channels: IndexMap<String, Stream<Value>>,
}

impl Forwarded {
    pub(crate) fn empty() -> Self {
        Self {
            state: Stream::never(),
            parent: Stream::never(),
            channels: IndexMap::new(),
        }
    }

    pub(crate) fn channel(&self, name: &str) -> Stream<Value> {
        self.channels.get(name).cloned().unwrap_or_else(Stream::never)
    }

    fn collect(entries: &IndexMap<String, Rc<Entry>>, forward: &[String]) -> Self {
        let parent = entries
            .values()
            .map(|entry| {
                let label = entry.label.clone();
                entry.sinks.parent.map(move |data| ChildMessage {
                    component: label.clone(),
                    data: data.clone(),
                })
            })
            .collect();
        Self {
            state: Stream::merge(entries.values().map(|e| e.sinks.state.clone()).collect()),
            parent: Stream::merge(parent),
            channels: forward
                .iter()
                .map(|name| {
                    let merged = Stream::merge(entries.values().map(|e| e.sinks.channel(name)).collect());
                    (name.clone(), merged)
                })
                .collect(),
        }
    }
}

/// Everything the render pipeline needs from its component
pub(crate) struct RenderSetup<'a> {
    pub spec: &'a ComponentSpec,
    pub view: ViewFn,
    /// Sources handed down to sub-components
    pub base: Sources,
    /// Component state with calculated fields
    pub state: Stream<Value>,
    pub calculated: Rc<Calculated>,
    pub context: Stream<Value>,
    pub peers: &'a IndexMap<String, Sinks>,
    pub forward: &'a [String],
    pub forwarded: Subject<Forwarded>,
    pub runtime: &'a Runtime,
    pub diag: Diag,
}

#[derive(Clone)]
enum RenderInput {
    State(Value),
    Props(Value),
    Children(Vec<VNode>),
    Context(Value),
    Peer(usize, VNode),
}

struct Entry {
    /// Name sub-component messages are tagged with
    label: String,
    sinks: Sinks,
    props: Subject<Value>,
    children: Subject<Vec<VNode>>,
}

#[derive(Default)]
struct Registry {
    root: Option<VNode>,
    entries: IndexMap<String, Rc<Entry>>,
}

/// Build the composed view stream of a component.
pub(crate) fn pipeline(setup: RenderSetup<'_>) -> Stream<VNode> {
    let rt = setup.runtime.clone();
    let scheduler = rt.scheduler().clone();
    let timing = rt.config().timing.clone();
    let max_depth = rt.config().equality.max_depth;
    let eq = move |a: &Value, b: &Value| deep_equal_bounded(a, b, max_depth);

    let mut inputs = vec![setup
        .state
        .drop_repeats_by(eq)
        .map(|s| RenderInput::State(s.clone()))];
    if let Some(props) = &setup.base.props {
        inputs.push(props.drop_repeats_by(eq).map(|p| RenderInput::Props(p.clone())));
    }
    if let Some(children) = &setup.base.children {
        inputs.push(
            children
                .drop_repeats_by(move |a, b| node_lists_equal(a, b, max_depth))
                .map(|c| RenderInput::Children(c.clone())),
        );
    }
    inputs.push(setup.context.map(|c| RenderInput::Context(c.clone())));
    let peer_names: Rc<Vec<String>> = Rc::new(setup.peers.keys().cloned().collect());
    for (index, sinks) in setup.peers.values().enumerate() {
        inputs.push(sinks.view.map(move |v| RenderInput::Peer(index, v.clone())));
    }

    let view = Rc::clone(&setup.view);
    let diag = setup.diag.clone();
    let rendered = Stream::combine(inputs)
        .debounce(&scheduler, timing.render_debounce_ms)
        .map(move |inputs| {
            let mut params = ViewParams::default();
            for input in inputs {
                match input {
                    RenderInput::State(state) => params.state = state.clone(),
                    RenderInput::Props(props) => params.props = props.clone(),
                    RenderInput::Children(children) => params.children = children.clone(),
                    RenderInput::Context(context) => params.context = context.clone(),
                    RenderInput::Peer(index, node) => {
                        if let Some(name) = peer_names.get(*index) {
                            params.peers.insert(name.clone(), node.clone());
                        }
                    }
                }
            }
            diag.trace(format_args!("rendering view"));
            view(&params).unwrap_or_else(|| VNode::element("div"))
        });

    let pulse: Subject<()> = Subject::new();
    let reconciler = Rc::new(Reconciler {
        owner: setup.spec.name().to_string(),
        components: setup.spec.components.clone(),
        base: setup.base,
        calculated: setup.calculated,
        context: setup.context,
        forward: setup.forward.to_vec(),
        forwarded: setup.forwarded,
        pulse: pulse.clone(),
        runtime: rt,
        scheduler: scheduler.clone(),
        child_debounce_ms: timing.child_render_debounce_ms,
        max_depth,
        diag: setup.diag,
    });

    let registry = rendered
        .fold(Rc::new(Registry::default()), move |prev, vnode| {
            reconciler.reconcile(prev, vnode)
        })
        .filter(|registry| registry.root.is_some())
        .remember();

    pulse
        .stream()
        .start_with(())
        .combine_with(&registry)
        .map(|(_, registry)| compose(registry))
        .flatten()
        .debounce(&scheduler, timing.render_debounce_ms)
        .remember()
}

/// Wait for every child view, then splice them into the root.
fn compose(registry: &Registry) -> Stream<VNode> {
    let Some(root) = registry.root.clone() else {
        return Stream::never();
    };
    if registry.entries.is_empty() {
        return Stream::of(root);
    }
    let ids: Vec<String> = registry.entries.keys().cloned().collect();
    let views = registry
        .entries
        .values()
        .map(|entry| entry.sinks.view.clone())
        .collect();
    Stream::combine(views).map(move |views| {
        let rendered: FxHashMap<String, VNode> =
            ids.iter().cloned().zip(views.iter().cloned()).collect();
        inject(&root, &rendered)
    })
}

/// State of a plain sub-component derived from its props: the `state` prop
/// merged over the remaining props, or the props themselves.
pub(crate) fn props_state(props: &Value) -> Value {
    let Some(state) = props.get("state") else {
        return props.clone();
    };
    let Value::Object(state) = state else {
        return state.clone();
    };
    let mut merged: Map<String, Value> = match props {
        Value::Object(props) => props.clone(),
        _ => Map::new(),
    };
    merged.shift_remove("state");
    for (key, value) in state {
        merged.insert(key.clone(), value.clone());
    }
    Value::Object(merged)
}

struct Reconciler {
    owner: String,
    components: IndexMap<String, ComponentFactory>,
    base: Sources,
    calculated: Rc<Calculated>,
    context: Stream<Value>,
    forward: Vec<String>,
    forwarded: Subject<Forwarded>,
    pulse: Subject<()>,
    runtime: Runtime,
    scheduler: Scheduler,
    child_debounce_ms: u64,
    max_depth: usize,
    diag: Diag,
}

impl Reconciler {
    fn reconcile(&self, prev: &Rc<Registry>, vnode: &VNode) -> Rc<Registry> {
        let scope = DiscoveryScope {
            parent: &self.owner,
            components: &self.components,
        };
        let discovery = match discover(vnode, &scope) {
            Ok(discovery) => discovery,
            Err(e) => {
                self.diag.error(format_args!("render skipped: {}", e));
                self.runtime.report(e);
                return Rc::clone(prev);
            }
        };

        let mut entries = IndexMap::new();
        for placeholder in &discovery.placeholders {
            if let Some(entry) = prev.entries.get(&placeholder.identity) {
                entry.props.push(placeholder.node.props_value());
                entry.children.push(placeholder.node.children.clone());
                entries.insert(placeholder.identity.clone(), Rc::clone(entry));
                continue;
            }
            match self.instantiate(placeholder) {
                Ok(entry) => {
                    self.diag.trace(format_args!(
                        "sub-component '{}' instantiated",
                        placeholder.identity
                    ));
                    entries.insert(placeholder.identity.clone(), Rc::new(entry));
                }
                Err(e) => {
                    self.diag.error(format_args!(
                        "sub-component '{}' failed: {}",
                        placeholder.identity, e
                    ));
                    self.runtime.report(e);
                    return Rc::clone(prev);
                }
            }
        }

        let changed = entries.len() != prev.entries.len()
            || entries.keys().any(|id| !prev.entries.contains_key(id));
        if changed {
            self.forwarded.push(Forwarded::collect(&entries, &self.forward));
        }

        Rc::new(Registry {
            root: Some(discovery.tree),
            entries,
        })
    }

    fn resolve(&self, of: &ComponentRef) -> Result<ComponentFactory> {
        match of {
            ComponentRef::Factory(factory) => Ok(factory.clone()),
            ComponentRef::Named(name) => self
                .components
                .get(name)
                .cloned()
                .ok_or_else(|| ComponentError::UnknownComponent(name.clone())),
        }
    }

    fn instantiate(&self, placeholder: &Placeholder) -> Result<Entry> {
        let node = &placeholder.node;
        let props_value = node.props_value();
        let props = Subject::with_initial(props_value.clone());
        let children = Subject::with_initial(node.children.clone());

        let mut sources = self.base.clone();
        sources.props = Some(props.stream());
        sources.children = Some(children.stream());
        sources.context = Some(self.context.clone());
        sources.child = None;

        let parent_state = self
            .base
            .state
            .as_ref()
            .map(StateSource::stream)
            .unwrap_or_else(|| Stream::of(Value::Null));

        let (label, mut sinks, gate_state) = match &placeholder.kind {
            PlaceholderKind::Collection => {
                let Some(Embed::Collection(options)) = &node.data.embed else {
                    return Err(ComponentError::InvalidCollection {
                        component: self.owner.clone(),
                        reason: "collection placeholder carries no options".to_string(),
                    });
                };
                let item = self.resolve(&options.of)?;
                let label = item.name().to_string();
                let sinks = instantiate_collection(
                    options,
                    item,
                    sources,
                    &self.forward,
                    &self.calculated,
                    &self.runtime,
                    &self.diag,
                )?;
                (label, sinks, parent_state)
            }
            PlaceholderKind::Switchable => {
                let Some(Embed::Switchable(options)) = &node.data.embed else {
                    return Err(ComponentError::InvalidSwitchable {
                        component: self.owner.clone(),
                        reason: "switchable placeholder carries no options".to_string(),
                    });
                };
                let gate = match options.state_binding() {
                    SwitchableState::Props => props
                        .stream()
                        .map(|p| p.get("state").cloned().unwrap_or(Value::Null)),
                    _ => parent_state,
                };
                let sinks = instantiate_switchable(
                    options,
                    sources,
                    &self.forward,
                    &self.calculated,
                    &self.runtime,
                    &self.diag,
                )?;
                (SWITCHABLE_SELECTOR.to_string(), sinks, gate)
            }
            PlaceholderKind::Named(name) => {
                let factory = self
                    .components
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ComponentError::UnknownComponent(name.clone()))?;
                let (sinks, gate) = self.instantiate_plain(&factory, &props_value, sources, parent_state)?;
                (name.clone(), sinks, gate)
            }
            PlaceholderKind::Factory(name) => {
                let Some(Embed::Factory(factory)) = &node.data.embed else {
                    return Err(ComponentError::MissingFactory(self.owner.clone()));
                };
                let (sinks, gate) = self.instantiate_plain(factory, &props_value, sources, parent_state)?;
                (name.clone(), sinks, gate)
            }
        };

        let rendered = sinks.view.remember();
        let pulse = self.pulse.clone();
        let max_depth = self.max_depth;
        sinks.view = gate_state
            .drop_repeats_by(move |a, b| deep_equal_bounded(a, b, max_depth))
            .map(move |_| {
                pulse.push(());
                rendered.clone()
            })
            .debounce(&self.scheduler, self.child_debounce_ms)
            .flatten()
            .remember();

        Ok(Entry {
            label,
            sinks,
            props,
            children,
        })
    }

    /// Plain components share the parent's state unless they are given
    /// props; with props, their state is derived from them and read-only.
    fn instantiate_plain(
        &self,
        factory: &ComponentFactory,
        props: &Value,
        mut sources: Sources,
        parent_state: Stream<Value>,
    ) -> Result<(Sinks, Stream<Value>)> {
        let has_state_prop = props.get("state").is_some();
        let no_props = props
            .as_object()
            .map_or(true, |object| object.keys().all(|key| key == "id"));

        if !has_state_prop && no_props {
            sources.props = Some(Subject::with_initial(Value::Null).stream());
            let sinks = factory.instantiate(sources, &self.runtime)?;
            return Ok((sinks, parent_state));
        }

        let derived = StateSource::new(
            sources
                .props
                .clone()
                .unwrap_or_else(|| Stream::of(Value::Null))
                .map(props_state),
        );
        let gate = derived.stream();
        sources.state = Some(derived);
        let mut sinks = factory.instantiate(sources, &self.runtime)?;
        let diag = self.diag.clone();
        let name = factory.name().to_string();
        sinks.state = sinks.state.filter(move |_| {
            diag.warn(format_args!(
                "'{}' gets its state from props and cannot update application state",
                name
            ));
            false
        });
        Ok((sinks, gate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_props_state_without_state_prop() {
        let props = json!({ "label": "x" });
        assert_eq!(props_state(&props), props);
    }

    #[test]
    fn test_props_state_merges_object_state() {
        let props = json!({ "label": "x", "state": { "count": 2, "label": "y" } });
        assert_eq!(props_state(&props), json!({ "label": "y", "count": 2 }));
    }

    #[test]
    fn test_props_state_scalar_state() {
        assert_eq!(props_state(&json!({ "state": 5, "other": 1 })), json!(5));
    }

    #[test]
    fn test_forwarded_channel_defaults_to_never() {
        let forwarded = Forwarded::empty();
        assert!(!forwarded.channel("ANY").is_active());
    }
}
