//! Component specification and instantiation
//!
//! A [`ComponentSpec`] is the frozen description of a component: intent,
//! model, view and the optional extras (context, calculated fields, peers,
//! sub-components, request routes). [`instantiate`] wires one live instance
//! of it against a [`Sources`] bundle and returns its [`Sinks`].
//!
//! ```ignore
//! let counter = ComponentSpec::builder("Counter")
//!     .initial_state(json!({ "count": 0 }))
//!     .intent(|sources| Intent::named([("INC", sources.events(".inc", "click"))]))
//!     .on("INC", |state, _, _| json!({ "count": state["count"].as_i64().unwrap_or(0) + 1 }))
//!     .view(|p| VNode::element("div").child(VNode::text(format!("{}", p.state["count"]))))
//!     .build()?;
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rill_stream::{Stream, Subject};
use serde_json::{json, Value};

use crate::action::{Action, ActionBus, Intent, Next, INITIALIZE};
use crate::calculated::{CalcFn, Calculated};
use crate::context::{self, ContextEntry};
use crate::error::{ComponentError, Result};
use crate::lens::Transition;
use crate::model::{self, ActionModel, Model, Outcome, ReducerBank, SinkReducer};
use crate::render::{self, Forwarded, RenderSetup};
use crate::request::{self, RequestContext, RequestHandler, RequestMap, ResponseFn, ResponseSelector};
use crate::runtime::{Diag, Runtime};
use crate::sources::{ChannelNames, ChildMessage, ChildSource, Sinks, Sources, StateSource};
use crate::vnode::VNode;

const NOOP_ACTION: &str = "__NOOP__";

/// Builds the intent from the component's sources
pub type IntentFn = Rc<dyn Fn(&Sources) -> Intent>;

/// Renders a tree from the current view parameters
pub type ViewFn = Rc<dyn Fn(&ViewParams) -> Option<VNode>>;

/// Everything a view renders from
#[derive(Debug, Clone, Default)]
pub struct ViewParams {
    /// State with calculated fields merged in
    pub state: Value,
    pub props: Value,
    pub children: Vec<VNode>,
    pub context: Value,
    /// Rendered peer views by name
    pub peers: IndexMap<String, VNode>,
}

/// Whether an instance is the application root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Root,
    Nested,
}

type InstantiateFn = dyn Fn(Sources, &Runtime) -> Result<Sinks>;

/// Creates component instances; cheap to clone
#[derive(Clone)]
pub struct ComponentFactory {
    name: Rc<str>,
    build: Rc<InstantiateFn>,
}

impl ComponentFactory {
    pub fn new<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn(Sources, &Runtime) -> Result<Sinks> + 'static,
    {
        Self {
            name: Rc::from(name.into()),
            build: Rc::new(build),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instantiate(&self, sources: Sources, rt: &Runtime) -> Result<Sinks> {
        (self.build)(sources, rt)
    }

    /// Whether both handles create instances of the same component.
    pub fn ptr_eq(&self, other: &ComponentFactory) -> bool {
        Rc::ptr_eq(&self.build, &other.build)
    }
}

impl fmt::Debug for ComponentFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentFactory").field(&self.name).finish()
    }
}

/// A frozen component description
#[derive(Clone)]
pub struct ComponentSpec {
    pub(crate) name: String,
    pub(crate) intent: Option<IntentFn>,
    pub(crate) model: Model,
    pub(crate) view: Option<ViewFn>,
    pub(crate) request: Option<RequestMap>,
    pub(crate) response: Option<ResponseFn>,
    pub(crate) context: IndexMap<String, ContextEntry>,
    pub(crate) calculated: IndexMap<String, CalcFn>,
    pub(crate) peers: IndexMap<String, ComponentFactory>,
    pub(crate) components: IndexMap<String, ComponentFactory>,
    pub(crate) initial_state: Option<Value>,
    pub(crate) store_calculated_in_state: bool,
    pub(crate) debug: bool,
    pub(crate) names: ChannelNames,
}

impl ComponentSpec {
    pub fn builder(name: impl Into<String>) -> ComponentBuilder {
        ComponentBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel_names(&self) -> &ChannelNames {
        &self.names
    }

    /// Instantiate as a nested component.
    pub fn instantiate(&self, sources: Sources, rt: &Runtime) -> Result<Sinks> {
        instantiate(self, sources, rt, Role::Nested)
    }

    pub fn into_factory(self) -> ComponentFactory {
        let name = self.name.clone();
        let spec = Rc::new(self);
        ComponentFactory::new(name, move |sources, rt| instantiate(&spec, sources, rt, Role::Nested))
    }
}

impl fmt::Debug for ComponentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentSpec")
            .field("name", &self.name)
            .field("actions", &self.model.keys().collect::<Vec<_>>())
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .field("peers", &self.peers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ComponentSpec`]
pub struct ComponentBuilder {
    spec: ComponentSpec,
    state_reducers: Vec<(String, SinkReducer)>,
    duplicates: Vec<String>,
}

impl ComponentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            spec: ComponentSpec {
                name: name.into(),
                intent: None,
                model: Model::new(),
                view: None,
                request: None,
                response: None,
                context: IndexMap::new(),
                calculated: IndexMap::new(),
                peers: IndexMap::new(),
                components: IndexMap::new(),
                initial_state: None,
                store_calculated_in_state: true,
                debug: false,
                names: ChannelNames::default(),
            },
            state_reducers: Vec::new(),
            duplicates: Vec::new(),
        }
    }

    pub fn intent<F>(mut self, intent: F) -> Self
    where
        F: Fn(&Sources) -> Intent + 'static,
    {
        self.spec.intent = Some(Rc::new(intent));
        self
    }

    /// State reducer for `kind`.
    pub fn on<F, R>(mut self, kind: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(&Value, &Value, &Next) -> R + 'static,
        R: Into<Outcome>,
    {
        self.state_reducers
            .push((kind.into(), SinkReducer::reduce(reducer)));
        self
    }

    /// Reducer for `kind` feeding the named sink.
    pub fn on_sink<F, R>(self, kind: impl Into<String>, sink: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(&Value, &Value, &Next) -> R + 'static,
        R: Into<Outcome>,
    {
        self.reducer(kind, sink, SinkReducer::reduce(reducer))
    }

    pub fn reducer(mut self, kind: impl Into<String>, sink: impl Into<String>, reducer: SinkReducer) -> Self {
        self.spec
            .model
            .entry(kind.into())
            .or_default()
            .insert(sink.into(), reducer);
        self
    }

    /// Forward the action data of `kind` to `sink` unchanged.
    pub fn forward(self, kind: impl Into<String>, sink: impl Into<String>) -> Self {
        self.reducer(kind, sink, SinkReducer::Passthrough)
    }

    pub fn view<F, R>(mut self, view: F) -> Self
    where
        F: Fn(&ViewParams) -> R + 'static,
        R: Into<Option<VNode>>,
    {
        self.spec.view = Some(Rc::new(move |params: &ViewParams| view(params).into()));
        self
    }

    pub fn initial_state(mut self, state: Value) -> Self {
        self.spec.initial_state = Some(state);
        self
    }

    pub fn calculated<F>(mut self, field: impl Into<String>, calc: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<Value> + 'static,
    {
        self.spec.calculated.insert(field.into(), Rc::new(calc));
        self
    }

    pub fn store_calculated_in_state(mut self, store: bool) -> Self {
        self.spec.store_calculated_in_state = store;
        self
    }

    pub fn context(mut self, key: impl Into<String>, entry: ContextEntry) -> Self {
        self.spec.context.insert(key.into(), entry);
        self
    }

    /// A sibling instantiated once with this component's sources.
    pub fn peer(mut self, name: impl Into<String>, factory: ComponentFactory) -> Self {
        let name = name.into();
        self.check_unique(&name);
        self.spec.peers.insert(name, factory);
        self
    }

    /// A sub-component usable as a placeholder in the view.
    pub fn component(mut self, name: impl Into<String>, factory: ComponentFactory) -> Self {
        let name = name.into();
        self.check_unique(&name);
        self.spec.components.insert(name, factory);
        self
    }

    pub fn request(mut self, method: impl Into<String>, route: impl Into<String>, handler: RequestHandler) -> Self {
        self.spec
            .request
            .get_or_insert_with(RequestMap::new)
            .entry(method.into())
            .or_default()
            .insert(route.into(), handler);
        self
    }

    pub fn response<F>(mut self, response: F) -> Self
    where
        F: Fn(&ResponseSelector) -> IndexMap<String, Stream<Value>> + 'static,
    {
        self.spec.response = Some(Rc::new(response));
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.spec.debug = debug;
        self
    }

    pub fn channel_names(mut self, names: ChannelNames) -> Self {
        self.spec.names = names;
        self
    }

    fn check_unique(&mut self, name: &str) {
        if self.spec.peers.contains_key(name) || self.spec.components.contains_key(name) {
            self.duplicates.push(name.to_string());
        }
    }

    pub fn build(self) -> Result<ComponentSpec> {
        let ComponentBuilder {
            mut spec,
            state_reducers,
            duplicates,
        } = self;
        if let Some(name) = duplicates.into_iter().next() {
            return Err(ComponentError::DuplicateComponent {
                component: spec.name,
                name,
            });
        }
        if spec.response.is_some() && spec.request.is_none() {
            return Err(ComponentError::ResponseWithoutRequest(spec.name));
        }
        for (kind, reducer) in state_reducers {
            spec.model
                .entry(kind)
                .or_insert_with(ActionModel::new)
                .insert(spec.names.state.clone(), reducer);
        }
        Ok(spec)
    }
}

/// Wire one live instance of `spec`.
pub fn instantiate(spec: &ComponentSpec, sources: Sources, rt: &Runtime, role: Role) -> Result<Sinks> {
    let instance = rt.counter().next();
    let diag = Diag::new(&spec.name, instance, spec.debug);
    let names = spec.names.clone();
    let timing = rt.config().timing.clone();

    let mut initial_state = spec.initial_state.clone();
    let mut model = spec.model.clone();
    if role == Role::Root && spec.intent.is_none() && model.is_empty() {
        initial_state.get_or_insert_with(|| json!({}));
        let mut noop = ActionModel::new();
        noop.insert(
            names.state.clone(),
            SinkReducer::Reduce(Rc::new(|state, _, _, _| Outcome::Value(state.clone()))),
        );
        model.insert(NOOP_ACTION.to_string(), noop);
    }

    if sources.state.is_none() && model::writes_state(&spec.model, &names.state) {
        return Err(ComponentError::MissingStateSource {
            component: spec.name.clone(),
        });
    }
    let stateful = sources.state.is_some();
    let model = model::normalize(model, stateful, &names.state, &diag);
    diag.trace(format_args!("instantiated as {:?}", role));

    let calculated = Rc::new(Calculated::new(
        spec.name.clone(),
        spec.calculated.clone(),
        spec.store_calculated_in_state,
        initial_state.clone(),
    ));
    let current = Rc::new(RefCell::new(
        initial_state.clone().unwrap_or_else(|| json!({})),
    ));
    let is_sub = sources.props.is_some();

    let state_source = sources.state.as_ref().map(|incoming| {
        let current = Rc::clone(&current);
        StateSource::new(incoming.stream().inspect(move |s| *current.borrow_mut() = s.clone()))
    });

    let mut base = sources.clone();
    base.state = state_source.clone();
    base.child = None;

    let mut peers: IndexMap<String, Sinks> = IndexMap::new();
    for (name, factory) in &spec.peers {
        peers.insert(name.clone(), factory.instantiate(base.clone(), rt)?);
    }

    let forward = forwarded_channels(&sources, &model, &names);
    let forwarded = Subject::with_initial(Forwarded::empty());

    let mut child_streams = vec![forwarded.stream().map(|f| f.parent.clone()).flatten()];
    for (name, sinks) in &peers {
        let name = name.clone();
        child_streams.push(sinks.parent.map(move |data| ChildMessage {
            component: name.clone(),
            data: data.clone(),
        }));
    }
    let mut local = base.clone();
    local.child = Some(ChildSource::new(Stream::merge(child_streams)));

    let intent = spec
        .intent
        .as_ref()
        .map(|intent| intent(&local).into_actions())
        .unwrap_or_else(Stream::never);
    let hydrate = sources.request.as_ref().and_then(|r| r.initial());
    let bus = ActionBus::new(
        intent,
        hydrate,
        rt.scheduler(),
        timing.bootstrap_delay_ms,
        timing.next_delay_ms,
        diag.clone(),
    );

    let state_actions = match &initial_state {
        Some(initial) if stateful => Stream::merge(vec![
            Stream::of(Action::new(INITIALIZE, initial.clone())).delay(rt.scheduler(), 0),
            bus.actions(),
        ]),
        _ => bus.actions(),
    };

    let bank = ReducerBank {
        bus: bus.clone(),
        state_actions,
        calculated: Rc::clone(&calculated),
        current: Rc::clone(&current),
        mirror: is_sub,
        state_sink: names.state.clone(),
        diag: diag.clone(),
    };
    let mut outputs = bank.build(&model);

    let mut request_sink: Option<Stream<Value>> = None;
    if let Some(map) = &spec.request {
        let source = sources.request.clone().ok_or_else(|| ComponentError::MissingRequestSource {
            component: spec.name.clone(),
            source_name: names.request.clone(),
        })?;
        let responses = request::wire_requests(
            map,
            &RequestContext {
                source,
                bus: &bus,
                current: Rc::clone(&current),
                calculated: Rc::clone(&calculated),
                diag: &diag,
            },
        )?;
        request_sink = Some(match &spec.response {
            Some(response) => request::wire_responses(response, responses, rt, &diag),
            None => {
                let unhandled = diag.clone();
                responses.filter(move |value| {
                    unhandled.warn(format_args!("unhandled response: {}", value));
                    false
                })
            }
        });
    }

    let calc_state = match &state_source {
        Some(state) => {
            let calculated = Rc::clone(&calculated);
            state.stream().map(move |s| calculated.apply(s))
        }
        None => Stream::of(json!({})).remember(),
    };
    let context = context::resolve(
        &spec.context,
        calc_state.clone(),
        sources.context.clone(),
        rt.config().equality.max_depth,
    );

    let view = match &spec.view {
        Some(view) => render::pipeline(RenderSetup {
            spec,
            view: Rc::clone(view),
            base: base.clone(),
            state: calc_state,
            calculated: Rc::clone(&calculated),
            context,
            peers: &peers,
            forward: &forward,
            forwarded: forwarded.clone(),
            runtime: rt,
            diag: diag.clone(),
        }),
        None => Stream::of(VNode::empty()).remember(),
    };

    let mut state_inputs: Vec<Stream<Transition>> = vec![
        outputs.state.clone(),
        forwarded.stream().map(|f| f.state.clone()).flatten(),
    ];
    state_inputs.extend(peers.values().map(|p| p.state.clone()));
    if let Some(state) = &state_source {
        state_inputs.push(state.stream().filter_map(|_| None::<Transition>));
    }

    let parent = outputs
        .channels
        .shift_remove(&names.parent)
        .unwrap_or_else(Stream::never);
    let has_parent = model.values().any(|sinks| sinks.contains_key(&names.parent));

    let mut channels = IndexMap::new();
    for name in &forward {
        let mut inputs = vec![
            outputs.channels.get(name).cloned().unwrap_or_else(Stream::never),
            {
                let name = name.clone();
                forwarded.stream().map(move |f| f.channel(&name)).flatten()
            },
        ];
        inputs.extend(peers.values().map(|p| p.channel(name)));
        if *name == names.request {
            if let Some(sent) = &request_sink {
                inputs.push(sent.clone());
            }
        }
        channels.insert(name.clone(), Stream::merge(inputs));
    }

    Ok(Sinks {
        state: Stream::merge(state_inputs),
        view,
        parent,
        channels,
        names,
        has_state: stateful,
        has_parent,
    })
}

/// Channels aggregated from model, sub-components and peers: every
/// generic source, the request channel when served, and every non-state
/// sink the model declares.
fn forwarded_channels(sources: &Sources, model: &Model, names: &ChannelNames) -> Vec<String> {
    let mut forward: Vec<String> = sources.channels.keys().cloned().collect();
    if sources.request.is_some() {
        forward.push(names.request.clone());
    }
    for sinks in model.values() {
        for sink in sinks.keys() {
            if *sink != names.state && *sink != names.parent && *sink != names.dom {
                forward.push(sink.clone());
            }
        }
    }
    let mut seen = rustc_hash::FxHashSet::default();
    forward.retain(|name| seen.insert(name.clone()));
    forward
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> ComponentFactory {
        ComponentSpec::builder("Noop").build().unwrap().into_factory()
    }

    #[test]
    fn test_builder_rejects_duplicate_names() {
        let err = ComponentSpec::builder("App")
            .peer("Side", noop())
            .component("Side", noop())
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ComponentError::DuplicateComponent {
                component: "App".into(),
                name: "Side".into()
            }
        );
    }

    #[test]
    fn test_builder_rejects_response_without_request() {
        let err = ComponentSpec::builder("Api")
            .response(|_| IndexMap::new())
            .build()
            .unwrap_err();
        assert_eq!(err, ComponentError::ResponseWithoutRequest("Api".into()));
    }

    #[test]
    fn test_state_reducers_use_channel_names() {
        let spec = ComponentSpec::builder("C")
            .on("INC", |s, _, _| s.clone())
            .channel_names(ChannelNames {
                state: "STORE".into(),
                ..ChannelNames::default()
            })
            .build()
            .unwrap();
        assert!(spec.model["INC"].contains_key("STORE"));
    }

    #[test]
    fn test_factory_identity() {
        let a = noop();
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&noop()));
        assert_eq!(a.name(), "Noop");
    }

    #[test]
    fn test_missing_state_source() {
        let spec = ComponentSpec::builder("NeedsState")
            .on("X", |s, _, _| s.clone())
            .build()
            .unwrap();
        let err = spec.instantiate(Sources::new(), &Runtime::default()).unwrap_err();
        assert!(matches!(err, ComponentError::MissingStateSource { .. }));
    }

    #[test]
    fn test_missing_request_source() {
        let spec = ComponentSpec::builder("Api")
            .request("get", "/", RequestHandler::Action("LIST".into()))
            .build()
            .unwrap();
        let err = spec.instantiate(Sources::new(), &Runtime::default()).unwrap_err();
        assert!(matches!(err, ComponentError::MissingRequestSource { .. }));
    }

    #[test]
    fn test_sink_completeness() {
        let spec = ComponentSpec::builder("Full")
            .on_sink("PING", "EVENTS", |_, d, _| d.clone())
            .build()
            .unwrap();
        let sources = Sources::new()
            .with_state(StateSource::new(Stream::of(json!({}))))
            .with_channel("LOG", Stream::never());
        let sinks = spec.instantiate(sources, &Runtime::default()).unwrap();
        assert_eq!(sinks.channel_names(), vec!["STATE", "DOM", "LOG", "EVENTS"]);
    }
}
