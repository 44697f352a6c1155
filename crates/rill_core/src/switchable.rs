//! Switchables
//!
//! A switchable holds several variant components and shows one at a time.
//! All variants are instantiated up front; only the active one renders and
//! forwards its sinks. Inactive variants receive no state updates, so their
//! local state survives being switched away from.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use rill_stream::Stream;
use serde_json::Value;

use crate::calculated::Calculated;
use crate::component::ComponentFactory;
use crate::error::{ComponentError, Result};
use crate::lens::{Lens, Transition};
use crate::runtime::{Diag, Runtime};
use crate::sources::{ChannelNames, Sinks, Sources, StateSource};
use crate::vnode::{Embed, VNode, SWITCHABLE_SELECTOR};

/// How the active variant name is chosen
#[derive(Clone)]
pub enum CurrentSelector {
    /// The placeholder's `current` prop
    Prop,
    /// A function of the switchable's state
    Select(Rc<dyn Fn(&Value) -> Option<String>>),
}

/// What the variants see as state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchableState {
    /// The enclosing component's whole state
    Whole,
    /// One field of it
    Field(String),
    /// The placeholder's `state` prop; writes are blocked
    Props,
}

/// Configuration of a switchable placeholder
#[derive(Clone)]
pub struct SwitchableOptions {
    variants: IndexMap<String, ComponentFactory>,
    current: CurrentSelector,
    state: SwitchableState,
}

impl SwitchableOptions {
    pub fn new() -> Self {
        Self {
            variants: IndexMap::new(),
            current: CurrentSelector::Prop,
            state: SwitchableState::Whole,
        }
    }

    pub fn variant(mut self, name: impl Into<String>, factory: ComponentFactory) -> Self {
        self.variants.insert(name.into(), factory);
        self
    }

    /// Choose the active variant from state instead of the `current` prop.
    pub fn select<F>(mut self, selector: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + 'static,
    {
        self.current = CurrentSelector::Select(Rc::new(selector));
        self
    }

    pub fn state_field(mut self, field: impl Into<String>) -> Self {
        self.state = SwitchableState::Field(field.into());
        self
    }

    pub fn state_from_props(mut self) -> Self {
        self.state = SwitchableState::Props;
        self
    }

    pub fn variants(&self) -> &IndexMap<String, ComponentFactory> {
        &self.variants
    }

    pub fn current_selector(&self) -> &CurrentSelector {
        &self.current
    }

    pub fn state_binding(&self) -> &SwitchableState {
        &self.state
    }

    pub fn into_node(self) -> VNode {
        VNode::element(SWITCHABLE_SELECTOR).embed(Embed::Switchable(Rc::new(self)))
    }
}

impl Default for SwitchableOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Instantiate a switchable. `base` carries the enclosing state and the
/// placeholder's props, children and context.
pub(crate) fn instantiate_switchable(
    options: &SwitchableOptions,
    base: Sources,
    forward: &[String],
    calculated: &Calculated,
    rt: &Runtime,
    diag: &Diag,
) -> Result<Sinks> {
    let props = base.props.clone().unwrap_or_else(|| Stream::of(Value::Null));
    let missing_state = || ComponentError::MissingStateSource {
        component: format!("{} switchable", diag.component()),
    };

    let (state, write_lens): (StateSource, Option<Lens>) = match &options.state {
        SwitchableState::Whole => (base.state.clone().ok_or_else(missing_state)?, Some(Lens::identity())),
        SwitchableState::Field(field) => {
            let lens = if calculated.contains(field) {
                Lens::read_only_field(field.clone(), diag.component())
            } else {
                Lens::field(field.clone())
            };
            let parent = base.state.clone().ok_or_else(missing_state)?;
            (parent.isolate(&lens), Some(lens))
        }
        SwitchableState::Props => (
            StateSource::new(props.map(|p| p.get("state").cloned().unwrap_or(Value::Null))),
            None,
        ),
    };

    let names = match &options.current {
        CurrentSelector::Prop => {
            props.filter_map(|p| p.get("current").and_then(|c| c.as_str()).map(str::to_string))
        }
        CurrentSelector::Select(select) => {
            let select = Rc::clone(select);
            state.stream().filter_map(move |s| select(s))
        }
    };
    let known: Vec<String> = options.variants.keys().cloned().collect();
    let warn = diag.clone();
    let active: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
    let track = Rc::clone(&active);
    let names = names
        .filter(move |name| {
            let ok = known.contains(name);
            if !ok {
                warn.warn(format_args!("switchable variant '{}' not found; keeping the previous one", name));
            }
            ok
        })
        .drop_repeats()
        .inspect(move |name| *track.borrow_mut() = Some(name.clone()))
        .remember();

    let mut variants: IndexMap<String, Sinks> = IndexMap::new();
    for (name, factory) in &options.variants {
        let wanted = name.clone();
        let variant_state = names
            .combine_with(&state.stream())
            .filter_map(move |(active, s)| (*active == wanted).then(|| s.clone()));
        let mut sources = base.clone();
        sources.state = Some(StateSource::new(variant_state));
        sources.child = None;
        variants.insert(name.clone(), factory.instantiate(sources, rt)?);
    }
    let variants = Rc::new(variants);

    let views = Rc::clone(&variants);
    let view = names
        .map(move |name| {
            views
                .get(name)
                .map(|s| s.view.clone())
                .unwrap_or_else(Stream::never)
        })
        .flatten()
        .remember();

    let gate = |select: &dyn Fn(&Sinks) -> Stream<Value>| -> Stream<Value> {
        Stream::merge(
            variants
                .iter()
                .map(|(name, sinks)| {
                    let name = name.clone();
                    let active = Rc::clone(&active);
                    select(sinks).filter(move |_| active.borrow().as_deref() == Some(name.as_str()))
                })
                .collect(),
        )
    };

    let parent = gate(&|s: &Sinks| s.parent.clone());
    let mut channels = IndexMap::new();
    for name in forward {
        channels.insert(name.clone(), gate(&|s: &Sinks| s.channel(name)));
    }

    let transitions: Stream<Transition> = Stream::merge(
        variants
            .iter()
            .map(|(name, sinks)| {
                let name = name.clone();
                let active = Rc::clone(&active);
                sinks
                    .state
                    .filter(move |_| active.borrow().as_deref() == Some(name.as_str()))
            })
            .collect(),
    );
    let state_sink = match write_lens {
        Some(lens) => transitions.map(move |t| lens.lift(Rc::clone(t))),
        None => {
            let blocked = diag.clone();
            transitions.filter(move |_| {
                blocked.warn(format_args!("switchable state comes from props; state update ignored"));
                false
            })
        }
    };

    Ok(Sinks {
        state: state_sink,
        view,
        parent,
        channels,
        names: ChannelNames::default(),
        has_state: true,
        has_parent: true,
    })
}
