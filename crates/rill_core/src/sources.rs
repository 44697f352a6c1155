//! Sources and sinks
//!
//! A component reads from a [`Sources`] bundle and writes to a [`Sinks`]
//! bundle. Well-known channels have typed fields; every other channel is an
//! opaque `Stream<Value>` keyed by name.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rill_stream::Stream;
use serde_json::Value;

use crate::action::Request;
use crate::equality::deep_equal;
use crate::lens::{Lens, Transition};
use crate::vnode::VNode;

/// Names of the well-known channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    pub state: String,
    pub dom: String,
    pub request: String,
    pub parent: String,
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            state: "STATE".to_string(),
            dom: "DOM".to_string(),
            request: "HTTP".to_string(),
            parent: "PARENT".to_string(),
        }
    }
}

/// Readable state with lens isolation
#[derive(Clone)]
pub struct StateSource {
    stream: Stream<Value>,
}

impl StateSource {
    /// Wrap a state stream; the stream is remembered so late readers see the
    /// current state.
    pub fn new(stream: Stream<Value>) -> Self {
        Self {
            stream: stream.remember(),
        }
    }

    pub fn stream(&self) -> Stream<Value> {
        self.stream.clone()
    }

    /// A child view of this state through `lens`.
    pub fn isolate(&self, lens: &Lens) -> StateSource {
        let lens = lens.clone();
        StateSource::new(
            self.stream
                .map(move |state| lens.get(state))
                .drop_repeats_by(deep_equal),
        )
    }
}

impl fmt::Debug for StateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSource")
            .field("current", &self.stream.last())
            .finish()
    }
}

/// User interaction events
pub trait DomSource {
    /// Events of type `event` on elements matching `selector`.
    fn events(&self, selector: &str, event: &str) -> Stream<Value>;
}

/// Incoming requests and their responses
pub trait RequestSource {
    /// Requests for `method` on route `pattern`, or `None` when the method is
    /// not served.
    fn route(&self, method: &str, pattern: &str) -> Option<Stream<Request>>;

    /// Server-provided initial data, delivered as `HYDRATE` actions.
    fn initial(&self) -> Option<Stream<Value>> {
        None
    }

    /// Responses correlated to the given request ids.
    fn responses(&self, ids: &[String]) -> Stream<Value>;
}

/// A message sent upward by a sub-component
#[derive(Debug, Clone, PartialEq)]
pub struct ChildMessage {
    pub component: String,
    pub data: Value,
}

/// Messages from sub-components, available to the parent's intent
#[derive(Clone)]
pub struct ChildSource {
    messages: Stream<ChildMessage>,
}

impl ChildSource {
    pub fn new(messages: Stream<ChildMessage>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> Stream<ChildMessage> {
        self.messages.clone()
    }

    /// Payloads sent by sub-components named `component`.
    pub fn select(&self, component: &str) -> Stream<Value> {
        let component = component.to_string();
        self.messages
            .filter_map(move |msg| (msg.component == component).then(|| msg.data.clone()))
    }
}

/// Input channels of a component
#[derive(Clone, Default)]
pub struct Sources {
    pub state: Option<StateSource>,
    pub dom: Option<Rc<dyn DomSource>>,
    pub request: Option<Rc<dyn RequestSource>>,
    pub props: Option<Stream<Value>>,
    pub children: Option<Stream<Vec<VNode>>>,
    pub context: Option<Stream<Value>>,
    pub child: Option<ChildSource>,
    pub channels: IndexMap<String, Stream<Value>>,
}

impl Sources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: StateSource) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_dom(mut self, dom: Rc<dyn DomSource>) -> Self {
        self.dom = Some(dom);
        self
    }

    pub fn with_request(mut self, request: Rc<dyn RequestSource>) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_props(mut self, props: Stream<Value>) -> Self {
        self.props = Some(props);
        self
    }

    pub fn with_channel(mut self, name: impl Into<String>, stream: Stream<Value>) -> Self {
        self.channels.insert(name.into(), stream);
        self
    }

    /// Shorthand for `dom.events(selector, event)`; never emits without a DOM
    /// source.
    pub fn events(&self, selector: &str, event: &str) -> Stream<Value> {
        match &self.dom {
            Some(dom) => dom.events(selector, event),
            None => Stream::never(),
        }
    }

    /// Upward messages from sub-components named `component`.
    pub fn child(&self, component: &str) -> Stream<Value> {
        match &self.child {
            Some(child) => child.select(component),
            None => Stream::never(),
        }
    }
}

/// Output channels of a component
#[derive(Clone)]
pub struct Sinks {
    pub state: Stream<Transition>,
    pub view: Stream<VNode>,
    pub parent: Stream<Value>,
    pub channels: IndexMap<String, Stream<Value>>,
    pub(crate) names: ChannelNames,
    pub(crate) has_state: bool,
    pub(crate) has_parent: bool,
}

impl Sinks {
    /// A bundle where every channel is silent.
    pub fn empty(names: ChannelNames) -> Self {
        Self {
            state: Stream::never(),
            view: Stream::never(),
            parent: Stream::never(),
            channels: IndexMap::new(),
            names,
            has_state: false,
            has_parent: false,
        }
    }

    /// Named output channel, or `never()` when absent.
    pub fn channel(&self, name: &str) -> Stream<Value> {
        self.channels.get(name).cloned().unwrap_or_else(Stream::never)
    }

    /// Every channel present in this bundle.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.channels.len() + 3);
        if self.has_state {
            names.push(self.names.state.clone());
        }
        names.push(self.names.dom.clone());
        names.extend(self.channels.keys().cloned());
        if self.has_parent {
            names.push(self.names.parent.clone());
        }
        names
    }
}

impl fmt::Debug for Sinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sinks")
            .field("channels", &self.channel_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_stream::{Recorder, Subject};
    use serde_json::json;

    #[test]
    fn test_isolate_drops_unchanged_slices() {
        let state = Subject::new();
        let source = StateSource::new(state.stream());
        let counter = source.isolate(&Lens::field("count"));
        let rec = Recorder::new(&counter.stream());

        state.push(json!({ "count": 1, "other": 1 }));
        state.push(json!({ "count": 1, "other": 2 }));
        state.push(json!({ "count": 2, "other": 2 }));
        assert_eq!(rec.values(), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_child_source_select() {
        let messages = Subject::new();
        let child = ChildSource::new(messages.stream());
        let rec = Recorder::new(&child.select("Item"));
        messages.push(ChildMessage {
            component: "Other".into(),
            data: json!(0),
        });
        messages.push(ChildMessage {
            component: "Item".into(),
            data: json!(1),
        });
        assert_eq!(rec.values(), vec![json!(1)]);
    }

    #[test]
    fn test_channel_names() {
        let mut sinks = Sinks::empty(ChannelNames::default());
        sinks.has_state = true;
        sinks.channels.insert("EVENTS".into(), Stream::never());
        assert_eq!(sinks.channel_names(), vec!["STATE", "DOM", "EVENTS"]);
    }
}
