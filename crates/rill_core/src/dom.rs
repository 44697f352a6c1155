//! In-memory DOM event source
//!
//! Hosts without a real document (tests, headless runs) dispatch events by
//! selector and event name. Components select them through [`DomSource`].

use std::cell::RefCell;
use std::fmt;

use rill_stream::{Stream, Subject};
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::sources::DomSource;

/// Event channels keyed by `(selector, event)`
#[derive(Default)]
pub struct EventHub {
    channels: RefCell<FxHashMap<(String, String), Subject<Value>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, selector: &str, event: &str) -> Subject<Value> {
        self.channels
            .borrow_mut()
            .entry((selector.to_string(), event.to_string()))
            .or_default()
            .clone()
    }

    /// Deliver `payload` to everyone listening for `event` on `selector`.
    pub fn dispatch(&self, selector: &str, event: &str, payload: Value) {
        tracing::trace!(selector, event, "dom event dispatched");
        self.channel(selector, event).push(payload);
    }
}

impl DomSource for EventHub {
    fn events(&self, selector: &str, event: &str) -> Stream<Value> {
        self.channel(selector, event).stream()
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("channels", &self.channels.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_stream::Recorder;
    use serde_json::json;

    #[test]
    fn test_dispatch_reaches_matching_listener_only() {
        let hub = EventHub::new();
        let clicks = Recorder::new(&hub.events(".inc", "click"));
        let inputs = Recorder::new(&hub.events(".inc", "input"));

        hub.dispatch(".inc", "click", json!({ "x": 1 }));
        hub.dispatch(".dec", "click", json!({ "x": 2 }));

        assert_eq!(clicks.values(), vec![json!({ "x": 1 })]);
        assert!(inputs.is_empty());
    }

    #[test]
    fn test_dispatch_without_listeners_is_dropped() {
        let hub = EventHub::new();
        hub.dispatch(".a", "click", Value::Null);
        let rec = Recorder::new(&hub.events(".a", "click"));
        assert!(rec.is_empty());
    }
}
