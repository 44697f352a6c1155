//! Context propagation
//!
//! Context flows down the component tree. Each component shallow-merges its
//! own entries over the context it received; local keys win.

use std::rc::Rc;

use indexmap::IndexMap;
use rill_stream::Stream;
use serde_json::{Map, Value};

use crate::equality::deep_equal_bounded;

/// How one context key is computed from the component's state
#[derive(Clone)]
pub enum ContextEntry {
    /// Value of the named state field
    Field(String),
    /// Value of the state field with the same name as the context key
    Flag,
    /// Computed from the whole state
    Derive(Rc<dyn Fn(&Value) -> Value>),
}

impl ContextEntry {
    pub fn derive<F: Fn(&Value) -> Value + 'static>(f: F) -> Self {
        ContextEntry::Derive(Rc::new(f))
    }

    fn resolve(&self, key: &str, state: &Value) -> Value {
        let field = match self {
            ContextEntry::Field(field) => field.as_str(),
            ContextEntry::Flag => key,
            ContextEntry::Derive(f) => return f(state),
        };
        state.get(field).cloned().unwrap_or(Value::Null)
    }
}

/// Local context values computed from `state`.
pub fn local_context(entries: &IndexMap<String, ContextEntry>, state: &Value) -> Map<String, Value> {
    entries
        .iter()
        .map(|(key, entry)| (key.clone(), entry.resolve(key, state)))
        .collect()
}

/// Shallow merge; keys of `local` win.
pub fn merge_context(parent: &Value, local: Map<String, Value>) -> Value {
    let mut merged = match parent {
        Value::Object(object) => object.clone(),
        _ => Map::new(),
    };
    merged.extend(local);
    Value::Object(merged)
}

/// The resolved context stream of a component.
pub(crate) fn resolve(
    entries: &IndexMap<String, ContextEntry>,
    state: Stream<Value>,
    parent: Option<Stream<Value>>,
    max_depth: usize,
) -> Stream<Value> {
    let parent = parent.unwrap_or_else(|| Stream::of(Value::Object(Map::new())));
    if entries.is_empty() {
        return parent
            .drop_repeats_by(move |a, b| deep_equal_bounded(a, b, max_depth))
            .remember();
    }
    let entries = entries.clone();
    parent
        .combine_with(&state)
        .map(move |(parent, state)| merge_context(parent, local_context(&entries, state)))
        .drop_repeats_by(move |a, b| deep_equal_bounded(a, b, max_depth))
        .remember()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_stream::{Recorder, Subject};
    use serde_json::json;

    fn entries() -> IndexMap<String, ContextEntry> {
        let mut entries = IndexMap::new();
        entries.insert("theme".to_string(), ContextEntry::Field("mode".into()));
        entries.insert("admin".to_string(), ContextEntry::Flag);
        entries.insert(
            "count".to_string(),
            ContextEntry::derive(|s| json!(s["items"].as_array().map_or(0, |a| a.len()))),
        );
        entries
    }

    #[test]
    fn test_local_context() {
        let state = json!({ "mode": "dark", "admin": true, "items": [1, 2] });
        assert_eq!(
            Value::Object(local_context(&entries(), &state)),
            json!({ "theme": "dark", "admin": true, "count": 2 })
        );
    }

    #[test]
    fn test_local_keys_win() {
        let merged = merge_context(
            &json!({ "theme": "light", "lang": "en" }),
            local_context(&entries(), &json!({ "mode": "dark" })),
        );
        assert_eq!(merged["theme"], json!("dark"));
        assert_eq!(merged["lang"], json!("en"));
    }

    #[test]
    fn test_resolved_stream_deduplicates() {
        let state = Subject::new();
        let parent = Subject::with_initial(json!({ "lang": "en" }));
        let ctx = resolve(&entries(), state.stream(), Some(parent.stream()), 32);
        let rec = Recorder::new(&ctx);

        state.push(json!({ "mode": "dark", "other": 1 }));
        state.push(json!({ "mode": "dark", "other": 2 }));
        parent.push(json!({ "lang": "fr" }));
        assert_eq!(rec.len(), 2);
        assert_eq!(rec.last().unwrap()["lang"], json!("fr"));
    }
}
