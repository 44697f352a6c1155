//! State lenses
//!
//! A [`Lens`] maps a parent state shape onto a narrower child shape. Reads go
//! through `get`; child state transitions are lifted into parent transitions
//! through `set`.

use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};

/// A lazy state update, applied when folded against live state.
pub type Transition = Rc<dyn Fn(Value) -> Value>;

type Getter = Rc<dyn Fn(&Value) -> Value>;
type Setter = Rc<dyn Fn(&Value, Value) -> Value>;

/// A get/set pair between a parent state and a child state.
#[derive(Clone)]
pub struct Lens {
    get: Getter,
    set: Setter,
}

impl Lens {
    pub fn new<G, S>(get: G, set: S) -> Self
    where
        G: Fn(&Value) -> Value + 'static,
        S: Fn(&Value, Value) -> Value + 'static,
    {
        Self {
            get: Rc::new(get),
            set: Rc::new(set),
        }
    }

    /// The child sees and writes the whole parent state.
    pub fn identity() -> Self {
        Self::new(|state| state.clone(), |_, child| child)
    }

    /// Focus on one field of an object state.
    ///
    /// Reading a missing field yields `Null`. Writing into a non-object state
    /// replaces it with a single-field object.
    pub fn field(name: impl Into<String>) -> Self {
        let name: Rc<str> = Rc::from(name.into());
        let read = Rc::clone(&name);
        Self::new(
            move |state| state.get(&*read).cloned().unwrap_or(Value::Null),
            move |state, child| with_field(state, &name, child),
        )
    }

    /// Like [`Lens::field`], but writes are refused with a warning.
    ///
    /// Used when the field is calculated rather than stored.
    pub fn read_only_field(name: impl Into<String>, owner: impl Into<String>) -> Self {
        let name: Rc<str> = Rc::from(name.into());
        let owner: Rc<str> = Rc::from(owner.into());
        let read = Rc::clone(&name);
        Self::new(
            move |state| state.get(&*read).cloned().unwrap_or(Value::Null),
            move |state, _| {
                tracing::warn!(
                    component = %owner,
                    field = %name,
                    "sub-component attempted to update calculated field; update ignored"
                );
                state.clone()
            },
        )
    }

    pub fn get(&self, state: &Value) -> Value {
        (self.get)(state)
    }

    pub fn set(&self, state: &Value, child: Value) -> Value {
        (self.set)(state, child)
    }

    /// Compose: `self` focuses the parent, `inner` focuses further.
    pub fn then(&self, inner: &Lens) -> Lens {
        let outer_get = Rc::clone(&self.get);
        let inner_get = Rc::clone(&inner.get);
        let outer = self.clone();
        let inner = inner.clone();
        Self::new(
            move |state| inner_get(&outer_get(state)),
            move |state, child| {
                let middle = outer.get(state);
                outer.set(state, inner.set(&middle, child))
            },
        )
    }

    /// Turn a child-level transition into a parent-level one.
    pub fn lift(&self, transition: Transition) -> Transition {
        let lens = self.clone();
        Rc::new(move |parent: Value| {
            let child = lens.get(&parent);
            let next = transition(child);
            lens.set(&parent, next)
        })
    }
}

impl fmt::Debug for Lens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lens").finish_non_exhaustive()
    }
}

/// Copy of `state` with `field` set to `value`.
pub(crate) fn with_field(state: &Value, field: &str, value: Value) -> Value {
    let mut object = match state {
        Value::Object(object) => object.clone(),
        _ => Map::new(),
    };
    object.insert(field.to_string(), value);
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_field_lens_reads_and_writes() {
        let lens = Lens::field("count");
        let state = json!({ "count": 1, "other": true });
        assert_eq!(lens.get(&state), json!(1));
        assert_eq!(lens.set(&state, json!(5)), json!({ "count": 5, "other": true }));
    }

    #[test]
    fn test_missing_field_reads_null() {
        assert_eq!(Lens::field("nope").get(&json!({})), Value::Null);
    }

    #[test]
    fn test_read_only_field_ignores_writes() {
        let lens = Lens::read_only_field("total", "Cart");
        let state = json!({ "total": 3 });
        assert_eq!(lens.set(&state, json!(99)), state);
    }

    #[test]
    fn test_composed_lens() {
        let lens = Lens::field("a").then(&Lens::field("b"));
        let state = json!({ "a": { "b": 1, "c": 2 }, "d": 3 });
        assert_eq!(lens.get(&state), json!(1));
        assert_eq!(
            lens.set(&state, json!(7)),
            json!({ "a": { "b": 7, "c": 2 }, "d": 3 })
        );
    }

    #[test]
    fn test_lift_transition() {
        let lens = Lens::field("n");
        let inc: Transition = Rc::new(|n: Value| json!(n.as_i64().unwrap_or(0) + 1));
        let lifted = lens.lift(inc);
        assert_eq!(lifted(json!({ "n": 1, "x": 0 })), json!({ "n": 2, "x": 0 }));
    }

    proptest! {
        #[test]
        fn prop_field_lens_round_trip(key in "[a-z]{1,8}", n in any::<i64>(), other in any::<bool>()) {
            let lens = Lens::field(key.clone());
            let state = json!({ "other_field": other });
            let written = lens.set(&state, json!(n));
            prop_assert_eq!(lens.get(&written), json!(n));
            let again = lens.set(&written, lens.get(&written));
            prop_assert_eq!(lens.get(&again), lens.get(&written));
        }
    }
}
