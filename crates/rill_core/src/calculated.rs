//! Calculated fields
//!
//! Derived values merged into object state on read. The last computation is
//! memoized against its input state so repeated reads of the same state do not
//! re-run user code.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

/// A calculated field function
pub type CalcFn = Rc<dyn Fn(&Value) -> anyhow::Result<Value>>;

/// The calculated fields of one component instance
pub struct Calculated {
    component: String,
    fields: IndexMap<String, CalcFn>,
    store_in_state: bool,
    initial: Option<Value>,
    memo: RefCell<Option<(Value, Value)>>,
}

impl Calculated {
    pub fn new(
        component: impl Into<String>,
        fields: IndexMap<String, CalcFn>,
        store_in_state: bool,
        initial: Option<Value>,
    ) -> Self {
        Self {
            component: component.into(),
            fields,
            store_in_state,
            initial,
            memo: RefCell::new(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// State with every calculated field merged in.
    ///
    /// Non-object states are returned unchanged. A field whose function fails
    /// keeps the value it had in the previous result.
    pub fn apply(&self, state: &Value) -> Value {
        if self.fields.is_empty() {
            return state.clone();
        }
        let Value::Object(base) = state else {
            return state.clone();
        };
        if let Some((input, output)) = self.memo.borrow().as_ref() {
            if input == state {
                return output.clone();
            }
        }

        let previous = self.memo.borrow().as_ref().map(|(_, output)| output.clone());
        let mut merged: Map<String, Value> = base.clone();
        for (name, calc) in &self.fields {
            match calc(state) {
                Ok(value) => {
                    merged.insert(name.clone(), value);
                }
                Err(e) => {
                    tracing::warn!(
                        component = %self.component,
                        field = %name,
                        error = %e,
                        "calculated field failed; keeping previous value"
                    );
                    if let Some(prior) = previous.as_ref().and_then(|p| p.get(name)) {
                        merged.insert(name.clone(), prior.clone());
                    }
                }
            }
        }

        let output = Value::Object(merged);
        *self.memo.borrow_mut() = Some((state.clone(), output.clone()));
        output
    }

    /// Prepare a reducer result for storage.
    ///
    /// With `store_in_state` the calculated fields are recomputed and kept.
    /// Otherwise each one is reset to its initial-state value, or removed when
    /// the initial state has none.
    pub fn cleanup(&self, state: Value) -> Value {
        if self.fields.is_empty() {
            return state;
        }
        if self.store_in_state {
            return self.apply(&state);
        }
        let Value::Object(mut object) = state else {
            return state;
        };
        for name in self.fields.keys() {
            match self.initial.as_ref().and_then(|i| i.get(name)) {
                Some(initial) => {
                    object.insert(name.clone(), initial.clone());
                }
                None => {
                    object.shift_remove(name);
                }
            }
        }
        Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    fn double() -> CalcFn {
        Rc::new(|state: &Value| {
            let n = state["n"]
                .as_i64()
                .ok_or_else(|| anyhow::anyhow!("n is not a number"))?;
            Ok(json!(n * 2))
        })
    }

    fn fields(calc: CalcFn) -> IndexMap<String, CalcFn> {
        let mut map = IndexMap::new();
        map.insert("double".to_string(), calc);
        map
    }

    #[test]
    fn test_merges_into_object_state() {
        let calc = Calculated::new("T", fields(double()), true, None);
        assert_eq!(calc.apply(&json!({ "n": 2 })), json!({ "n": 2, "double": 4 }));
        assert_eq!(calc.apply(&json!(7)), json!(7));
    }

    #[test]
    fn test_memoized_on_same_input() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let calc_fn: CalcFn = Rc::new(move |_: &Value| {
            counter.set(counter.get() + 1);
            Ok(json!(true))
        });
        let calc = Calculated::new("T", fields(calc_fn), true, None);
        calc.apply(&json!({ "a": 1 }));
        calc.apply(&json!({ "a": 1 }));
        assert_eq!(calls.get(), 1);
        calc.apply(&json!({ "a": 2 }));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_error_keeps_previous_value() {
        let calc = Calculated::new("T", fields(double()), true, None);
        calc.apply(&json!({ "n": 3 }));
        assert_eq!(
            calc.apply(&json!({ "n": "oops" })),
            json!({ "n": "oops", "double": 6 })
        );
    }

    #[test]
    fn test_cleanup_without_storing() {
        let calc = Calculated::new("T", fields(double()), false, Some(json!({ "double": 0 })));
        assert_eq!(
            calc.cleanup(json!({ "n": 5, "double": 10 })),
            json!({ "n": 5, "double": 0 })
        );

        let calc = Calculated::new("T", fields(double()), false, None);
        assert_eq!(calc.cleanup(json!({ "n": 5, "double": 10 })), json!({ "n": 5 }));
    }
}
