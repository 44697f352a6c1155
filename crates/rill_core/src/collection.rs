//! Collections
//!
//! A collection renders one component instance per item of a list held in
//! state. Items are keyed by their `id` field (or their position when they
//! have none) so instances survive reordering, and each item instance sees
//! only its own item as state.
//!
//! ```ignore
//! let list = CollectionOptions::new("TodoItem")
//!     .from("todos")
//!     .filter(|todo| !todo["done"].as_bool().unwrap_or(false))
//!     .sort("priority dec")
//!     .sort("title")
//!     .into_node();
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rill_stream::Stream;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::calculated::Calculated;
use crate::component::ComponentFactory;
use crate::equality::deep_equal;
use crate::error::{ComponentError, Result};
use crate::lens::{with_field, Lens, Transition};
use crate::runtime::{Diag, Runtime};
use crate::sources::{Sinks, Sources, StateSource};
use crate::vnode::{Embed, VNode, COLLECTION_SELECTOR};

/// The component rendered for each item
#[derive(Clone)]
pub enum ComponentRef {
    /// Looked up in the enclosing component's registry
    Named(String),
    Factory(ComponentFactory),
}

impl From<&str> for ComponentRef {
    fn from(name: &str) -> Self {
        ComponentRef::Named(name.to_string())
    }
}

impl From<String> for ComponentRef {
    fn from(name: String) -> Self {
        ComponentRef::Named(name)
    }
}

impl From<ComponentFactory> for ComponentRef {
    fn from(factory: ComponentFactory) -> Self {
        ComponentRef::Factory(factory)
    }
}

impl fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentRef::Named(name) => write!(f, "Named({})", name),
            ComponentRef::Factory(factory) => write!(f, "Factory({})", factory.name()),
        }
    }
}

/// Where the list lives in the enclosing state
#[derive(Clone, Debug)]
pub enum CollectionSource {
    /// The state itself is the list
    Whole,
    Field(String),
    Lens(Lens),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Dec,
}

impl SortDirection {
    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ordering,
            SortDirection::Dec => ordering.reverse(),
        }
    }
}

/// Custom item ordering
pub type Comparator = Rc<dyn Fn(&Value, &Value) -> Ordering>;

/// One sort criterion; criteria apply in order, later ones break ties
#[derive(Clone)]
pub enum SortKey {
    /// Compare the items themselves
    Item(SortDirection),
    Field(String, SortDirection),
    FieldWith(String, Comparator),
    Compare(Comparator),
}

impl SortKey {
    /// Parse `"asc"`, `"dec"`, `"field"` or `"field asc|dec"`.
    pub fn parse(spec: &str) -> SortKey {
        let mut parts = spec.split_whitespace();
        let first = parts.next().unwrap_or_default();
        let direction = |token: &str| match token.to_ascii_lowercase().as_str() {
            "dec" | "desc" => Some(SortDirection::Dec),
            "asc" => Some(SortDirection::Asc),
            _ => None,
        };
        match parts.next() {
            None => match direction(first) {
                Some(dir) => SortKey::Item(dir),
                None => SortKey::Field(first.to_string(), SortDirection::Asc),
            },
            Some(token) => SortKey::Field(
                first.to_string(),
                direction(token).unwrap_or(SortDirection::Asc),
            ),
        }
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match self {
            SortKey::Item(dir) => dir.apply(compare_values(a, b)),
            SortKey::Field(field, dir) => dir.apply(compare_values(field_of(a, field), field_of(b, field))),
            SortKey::FieldWith(field, cmp) => cmp(field_of(a, field), field_of(b, field)),
            SortKey::Compare(cmp) => cmp(a, b),
        }
    }
}

impl From<&str> for SortKey {
    fn from(spec: &str) -> Self {
        SortKey::parse(spec)
    }
}

impl fmt::Debug for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortKey::Item(dir) => write!(f, "Item({:?})", dir),
            SortKey::Field(field, dir) => write!(f, "Field({}, {:?})", field, dir),
            SortKey::FieldWith(field, _) => write!(f, "FieldWith({}, <fn>)", field),
            SortKey::Compare(_) => f.write_str("Compare(<fn>)"),
        }
    }
}

fn field_of<'v>(value: &'v Value, field: &str) -> &'v Value {
    value.get(field).unwrap_or(&Value::Null)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Natural ordering of JSON values; mixed types order by kind.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(x, y)| compare_values(x, y))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Item predicate
pub type ItemFilter = Rc<dyn Fn(&Value) -> bool>;

/// Configuration of a collection placeholder
#[derive(Clone)]
pub struct CollectionOptions {
    pub(crate) of: ComponentRef,
    pub(crate) from: CollectionSource,
    pub(crate) filter: Option<ItemFilter>,
    pub(crate) sort: Vec<SortKey>,
    pub(crate) id_field: String,
}

impl CollectionOptions {
    pub fn new(of: impl Into<ComponentRef>) -> Self {
        Self {
            of: of.into(),
            from: CollectionSource::Whole,
            filter: None,
            sort: Vec::new(),
            id_field: "id".to_string(),
        }
    }

    /// Read the list from a state field.
    pub fn from(mut self, field: impl Into<String>) -> Self {
        self.from = CollectionSource::Field(field.into());
        self
    }

    pub fn from_lens(mut self, lens: Lens) -> Self {
        self.from = CollectionSource::Lens(lens);
        self
    }

    pub fn filter<F: Fn(&Value) -> bool + 'static>(mut self, filter: F) -> Self {
        self.filter = Some(Rc::new(filter));
        self
    }

    /// Add a sort criterion.
    pub fn sort(mut self, key: impl Into<SortKey>) -> Self {
        self.sort.push(key.into());
        self
    }

    pub fn sort_by<F: Fn(&Value, &Value) -> Ordering + 'static>(self, cmp: F) -> Self {
        self.sort(SortKey::Compare(Rc::new(cmp)))
    }

    /// Field holding each item's id; `id` by default.
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    pub fn into_node(self) -> VNode {
        VNode::element(COLLECTION_SELECTOR).embed(Embed::Collection(Rc::new(self)))
    }

    pub(crate) fn validate(&self, component: &str) -> Result<()> {
        if let CollectionSource::Field(field) = &self.from {
            if field.is_empty() {
                return Err(ComponentError::InvalidCollection {
                    component: component.to_string(),
                    reason: "'from' must be a non-empty field name or a lens".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// An item with its identity
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub key: String,
    pub value: Value,
}

/// Projection of a stored list onto its visible, ordered items
#[derive(Clone)]
pub struct CollectionLens {
    source: CollectionSource,
    filter: Option<ItemFilter>,
    sort: Vec<SortKey>,
    id_field: String,
    read_only: bool,
    owner: String,
}

impl CollectionLens {
    pub fn new(options: &CollectionOptions, owner: impl Into<String>) -> Self {
        Self {
            source: options.from.clone(),
            filter: options.filter.clone(),
            sort: options.sort.clone(),
            id_field: options.id_field.clone(),
            read_only: false,
            owner: owner.into(),
        }
    }

    /// Refuse writes into a source field that is calculated.
    pub(crate) fn guard(mut self, calculated: &Calculated) -> Self {
        if let CollectionSource::Field(field) = &self.source {
            self.read_only = calculated.contains(field);
        }
        self
    }

    /// Identity of `item` stored at `index`.
    pub fn key_of(&self, item: &Value, index: usize) -> String {
        match item.get(&self.id_field) {
            Some(Value::String(id)) => id.clone(),
            Some(id) if !id.is_null() => id.to_string(),
            _ => format!("#{}", index),
        }
    }

    /// The raw stored list; anything that is not an array reads as empty.
    pub fn stored(&self, state: &Value) -> Vec<Value> {
        let list = match &self.source {
            CollectionSource::Whole => state.clone(),
            CollectionSource::Field(field) => field_of(state, field).clone(),
            CollectionSource::Lens(lens) => lens.get(state),
        };
        match list {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                tracing::warn!(
                    component = %self.owner,
                    found = %other,
                    "collection source is not an array; rendering no items"
                );
                Vec::new()
            }
        }
    }

    fn visible(&self, item: &Value) -> bool {
        self.filter.as_ref().map_or(true, |f| f(item))
    }

    /// Visible items in display order. Sorting is stable.
    pub fn get(&self, state: &Value) -> Vec<Item> {
        let mut items: Vec<Item> = self
            .stored(state)
            .into_iter()
            .enumerate()
            .map(|(index, value)| Item {
                key: self.key_of(&value, index),
                value,
            })
            .filter(|item| self.visible(&item.value))
            .collect();
        if !self.sort.is_empty() {
            items.sort_by(|a, b| {
                self.sort
                    .iter()
                    .map(|key| key.compare(&a.value, &b.value))
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
        }
        items
    }

    /// Current value of the item with `key`.
    pub fn find(&self, state: &Value, key: &str) -> Option<Value> {
        self.stored(state)
            .into_iter()
            .enumerate()
            .find(|(index, value)| self.key_of(value, *index) == key)
            .map(|(_, value)| value)
    }

    /// Write a visible list back into `state`.
    ///
    /// Items are matched to stored entries by key and keep their stored
    /// position. Entries hidden by the filter are kept unchanged. Visible
    /// entries missing from `items`, and items whose value is `Null`, are
    /// removed. Items whose key is no longer stored are dropped.
    pub fn set(&self, state: &Value, items: &[Item]) -> Value {
        let mut updates: FxHashMap<&str, &Value> =
            items.iter().map(|item| (item.key.as_str(), &item.value)).collect();
        let mut list = Vec::new();
        for (index, stored) in self.stored(state).into_iter().enumerate() {
            if !self.visible(&stored) {
                list.push(stored);
                continue;
            }
            let key = self.key_of(&stored, index);
            match updates.remove(key.as_str()) {
                Some(Value::Null) | None => {}
                Some(updated) => list.push(updated.clone()),
            }
        }
        if !updates.is_empty() {
            tracing::debug!(
                component = %self.owner,
                stale = updates.len(),
                "dropping collection updates for items no longer in state"
            );
        }
        self.write_stored(state, list)
    }

    /// Turn an item-level transition into one over the enclosing state.
    ///
    /// A transition returning `Null` deletes the item. Transitions for an
    /// item that has disappeared leave the state unchanged.
    pub fn lift_item(self: &Rc<Self>, key: String, transition: Transition) -> Transition {
        let lens = Rc::clone(self);
        Rc::new(move |state: Value| {
            let mut list = lens.stored(&state);
            let position = list
                .iter()
                .enumerate()
                .position(|(index, value)| lens.key_of(value, index) == key);
            let Some(position) = position else {
                return state;
            };
            let updated = transition(list[position].clone());
            if updated.is_null() {
                list.remove(position);
            } else {
                list[position] = updated;
            }
            lens.write_stored(&state, list)
        })
    }

    fn write_stored(&self, state: &Value, list: Vec<Value>) -> Value {
        if self.read_only {
            tracing::warn!(
                component = %self.owner,
                "collection writes into a calculated field are ignored"
            );
            return state.clone();
        }
        let list = Value::Array(list);
        match &self.source {
            CollectionSource::Whole => list,
            CollectionSource::Field(field) => with_field(state, field, list),
            CollectionSource::Lens(lens) => lens.set(state, list),
        }
    }
}

struct Instances {
    order: Vec<String>,
    sinks: IndexMap<String, Sinks>,
}

/// Instantiate a collection.
///
/// `base` carries the enclosing component's state plus the props, children
/// and context channels of the placeholder. `forward` names the channels
/// the enclosing component aggregates.
pub(crate) fn instantiate_collection(
    options: &CollectionOptions,
    item: ComponentFactory,
    base: Sources,
    forward: &[String],
    calculated: &Calculated,
    rt: &Runtime,
    diag: &Diag,
) -> Result<Sinks> {
    let state = base.state.clone().ok_or_else(|| ComponentError::MissingStateSource {
        component: format!("{} collection of {}", diag.component(), item.name()),
    })?;
    let lens = Rc::new(CollectionLens::new(options, diag.component()).guard(calculated));
    let names = crate::sources::ChannelNames::default();

    let read = Rc::clone(&lens);
    let items = state
        .stream()
        .map(move |s| read.get(s))
        .drop_repeats_by(|a: &Vec<Item>, b: &Vec<Item>| {
            a.len() == b.len()
                && a.iter().zip(b).all(|(x, y)| x.key == y.key && deep_equal(&x.value, &y.value))
        });

    let rt = rt.clone();
    let diag = diag.clone();
    let fold_lens = Rc::clone(&lens);
    let instances = items
        .fold(
            Rc::new(Instances {
                order: Vec::new(),
                sinks: IndexMap::new(),
            }),
            move |prev: &Rc<Instances>, items: &Vec<Item>| {
                let mut sinks = IndexMap::new();
                for entry in items {
                    if let Some(existing) = prev.sinks.get(&entry.key) {
                        sinks.insert(entry.key.clone(), existing.clone());
                        continue;
                    }
                    match instantiate_item(&fold_lens, &entry.key, &item, &base, &state, &rt) {
                        Ok(instance) => {
                            sinks.insert(entry.key.clone(), instance);
                        }
                        Err(e) => {
                            diag.error(format_args!("collection item '{}' failed: {}", entry.key, e));
                            rt.report(e);
                        }
                    }
                }
                let order = items
                    .iter()
                    .filter(|entry| sinks.contains_key(&entry.key))
                    .map(|entry| entry.key.clone())
                    .collect();
                Rc::new(Instances { order, sinks })
            },
        )
        .remember();

    let view = instances
        .map(|snapshot| {
            let views = snapshot
                .order
                .iter()
                .filter_map(|key| snapshot.sinks.get(key).map(|s| s.view.clone()))
                .collect();
            Stream::combine(views).map(|nodes| VNode::element("div").children(nodes.iter().cloned()))
        })
        .flatten()
        .remember();

    let state_sink = instances
        .map(|snapshot| Stream::merge(snapshot.sinks.values().map(|s| s.state.clone()).collect()))
        .flatten();
    let parent = instances
        .map(|snapshot| Stream::merge(snapshot.sinks.values().map(|s| s.parent.clone()).collect()))
        .flatten();

    let mut channels = IndexMap::new();
    for name in forward {
        let channel = name.clone();
        channels.insert(
            name.clone(),
            instances
                .map(move |snapshot| {
                    Stream::merge(snapshot.sinks.values().map(|s| s.channel(&channel)).collect())
                })
                .flatten(),
        );
    }

    Ok(Sinks {
        state: state_sink,
        view,
        parent,
        channels,
        names,
        has_state: true,
        has_parent: true,
    })
}

fn instantiate_item(
    lens: &Rc<CollectionLens>,
    key: &str,
    item: &ComponentFactory,
    base: &Sources,
    state: &StateSource,
    rt: &Runtime,
) -> Result<Sinks> {
    let read = Rc::clone(lens);
    let wanted = key.to_string();
    let item_state = state
        .stream()
        .filter_map(move |s| read.find(s, &wanted))
        .drop_repeats_by(deep_equal);

    let mut sources = base.clone();
    sources.state = Some(StateSource::new(item_state));
    sources.child = None;

    let mut sinks = item.instantiate(sources, rt)?;
    let lens = Rc::clone(lens);
    let key = key.to_string();
    sinks.state = sinks
        .state
        .map(move |t| lens.lift_item(key.clone(), Rc::clone(t)));
    Ok(sinks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lens(options: CollectionOptions) -> CollectionLens {
        CollectionLens::new(&options, "Test")
    }

    fn keys(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.key.as_str()).collect()
    }

    #[test]
    fn test_sort_key_parsing() {
        assert!(matches!(SortKey::parse("asc"), SortKey::Item(SortDirection::Asc)));
        assert!(matches!(SortKey::parse("dec"), SortKey::Item(SortDirection::Dec)));
        assert!(matches!(SortKey::parse("name"), SortKey::Field(f, SortDirection::Asc) if f == "name"));
        assert!(matches!(SortKey::parse("age dec"), SortKey::Field(f, SortDirection::Dec) if f == "age"));
    }

    #[test]
    fn test_get_sorts_without_touching_storage() {
        let l = lens(CollectionOptions::new("Item").from("items").sort("name"));
        let state = json!({ "items": [{ "id": 2, "name": "b" }, { "id": 1, "name": "a" }] });
        assert_eq!(keys(&l.get(&state)), vec!["1", "2"]);
        assert_eq!(l.stored(&state)[0]["id"], json!(2));
    }

    #[test]
    fn test_multi_key_sort_is_stable() {
        let l = lens(CollectionOptions::new("Item").sort("group").sort("rank dec"));
        let state = json!([
            { "id": "a", "group": 1, "rank": 1 },
            { "id": "b", "group": 0, "rank": 5 },
            { "id": "c", "group": 1, "rank": 3 },
            { "id": "d", "group": 1, "rank": 3 },
        ]);
        assert_eq!(keys(&l.get(&state)), vec!["b", "c", "d", "a"]);
    }

    #[test]
    fn test_positional_keys() {
        let l = lens(CollectionOptions::new("Item"));
        assert_eq!(keys(&l.get(&json!(["x", "y"]))), vec!["#0", "#1"]);
    }

    #[test]
    fn test_non_array_reads_empty() {
        let l = lens(CollectionOptions::new("Item").from("items"));
        assert!(l.get(&json!({ "items": 3 })).is_empty());
        assert!(l.get(&json!({})).is_empty());
    }

    #[test]
    fn test_set_keeps_filtered_and_stored_order() {
        let l = lens(
            CollectionOptions::new("Item")
                .from("items")
                .filter(|v| !v["hidden"].as_bool().unwrap_or(false))
                .sort("name"),
        );
        let state = json!({ "items": [
            { "id": 1, "name": "z" },
            { "id": 2, "name": "h", "hidden": true },
            { "id": 3, "name": "a" },
        ]});
        let mut visible = l.get(&state);
        visible[0].value["name"] = json!("aa");

        let written = l.set(&state, &visible);
        assert_eq!(
            written,
            json!({ "items": [
                { "id": 1, "name": "z" },
                { "id": 2, "name": "h", "hidden": true },
                { "id": 3, "name": "aa" },
            ]})
        );
    }

    #[test]
    fn test_set_round_trip() {
        let l = lens(CollectionOptions::new("Item").from("items").sort("dec"));
        let state = json!({ "items": [3, 1, 2], "other": true });
        let read = l.get(&state);
        assert_eq!(l.get(&l.set(&state, &read)), read);
    }

    #[test]
    fn test_set_drops_stale_and_deleted_items() {
        let l = lens(CollectionOptions::new("Item"));
        let state = json!([{ "id": 1 }, { "id": 2 }]);
        let items = vec![
            Item { key: "1".into(), value: Value::Null },
            Item { key: "2".into(), value: json!({ "id": 2, "x": 1 }) },
            Item { key: "9".into(), value: json!({ "id": 9 }) },
        ];
        assert_eq!(l.set(&state, &items), json!([{ "id": 2, "x": 1 }]));
    }

    #[test]
    fn test_lift_item_transition() {
        let l = Rc::new(lens(CollectionOptions::new("Item").from("items")));
        let state = json!({ "items": [{ "id": "a", "n": 1 }, { "id": "b", "n": 1 }] });
        let bump: Transition = Rc::new(|item: Value| {
            let mut item = item;
            item["n"] = json!(item["n"].as_i64().unwrap_or(0) + 1);
            item
        });
        let lifted = l.lift_item("b".into(), bump);
        assert_eq!(lifted(state.clone())["items"][1]["n"], json!(2));

        let delete: Transition = Rc::new(|_: Value| Value::Null);
        let deleted = l.lift_item("a".into(), delete)(state.clone());
        assert_eq!(deleted["items"].as_array().map(Vec::len), Some(1));

        let missing = l.lift_item("zz".into(), Rc::new(|v: Value| v))(state.clone());
        assert_eq!(missing, state);
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&json!(1), &json!(2.5)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&Value::Null, &json!(0)), Ordering::Less);
    }
}
