//! Bounded deep equality
//!
//! Used to deduplicate render inputs and context. Comparison recurses at most
//! `max_depth` levels; anything deeper is reported as **not equal**, so a
//! pathological structure causes an extra render rather than a missed one.

use serde_json::Value;

use crate::vnode::VNode;

/// Default recursion bound
pub const MAX_EQUALITY_DEPTH: usize = 32;

/// Deep equality with the default bound.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    deep_equal_bounded(a, b, MAX_EQUALITY_DEPTH)
}

/// Deep equality that gives up (returns `false`) past `max_depth` levels.
pub fn deep_equal_bounded(a: &Value, b: &Value, max_depth: usize) -> bool {
    values_equal(a, b, 0, max_depth)
}

fn values_equal(a: &Value, b: &Value, depth: usize, max_depth: usize) -> bool {
    if depth > max_depth {
        return false;
    }
    match (a, b) {
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .zip(b)
                    .all(|(x, y)| values_equal(x, y, depth + 1, max_depth))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter().all(|(key, x)| {
                    b.get(key)
                        .is_some_and(|y| values_equal(x, y, depth + 1, max_depth))
                })
        }
        _ => a == b,
    }
}

/// Structural equality of two trees, bounded like [`deep_equal_bounded`].
pub fn nodes_equal(a: &VNode, b: &VNode, max_depth: usize) -> bool {
    node_equal_at(a, b, 0, max_depth)
}

/// Element-wise [`nodes_equal`] over two child lists.
pub fn node_lists_equal(a: &[VNode], b: &[VNode], max_depth: usize) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| node_equal_at(x, y, 0, max_depth))
}

fn node_equal_at(a: &VNode, b: &VNode, depth: usize, max_depth: usize) -> bool {
    if depth > max_depth {
        return false;
    }
    a.sel == b.sel
        && a.key == b.key
        && a.text == b.text
        && a.data.same_embed(&b.data)
        && a.data.props.len() == b.data.props.len()
        && a.data.props.iter().all(|(k, v)| {
            b.data
                .props
                .get(k)
                .is_some_and(|w| values_equal(v, w, depth + 1, max_depth))
        })
        && a.data.attrs == b.data.attrs
        && a.children.len() == b.children.len()
        && a
            .children
            .iter()
            .zip(&b.children)
            .all(|(x, y)| node_equal_at(x, y, depth + 1, max_depth))
}
