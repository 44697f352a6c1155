//! Render tree nodes
//!
//! A [`VNode`] is the minimal virtual-DOM shape the component engine needs:
//! a selector, an optional key, props/attrs, children or text. Placeholders for
//! sub-components are ordinary nodes whose selector is a registered component
//! name, one of the reserved selectors, or whose data carries an [`Embed`].
//!
//! Bookkeeping set by the engine lives in [`Marks`], out of band from the
//! user-visible props.
//!
//! ```ignore
//! let tree = VNode::element("div")
//!     .attr("class", "counter")
//!     .child(VNode::text("Count: 0"))
//!     .child(VNode::element("Button").prop("label", "+"));
//! ```

use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::collection::CollectionOptions;
use crate::component::ComponentFactory;
use crate::switchable::SwitchableOptions;

/// Selector of a collection placeholder
pub const COLLECTION_SELECTOR: &str = "collection";
/// Selector of a switchable placeholder
pub const SWITCHABLE_SELECTOR: &str = "switchable";
/// Selector of a factory placeholder
pub const FACTORY_SELECTOR: &str = "rill-factory";

/// Payload carried by placeholder nodes that cannot be expressed as props
#[derive(Clone)]
pub enum Embed {
    Factory(ComponentFactory),
    Collection(Rc<CollectionOptions>),
    Switchable(Rc<SwitchableOptions>),
}

impl Embed {
    /// Identity comparison of the embedded payloads.
    pub fn same(&self, other: &Embed) -> bool {
        match (self, other) {
            (Embed::Factory(a), Embed::Factory(b)) => a.ptr_eq(b),
            (Embed::Collection(a), Embed::Collection(b)) => Rc::ptr_eq(a, b),
            (Embed::Switchable(a), Embed::Switchable(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Embed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Embed::Factory(factory) => write!(f, "Embed::Factory({})", factory.name()),
            Embed::Collection(_) => f.write_str("Embed::Collection"),
            Embed::Switchable(_) => f.write_str("Embed::Switchable"),
        }
    }
}

/// What a placeholder resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderKind {
    /// A component registered under this name
    Named(String),
    /// A component carried by an [`Embed::Factory`]
    Factory(String),
    Collection,
    Switchable,
}

/// Engine bookkeeping attached to a node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Marks {
    /// The tree rooted here has been scanned for placeholders
    pub processed: bool,
    /// Sub-component output has been spliced into the tree rooted here
    pub injected: bool,
    /// Stable identity assigned to a placeholder
    pub identity: Option<String>,
    pub kind: Option<PlaceholderKind>,
}

/// Node payload: props, attributes, embed and marks
#[derive(Debug, Clone, Default)]
pub struct NodeData {
    pub props: Map<String, Value>,
    pub attrs: Map<String, Value>,
    pub embed: Option<Embed>,
    pub marks: Marks,
}

impl NodeData {
    /// Whether both carry the same embedded payload (or none).
    pub fn same_embed(&self, other: &NodeData) -> bool {
        match (&self.embed, &other.embed) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same(b),
            _ => false,
        }
    }
}

/// A virtual tree node
#[derive(Debug, Clone, Default)]
pub struct VNode {
    pub sel: String,
    pub key: Option<String>,
    pub data: NodeData,
    pub children: Vec<VNode>,
    pub text: Option<String>,
}

impl VNode {
    pub fn element(sel: impl Into<String>) -> Self {
        Self {
            sel: sel.into(),
            ..Self::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Empty text node; used for components without a view.
    pub fn empty() -> Self {
        Self::text("")
    }

    /// A placeholder for a component carried by value instead of by name.
    pub fn factory(factory: ComponentFactory) -> Self {
        Self::element(FACTORY_SELECTOR).embed(Embed::Factory(factory))
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn prop(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.props.insert(name.into(), value.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.attrs.insert(name.into(), value.into());
        self
    }

    pub fn embed(mut self, embed: Embed) -> Self {
        self.data.embed = Some(embed);
        self
    }

    pub fn child(mut self, child: VNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = VNode>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn is_text(&self) -> bool {
        self.sel.is_empty() && self.text.is_some()
    }

    /// Props as a JSON object value.
    pub fn props_value(&self) -> Value {
        Value::Object(self.data.props.clone())
    }

    /// Depth-first search for the first node with the given selector.
    pub fn find(&self, sel: &str) -> Option<&VNode> {
        if self.sel == sel {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(sel))
    }

    /// Concatenated text of this node and all descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        if let Some(text) = &self.text {
            out.push_str(text);
        }
        for child in &self.children {
            child.collect_text(out);
        }
    }
}

impl From<&str> for VNode {
    fn from(text: &str) -> Self {
        VNode::text(text)
    }
}

impl From<String> for VNode {
    fn from(text: String) -> Self {
        VNode::text(text)
    }
}
