//! Placeholder discovery and injection
//!
//! Both walks are pure: they return new trees and leave their input alone.
//!
//! [`discover`] finds sub-component placeholders in a freshly rendered tree,
//! assigns each a stable identity and validates its configuration.
//! [`inject`] splices rendered sub-trees back in place of the placeholders.
//!
//! A placeholder's own children are content for the sub-component, so
//! neither walk descends into them.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::collection::ComponentRef;
use crate::component::ComponentFactory;
use crate::error::{ComponentError, Result};
use crate::switchable::CurrentSelector;
use crate::vnode::{
    Embed, Marks, NodeData, PlaceholderKind, VNode, COLLECTION_SELECTOR, FACTORY_SELECTOR,
    SWITCHABLE_SELECTOR,
};

/// What the walk needs to know about the component doing the rendering
pub struct DiscoveryScope<'a> {
    /// Name of the rendering component, used as the identity prefix.
    /// Identities are only unique within one instance's registry.
    pub parent: &'a str,
    /// Registered sub-components by name
    pub components: &'a IndexMap<String, ComponentFactory>,
}

/// A discovered placeholder
#[derive(Debug, Clone)]
pub struct Placeholder {
    pub identity: String,
    pub kind: PlaceholderKind,
    /// The annotated placeholder node
    pub node: VNode,
}

/// Result of a discovery walk
#[derive(Debug, Clone)]
pub struct Discovery {
    pub tree: VNode,
    pub placeholders: Vec<Placeholder>,
}

type Path = SmallVec<[usize; 8]>;

/// Scan `tree` for placeholders.
///
/// A tree that was already processed is not re-validated; its recorded
/// placeholders are returned as they are.
pub fn discover(tree: &VNode, scope: &DiscoveryScope<'_>) -> Result<Discovery> {
    let mut placeholders = Vec::new();
    if tree.data.marks.processed {
        collect_marked(tree, &mut placeholders);
        return Ok(Discovery {
            tree: tree.clone(),
            placeholders,
        });
    }

    let mut path = Path::new();
    let mut annotated = walk(tree, scope, 0, &mut path, &mut placeholders)?;
    annotated.data.marks.processed = true;

    let mut seen = rustc_hash::FxHashSet::default();
    placeholders.retain(|p: &Placeholder| {
        let first = seen.insert(p.identity.clone());
        if !first {
            tracing::warn!(
                component = %scope.parent,
                identity = %p.identity,
                "duplicate sub-component identity; instances will share output"
            );
        }
        first
    });

    Ok(Discovery {
        tree: annotated,
        placeholders,
    })
}

fn walk(
    node: &VNode,
    scope: &DiscoveryScope<'_>,
    depth: usize,
    path: &mut Path,
    found: &mut Vec<Placeholder>,
) -> Result<VNode> {
    if let Some(kind) = classify(node, scope)? {
        let identity = identity_for(scope.parent, &kind, node, depth, path);
        let mut marked = node.clone();
        marked.data.marks.identity = Some(identity.clone());
        marked.data.marks.kind = Some(kind.clone());
        found.push(Placeholder {
            identity,
            kind,
            node: marked.clone(),
        });
        return Ok(marked);
    }

    let mut children = Vec::with_capacity(node.children.len());
    for (index, child) in node.children.iter().enumerate() {
        path.push(index);
        let walked = walk(child, scope, depth + 1, path, found);
        path.pop();
        children.push(walked?);
    }
    Ok(VNode {
        sel: node.sel.clone(),
        key: node.key.clone(),
        data: node.data.clone(),
        children,
        text: node.text.clone(),
    })
}

/// Placeholder kind of `node`, validating its configuration.
fn classify(node: &VNode, scope: &DiscoveryScope<'_>) -> Result<Option<PlaceholderKind>> {
    match &node.data.embed {
        Some(Embed::Collection(options)) => {
            validate_component_ref(&options.of, scope)?;
            options.validate(scope.parent)?;
            return Ok(Some(PlaceholderKind::Collection));
        }
        Some(Embed::Switchable(options)) => {
            validate_switchable(node, options, scope.parent)?;
            return Ok(Some(PlaceholderKind::Switchable));
        }
        Some(Embed::Factory(factory)) => {
            return Ok(Some(PlaceholderKind::Factory(factory.name().to_string())));
        }
        None => {}
    }

    match node.sel.as_str() {
        COLLECTION_SELECTOR => Err(ComponentError::InvalidCollection {
            component: scope.parent.to_string(),
            reason: "collection placeholder carries no options".to_string(),
        }),
        SWITCHABLE_SELECTOR => Err(ComponentError::InvalidSwitchable {
            component: scope.parent.to_string(),
            reason: "switchable placeholder carries no options".to_string(),
        }),
        FACTORY_SELECTOR => Err(ComponentError::MissingFactory(scope.parent.to_string())),
        sel if scope.components.contains_key(sel) => {
            Ok(Some(PlaceholderKind::Named(sel.to_string())))
        }
        _ => Ok(None),
    }
}

fn validate_component_ref(of: &ComponentRef, scope: &DiscoveryScope<'_>) -> Result<()> {
    match of {
        ComponentRef::Factory(_) => Ok(()),
        ComponentRef::Named(name) if scope.components.contains_key(name) => Ok(()),
        ComponentRef::Named(name) => Err(ComponentError::InvalidCollection {
            component: scope.parent.to_string(),
            reason: format!("'of' names an unregistered component: {}", name),
        }),
    }
}

fn validate_switchable(
    node: &VNode,
    options: &crate::switchable::SwitchableOptions,
    parent: &str,
) -> Result<()> {
    let invalid = |reason: String| ComponentError::InvalidSwitchable {
        component: parent.to_string(),
        reason,
    };
    if options.variants().is_empty() {
        return Err(invalid("'of' must name at least one variant".to_string()));
    }
    if let CurrentSelector::Prop = options.current_selector() {
        let current = node
            .data
            .props
            .get("current")
            .and_then(|c| c.as_str())
            .ok_or_else(|| invalid("'current' must be a variant name or a selector".to_string()))?;
        if !options.variants().contains_key(current) {
            return Err(invalid(format!("'current' names an unknown variant: {}", current)));
        }
    }
    Ok(())
}

fn identity_for(parent: &str, kind: &PlaceholderKind, node: &VNode, depth: usize, path: &Path) -> String {
    let name = match kind {
        PlaceholderKind::Named(name) | PlaceholderKind::Factory(name) => name.as_str(),
        PlaceholderKind::Collection => COLLECTION_SELECTOR,
        PlaceholderKind::Switchable => SWITCHABLE_SELECTOR,
    };
    match node.data.props.get("id") {
        Some(id) => format!("{}/{}::{}", parent, name, id),
        None => {
            let path: Vec<String> = path.iter().map(|i| i.to_string()).collect();
            format!("{}/{}::{}:{}", parent, name, depth, path.join("."))
        }
    }
}

fn collect_marked(node: &VNode, found: &mut Vec<Placeholder>) {
    if let (Some(identity), Some(kind)) = (&node.data.marks.identity, &node.data.marks.kind) {
        found.push(Placeholder {
            identity: identity.clone(),
            kind: kind.clone(),
            node: node.clone(),
        });
        return;
    }
    for child in &node.children {
        collect_marked(child, found);
    }
}

/// Replace every placeholder in `tree` with its rendered sub-tree.
///
/// Collections become a `div` container holding the rendered items. A
/// placeholder without a rendered entry is left as is. An already injected
/// tree is returned unchanged.
pub fn inject(tree: &VNode, rendered: &FxHashMap<String, VNode>) -> VNode {
    if tree.data.marks.injected {
        return tree.clone();
    }
    let mut out = substitute(tree, rendered);
    out.data.marks.injected = true;
    out
}

fn substitute(node: &VNode, rendered: &FxHashMap<String, VNode>) -> VNode {
    if let Some(identity) = &node.data.marks.identity {
        if let Some(view) = rendered.get(identity) {
            return match node.data.marks.kind {
                Some(PlaceholderKind::Collection) => VNode {
                    sel: "div".to_string(),
                    key: node.key.clone(),
                    data: NodeData {
                        attrs: node.data.attrs.clone(),
                        ..NodeData::default()
                    },
                    children: view.children.clone(),
                    text: None,
                },
                _ => view.clone(),
            };
        }
        return node.clone();
    }

    VNode {
        sel: node.sel.clone(),
        key: node.key.clone(),
        data: NodeData {
            marks: Marks {
                injected: false,
                ..node.data.marks.clone()
            },
            ..node.data.clone()
        },
        children: node
            .children
            .iter()
            .map(|child| substitute(child, rendered))
            .collect(),
        text: node.text.clone(),
    }
}
