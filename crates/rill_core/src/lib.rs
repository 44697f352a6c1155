//! Rill Core
//!
//! The component engine on top of `rill_stream`:
//!
//! - **Components**: intent, model and view wired into a stream graph
//! - **State lenses**: focused read/write access into shared state
//! - **Reconciliation**: sub-components, collections and switchables
//!   discovered in rendered trees and kept alive across renders
//!
//! # Example
//!
//! ```rust
//! use rill_core::{mount, ComponentSpec, EventHub, Intent, Runtime, Sources, VNode};
//! use serde_json::json;
//! use std::rc::Rc;
//!
//! let rt = Runtime::default();
//! let hub = Rc::new(EventHub::new());
//!
//! let counter = ComponentSpec::builder("Counter")
//!     .initial_state(json!({ "count": 0 }))
//!     .intent(|sources| Intent::named([("INC", sources.events(".inc", "click"))]))
//!     .on("INC", |state, _, _| json!({ "count": state["count"].as_i64().unwrap_or(0) + 1 }))
//!     .view(|p| VNode::element("span").child(p.state["count"].to_string().into()))
//!     .build()
//!     .unwrap();
//!
//! let app = mount(&counter, Sources::new().with_dom(hub.clone()), &rt).unwrap();
//! rt.scheduler().run_until_idle();
//!
//! hub.dispatch(".inc", "click", json!(null));
//! rt.scheduler().run_until_idle();
//! assert_eq!(app.state(), Some(json!({ "count": 1 })));
//! ```

pub mod action;
pub mod calculated;
pub mod classes;
pub mod collection;
pub mod component;
pub mod config;
pub mod context;
pub mod discovery;
pub mod dom;
pub mod equality;
pub mod error;
pub mod lens;
pub mod model;
pub mod mount;
mod render;
pub mod request;
pub mod runtime;
pub mod sources;
pub mod switchable;
pub mod vnode;

pub use action::{Action, ActionBus, Intent, Next, Request, BOOTSTRAP, HYDRATE, INITIALIZE};
pub use classes::{classes, ClassArg, Condition};
pub use collection::{CollectionLens, CollectionOptions, ComponentRef, SortDirection, SortKey};
pub use component::{ComponentBuilder, ComponentFactory, ComponentSpec, Role, ViewParams};
pub use config::RuntimeConfig;
pub use context::ContextEntry;
pub use dom::EventHub;
pub use error::{ComponentError, Result};
pub use lens::{Lens, Transition};
pub use model::{Outcome, SinkReducer};
pub use mount::{mount, with_state, Mounted};
pub use request::{RequestHandler, ResponseSelector};
pub use runtime::Runtime;
pub use sources::{ChannelNames, ChildMessage, DomSource, RequestSource, Sinks, Sources, StateSource};
pub use switchable::SwitchableOptions;
pub use vnode::VNode;

pub use rill_stream::{Recorder, Scheduler, Stream, Subject};
