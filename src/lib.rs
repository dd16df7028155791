//! Declarative bindings between application state and REST resources.
//!
//! A [`Manifest`] declares resources whose paths, params and headers are
//! templates over the caller's query string, route params, props and the
//! other resources in the [`Store`]. A [`RestResource`] resolves those
//! templates, talks to the server and reports every step as an [`Action`]
//! that the pure [`reduce`] function folds into a [`ResourceState`].

pub mod bus;
pub mod config;
pub mod error;
pub mod http;
pub mod resource;
pub mod session;
pub mod store;
pub mod template;

pub use bus::{default_should_refresh, EventBus, MutationEvent, RefreshPredicate};
pub use config::Config;
pub use error::{ConnectError, Result};
pub use http::{HttpClient, HttpResponse};
pub use resource::{
    reduce, Action, ActionKind, ActionMeta, Dispatch, FetchOutcome, Manifest, MutationOutcome,
    ResourceDef, ResourceKey, ResourceState, RestResource, Verb,
};
pub use session::{Props, Session, StateAccess};
pub use store::Store;
pub use template::{resolve, resolve_template, ConfigValue, Resolution, TemplateContext};
