//! Resource abstraction layer
//!
//! A resource is declared once in a manifest and bound to a remote REST
//! endpoint. Everything about a request (path, params, headers, paging) is
//! a template resolved against the caller's props and the rest of the store,
//! so new resources need no code.
//!
//! # Architecture
//!
//! - [`registry`] - Manifest parsing and immutable resource definitions
//! - [`options`] - Resolves a definition into concrete per-verb options
//! - [`url`] - Composes request URLs from resolved options
//! - [`fetcher`] - Reads: dedup, stale discard, record extraction
//! - [`paging`] - Multi-page and offset fetches
//! - [`mutator`] - Optimistic create, update and delete
//! - [`action`] / [`state`] - Actions and the pure reducer
//!
//! # Example
//!
//! ```ignore
//! use resource_connect::{HttpClient, Manifest, Props, RestResource, Store};
//! use std::sync::Arc;
//!
//! async fn list_users(manifest: &Manifest) -> anyhow::Result<()> {
//!     let store = Arc::new(Store::new());
//!     let def = manifest.resource("users", None)?;
//!     let users = RestResource::new(def, HttpClient::new()?, store.clone(), store.clone());
//!     users.read(&Props::new().with_query("search=ada"), false).await?;
//!     println!("{:?}", store.state(&users.key()).records);
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod fetcher;
pub mod mutator;
pub mod options;
pub mod paging;
pub mod registry;
pub mod state;
pub mod url;

pub use action::{Action, ActionKind, ActionMeta, Dispatch, Failure, ResourceKey, ResponseMeta};
pub use fetcher::{extract_records, extract_total, ExtractedPage, FetchOutcome};
pub use mutator::MutationOutcome;
pub use options::{build_options, OptionSet, TENANT_HEADER, TOKEN_HEADER};
pub use paging::{page_url, plan_paging, Page, PagingPlan, PagingSession, MAX_SPARSE_OFFSET};
pub use registry::{
    Manifest, ManifestEntry, MapTemplate, OptionsTemplate, ResourceDef, ResourceKind,
    StaticFallback, Verb, DEFAULT_PER_REQUEST, DEFAULT_PK,
};
pub use state::{
    reduce, FailedMutation, MutationRecord, PageStatus, ResourceState, MUTATION_HISTORY_LIMIT,
};
pub use url::{encode_query, url_from_options};

use crate::bus::{default_should_refresh, EventBus, RefreshPredicate};
use crate::http::{AbortRegistry, HttpClient, HttpResponse};
use crate::session::StateAccess;
use futures::future::Abortable;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Message carried by actions for cancelled operations
pub const ABORT_MESSAGE: &str = "Request was cancelled";

/// What the last issued read looked like
#[derive(Debug, Default)]
pub(crate) struct FetchTracker {
    pub(crate) last_url: Option<String>,
    /// recordsRequired, or resultOffset in offset mode
    pub(crate) last_required: Option<u64>,
    /// URL and offset of the last offset-mode page
    pub(crate) last_offset: Option<(String, u64)>,
    /// Resolved path of the last read, used for refresh decisions
    pub(crate) last_path: Option<String>,
    /// A paging session left progress in state
    pub(crate) paged: bool,
}

/// Result of sending one request
pub(crate) enum Sent {
    Response(HttpResponse),
    Failed(anyhow::Error),
    Aborted,
}

/// A resource bound to a store and an HTTP client
pub struct RestResource {
    def: ResourceDef,
    http: HttpClient,
    dispatcher: Arc<dyn Dispatch>,
    state: Arc<dyn StateAccess>,
    bus: Option<EventBus>,
    aborts: AbortRegistry,
    tracker: Mutex<FetchTracker>,
    should_refresh: RefreshPredicate,
}

impl RestResource {
    pub fn new(
        def: ResourceDef,
        http: HttpClient,
        dispatcher: Arc<dyn Dispatch>,
        state: Arc<dyn StateAccess>,
    ) -> Self {
        Self {
            def,
            http,
            dispatcher,
            state,
            bus: None,
            aborts: AbortRegistry::new(),
            tracker: Mutex::new(FetchTracker::default()),
            should_refresh: default_should_refresh,
        }
    }

    /// Publish successful mutations on `bus` and allow refresh listening
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Replace the rule deciding whether a mutation elsewhere triggers a re-read
    pub fn with_refresh_predicate(mut self, predicate: RefreshPredicate) -> Self {
        self.should_refresh = predicate;
        self
    }

    pub fn def(&self) -> &ResourceDef {
        &self.def
    }

    pub fn key(&self) -> ResourceKey {
        self.def.key()
    }

    /// Number of operations that can currently be cancelled
    pub fn in_flight(&self) -> usize {
        self.aborts.len()
    }

    pub(crate) fn tracker(&self) -> MutexGuard<'_, FetchTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Base metadata for actions about this resource
    pub(crate) fn meta(&self, path: Option<&str>) -> ActionMeta {
        let mut meta = ActionMeta::new(self.key());
        meta.path = path.map(str::to_string);
        meta.accumulate = self.def.accumulate;
        meta.pk = self.def.pk().to_string();
        meta
    }

    pub(crate) fn dispatch(&self, kind: ActionKind, meta: ActionMeta) {
        tracing::debug!("{} {}", meta.key, kind.name());
        self.dispatcher.dispatch(Action::new(kind, meta));
    }

    fn cancellable(&self) -> bool {
        self.def.abortable || self.def.abort_on_unmount
    }

    /// Send a request, registering it under `op` when the resource is
    /// cancellable
    pub(crate) async fn send(
        &self,
        op: &str,
        verb: Verb,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Option<&Value>,
    ) -> Sent {
        let request = self.http.send(verb, url, headers, body);

        if !self.cancellable() {
            return match request.await {
                Ok(response) => Sent::Response(response),
                Err(err) => Sent::Failed(err),
            };
        }

        let (ticket, registration) = self.aborts.register(op);
        let result = Abortable::new(request, registration).await;
        self.aborts.finish(op, ticket);

        match result {
            Ok(Ok(response)) => Sent::Response(response),
            Ok(Err(err)) => Sent::Failed(err),
            Err(_) => {
                tracing::info!("{}: {} {} cancelled", self.def.name, verb, url);
                Sent::Aborted
            }
        }
    }

    /// Abort every in-flight operation of this resource
    pub fn cancel(&self) -> usize {
        let cancelled = self.aborts.cancel_all();
        if cancelled > 0 {
            tracing::info!("{}: cancelled {} operation(s)", self.def.name, cancelled);
        }
        cancelled
    }

    /// The owning view went away
    pub fn unmount(&self) {
        if self.def.abort_on_unmount {
            self.cancel();
        }
    }
}

impl std::fmt::Debug for RestResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestResource")
            .field("key", &self.key())
            .field("in_flight", &self.aborts.len())
            .finish()
    }
}
