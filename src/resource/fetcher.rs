//! Resource Fetcher
//!
//! Reads a resource: resolves its GET options, skips duplicate requests,
//! drops responses that a newer request superseded, and extracts records
//! from the response envelope before handing them to the paging controller.

use super::action::{ActionKind, Failure, ResponseMeta};
use super::options::build_options;
use super::registry::Verb;
use super::url::url_from_options;
use super::{RestResource, Sent, ABORT_MESSAGE};
use crate::bus::MutationEvent;
use crate::error::Result;
use crate::session::Props;
use crate::template::lookup;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// What a read ended with
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Records committed to state
    Loaded(Vec<Value>),
    Failed(Failure),
    /// Options were unsatisfiable, permissions were missing, or the request
    /// was cancelled
    Aborted(String),
    /// A newer read was issued while this one was in flight
    Stale,
}

/// Records and envelope of one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedPage {
    pub records: Vec<Value>,
    /// Envelope fields other than the record list
    pub other: Map<String, Value>,
    pub total: Option<u64>,
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Total record count declared by a response body
pub fn extract_total(body: &Value) -> Option<u64> {
    lookup(body, "resultInfo.totalRecords")
        .and_then(as_count)
        .or_else(|| body.get("totalRecords").and_then(as_count))
        .or_else(|| body.get("total_records").and_then(as_count))
}

/// Pull the record list out of a response body.
///
/// With a `records` path the list lives at that element and the rest of the
/// envelope is kept as `other`. Without one the body itself is the list. A
/// single object is wrapped so records are always a list.
pub fn extract_records(
    body: &Value,
    records_path: Option<&str>,
    allow_undefined: bool,
) -> std::result::Result<ExtractedPage, Failure> {
    let total = extract_total(body);

    let Some(path) = records_path.filter(|p| !p.is_empty()) else {
        let records = match body {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        };
        return Ok(ExtractedPage {
            records,
            other: Map::new(),
            total,
        });
    };

    let records = match lookup(body, path) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None if allow_undefined => Vec::new(),
        Some(Value::Null) | None => {
            return Err(Failure::transport(format!("no records in '{}' element", path)));
        }
        Some(single) => vec![single.clone()],
    };

    let mut other = body.as_object().cloned().unwrap_or_default();
    if let Some(head) = path.split('.').next() {
        other.remove(head);
    }

    Ok(ExtractedPage { records, other, total })
}

impl RestResource {
    /// Read the resource for `props`.
    ///
    /// Returns `Ok(None)` when an identical read (same URL and same records
    /// requirement) was already issued and `force` is not set. Configuration
    /// errors are returned as `Err`; everything that happens at runtime is
    /// dispatched and summarized by the [`FetchOutcome`].
    pub async fn read(&self, props: &Props, force: bool) -> Result<Option<FetchOutcome>> {
        let Some(options) = build_options(Verb::Get, &self.def, self.state.as_ref(), props)? else {
            return Ok(Some(self.abort_read(None, "options could not be resolved".to_string())));
        };

        let Some(url) = url_from_options(&options, None) else {
            return Ok(Some(self.abort_read(
                options.path.as_deref(),
                "URL could not be composed".to_string(),
            )));
        };

        if !options.permissions_required.is_empty() {
            let missing: Vec<String> = match self.state.session() {
                Some(session) => session
                    .missing_permissions(&options.permissions_required)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                None => options.permissions_required.clone(),
            };
            if !missing.is_empty() {
                return Ok(Some(self.abort_read(
                    options.path.as_deref(),
                    format!("missing permissions: {}", missing.join(", ")),
                )));
            }
        }

        let required = options.result_offset.or(options.records_required);
        {
            let mut tracker = self.tracker();
            let same_url = tracker.last_url.as_deref() == Some(url.as_str());
            if !force && same_url && tracker.last_required == required {
                tracing::debug!("{}: skipping duplicate read of {}", self.def.name, url);
                return Ok(None);
            }
            tracker.last_url = Some(url.clone());
            tracker.last_required = required;
            tracker.last_path = options.path.clone();
        }

        tracing::info!("{}: reading {}", self.def.name, url);
        self.dispatch(ActionKind::FetchStart, self.meta(options.path.as_deref()));

        let response = match self.send("fetch", Verb::Get, &url, &options.headers, None).await {
            Sent::Response(response) => response,
            Sent::Aborted => {
                let message = ABORT_MESSAGE.to_string();
                return Ok(Some(self.abort_read(options.path.as_deref(), message)));
            }
            Sent::Failed(err) => {
                let failure = Failure::transport(format!("{:#}", err));
                return Ok(Some(self.fail_read(&url, options.path.as_deref(), failure)));
            }
        };

        if !self.is_current(&url) {
            tracing::warn!("{}: discarding stale response for {}", self.def.name, url);
            return Ok(Some(FetchOutcome::Stale));
        }

        if response.is_error() {
            let failure = Failure::http(response.status, &response.body);
            return Ok(Some(self.fail_read(&url, options.path.as_deref(), failure)));
        }

        let body = match response.json() {
            Ok(body) => body,
            Err(err) => {
                let failure = Failure::transport(format!("{:#}", err));
                return Ok(Some(self.fail_read(&url, options.path.as_deref(), failure)));
            }
        };

        let allow_undefined = self.def.allow_undefined_records;
        let page = match extract_records(&body, options.records.as_deref(), allow_undefined) {
            Ok(page) => page,
            Err(failure) => return Ok(Some(self.fail_read(&url, options.path.as_deref(), failure))),
        };

        let meta = ResponseMeta {
            url: response.url,
            headers: response.headers,
            http_status: response.status,
            other: page.other,
            total_records: page.total,
        };

        Ok(Some(self.paginate(&options, &url, page.records, meta).await))
    }

    /// Read when the resource is configured to fetch automatically
    pub async fn sync(&self, props: &Props) -> Result<Option<FetchOutcome>> {
        if !self.def.fetch {
            return Ok(None);
        }
        self.read(props, false).await
    }

    /// Clear state and forget the last request
    pub fn reset(&self) {
        *self.tracker() = Default::default();
        self.dispatch(ActionKind::Reset, self.meta(None));
    }

    /// Re-read when `event` concerns this resource
    pub async fn refresh_on(
        &self,
        event: &MutationEvent,
        props: &Props,
    ) -> Result<Option<FetchOutcome>> {
        if event.origin == self.key() {
            return Ok(None);
        }
        let own_path = self.tracker().last_path.clone();
        if !(self.should_refresh)(own_path.as_deref(), event) {
            return Ok(None);
        }
        tracing::info!("{}: refreshing after {} on {}", self.def.name, event.verb, event.origin);
        self.read(props, true).await
    }

    /// Re-read whenever another resource publishes a relevant mutation.
    ///
    /// The listener only holds a weak reference, so it stops once the
    /// resource is dropped or every sender of the bus is gone. Returns `None`
    /// when the resource has no bus.
    pub fn spawn_refresh_listener(self: Arc<Self>, props: Props) -> Option<JoinHandle<()>> {
        let mut events = self.bus.as_ref()?.subscribe();
        let name = self.def.name.clone();
        let resource = Arc::downgrade(&self);
        drop(self);

        Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(resource) = resource.upgrade() else {
                            break;
                        };
                        if let Err(err) = resource.refresh_on(&event, &props).await {
                            tracing::warn!("{}: refresh failed: {}", name, err);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("{}: missed {} mutation event(s)", name, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("{}: refresh listener stopped", name);
        }))
    }

    /// The last issued read is for `url`
    pub(crate) fn is_current(&self, url: &str) -> bool {
        self.tracker().last_url.as_deref() == Some(url)
    }

    /// Reset the resource and forget the last request so it can be retried
    pub(crate) fn abort_read(&self, path: Option<&str>, message: String) -> FetchOutcome {
        tracing::debug!("{}: fetch aborted: {}", self.def.name, message);
        *self.tracker() = Default::default();
        self.dispatch(ActionKind::FetchAbort { message: message.clone() }, self.meta(path));
        FetchOutcome::Aborted(message)
    }

    pub(crate) fn fail_read(
        &self,
        url: &str,
        path: Option<&str>,
        failure: Failure,
    ) -> FetchOutcome {
        if !self.is_current(url) {
            tracing::warn!("{}: discarding stale failure for {}", self.def.name, url);
            return FetchOutcome::Stale;
        }
        tracing::error!("{}: fetch failed: {}", self.def.name, failure);
        self.dispatch(ActionKind::FetchError(failure.clone()), self.meta(path));
        FetchOutcome::Failed(failure)
    }
}
