//! Actions
//!
//! Every state change is expressed as an [`Action`] sent through a single
//! dispatch surface. The [`ActionMeta`] identifies which resource it is for.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of one resource instance: name + module + data key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub name: String,
    pub module: String,
    pub data_key: Option<String>,
}

impl ResourceKey {
    pub fn new(name: &str, module: &str, data_key: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            module: module.to_string(),
            data_key: data_key.map(str::to_string),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data_key {
            Some(key) => write!(f, "{}/{}#{}", self.module, self.name, key),
            None => write!(f, "{}/{}", self.module, self.name),
        }
    }
}

/// Structured description of a failed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub message: String,
    /// HTTP status, absent for transport failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl Failure {
    pub fn http(status: u16, body: &str) -> Self {
        Self {
            message: body.to_string(),
            status: Some(status),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({})", self.message, status),
            None => f.write_str(&self.message),
        }
    }
}

/// Response metadata merged into state on a successful fetch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub http_status: u16,
    /// Envelope fields other than the record list
    pub other: Map<String, Value>,
    pub total_records: Option<u64>,
}

/// Operation-specific action data
#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    FetchStart,
    FetchSuccess { records: Vec<Value>, response: ResponseMeta },
    FetchError(Failure),
    /// Aborted or unsatisfiable fetch; resets the resource
    FetchAbort { message: String },
    Reset,

    PagingStart,
    PageStart { url: String },
    PageSuccess { url: String },
    PagingReset,

    CreateStart(Value),
    /// `optimistic` is the record inserted by `CreateStart`
    CreateSuccess { record: Value, optimistic: Value },
    CreateError { record: Value, failure: Failure },
    UpdateStart(Value),
    UpdateSuccess(Value),
    UpdateError { record: Value, failure: Failure },
    DeleteStart(Value),
    DeleteSuccess(Value),
    DeleteError { record: Value, failure: Failure },
}

impl ActionKind {
    /// Action type name, as it appears in logs
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::FetchStart => "FETCH_START",
            ActionKind::FetchSuccess { .. } => "FETCH_SUCCESS",
            ActionKind::FetchError(_) => "FETCH_ERROR",
            ActionKind::FetchAbort { .. } => "FETCH_ABORT",
            ActionKind::Reset => "RESET",
            ActionKind::PagingStart => "PAGING_START",
            ActionKind::PageStart { .. } => "PAGE_START",
            ActionKind::PageSuccess { .. } => "PAGE_SUCCESS",
            ActionKind::PagingReset => "PAGING_RESET",
            ActionKind::CreateStart(_) => "CREATE_START",
            ActionKind::CreateSuccess { .. } => "CREATE_SUCCESS",
            ActionKind::CreateError { .. } => "CREATE_ERROR",
            ActionKind::UpdateStart(_) => "UPDATE_START",
            ActionKind::UpdateSuccess(_) => "UPDATE_SUCCESS",
            ActionKind::UpdateError { .. } => "UPDATE_ERROR",
            ActionKind::DeleteStart(_) => "DELETE_START",
            ActionKind::DeleteSuccess(_) => "DELETE_SUCCESS",
            ActionKind::DeleteError { .. } => "DELETE_ERROR",
        }
    }
}

/// Routing and operation metadata carried by every action
#[derive(Debug, Clone, PartialEq)]
pub struct ActionMeta {
    pub key: ResourceKey,
    /// Resolved resource path, if known
    pub path: Option<String>,
    /// Declared offset of the records in a `FetchSuccess`
    pub offset: Option<u64>,
    /// Append records instead of replacing them
    pub accumulate: bool,
    /// Primary key field, for mutation bookkeeping
    pub pk: String,
    /// Suppress downstream side effects such as refreshes
    pub silent: bool,
}

impl ActionMeta {
    pub fn new(key: ResourceKey) -> Self {
        Self {
            key,
            path: None,
            offset: None,
            accumulate: false,
            pk: crate::resource::registry::DEFAULT_PK.to_string(),
            silent: false,
        }
    }
}

/// `{type, payload, meta}`
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    pub meta: ActionMeta,
}

impl Action {
    pub fn new(kind: ActionKind, meta: ActionMeta) -> Self {
        Self { kind, meta }
    }

    pub fn is_for(&self, key: &ResourceKey) -> bool {
        &self.meta.key == key
    }
}

/// The dispatch surface actions are sent through
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, action: Action);
}
