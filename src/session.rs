//! Session and caller context
//!
//! The interfaces the core consumes from its surroundings: session/auth
//! information, sibling resource state and the caller's routing context.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Session information owned by the host application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Root URL for session-backed resources
    pub url: String,
    /// Tenant identifier sent with every request
    pub tenant: String,
    /// Optional access token
    #[serde(default)]
    pub token: Option<String>,
    /// Permissions granted to the current user
    #[serde(default)]
    pub permissions: BTreeSet<String>,
}

impl Session {
    pub fn new(url: &str, tenant: &str) -> Self {
        Self {
            url: url.to_string(),
            tenant: tenant.to_string(),
            token: None,
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn with_permissions<I, S>(mut self, perms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.extend(perms.into_iter().map(Into::into));
        self
    }

    /// Permissions from `required` that this session lacks
    pub fn missing_permissions<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|p| !self.permissions.contains(p.as_str()))
            .map(|p| p.as_str())
            .collect()
    }
}

/// Read access to application state.
pub trait StateAccess: Send + Sync {
    /// Current session, if one has been established
    fn session(&self) -> Option<Session>;

    /// Current value of every resource visible under `data_key`, keyed by
    /// resource name. REST resources appear as their serialized state.
    fn resources(&self, data_key: Option<&str>) -> Map<String, Value>;
}

/// Caller context: route, query string and passthrough properties.
#[derive(Debug, Clone, Default)]
pub struct Props {
    /// Raw query string of the current location, with or without a leading `?`
    pub query: String,
    /// Route parameters
    pub route_params: Map<String, Value>,
    /// Arbitrary passthrough properties
    pub extra: Map<String, Value>,
    /// Disambiguates multiple instances of the same resource
    pub data_key: Option<String>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = query.to_string();
        self
    }

    pub fn with_route_param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.route_params.insert(name.to_string(), value.into());
        self
    }

    pub fn with_prop(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(name.to_string(), value.into());
        self
    }

    pub fn with_data_key(mut self, data_key: &str) -> Self {
        self.data_key = Some(data_key.to_string());
        self
    }

    /// Parse the query string. Repeated keys collect into an array.
    pub fn parsed_query(&self) -> Map<String, Value> {
        parse_query(&self.query)
    }
}

/// Parse a URL query string into a JSON object
pub fn parse_query(query: &str) -> Map<String, Value> {
    let mut parsed = Map::new();
    let trimmed = query.trim_start_matches('?');

    for (key, value) in url::form_urlencoded::parse(trimmed.as_bytes()) {
        let value = Value::String(value.into_owned());
        match parsed.get_mut(key.as_ref()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                parsed.insert(key.into_owned(), value);
            }
        }
    }

    parsed
}
