//! Error types
//!
//! Configuration problems surface as [`ConnectError`] and are returned
//! synchronously. Runtime HTTP failures never use this type: they are turned
//! into [`crate::resource::Failure`] values carried by dispatched actions.

use thiserror::Error;

/// Errors raised while loading a manifest or resolving a resource's options.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// A configuration value had a type the template resolver cannot handle.
    #[error(
        "Invalid template type for '{field}': expected string, boolean or callback, got {found}"
    )]
    InvalidTemplateType { field: String, found: String },

    /// A session-backed resource was used before any session was available.
    #[error("Resource '{0}' requires a session (url and tenant) but none is available")]
    MissingSession(String),

    /// The manifest has no entry with this name.
    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    /// The manifest is structurally valid but describes something unusable.
    #[error("Invalid manifest entry '{resource}': {reason}")]
    InvalidManifest { resource: String, reason: String },

    /// An update or delete was given a record without its primary key.
    #[error("Record for '{resource}' has no '{pk}' value")]
    MissingPrimaryKey { resource: String, pk: String },

    /// The manifest could not be parsed.
    #[error("Failed to parse manifest: {0}")]
    Manifest(String),
}

impl From<serde_json::Error> for ConnectError {
    fn from(err: serde_json::Error) -> Self {
        ConnectError::Manifest(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConnectError {
    fn from(err: serde_yaml::Error) -> Self {
        ConnectError::Manifest(err.to_string())
    }
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, ConnectError>;
