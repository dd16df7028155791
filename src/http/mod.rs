//! HTTP transport
//!
//! - [`client`] - reqwest wrapper returning fully-read responses
//! - [`abort`] - per-resource registry of cancellable operations

pub mod abort;
pub mod client;

pub use abort::{AbortRegistry, Ticket};
pub use client::{sanitize_for_log, HttpClient, HttpResponse};
