//! Abort controller registry
//!
//! Maps operation keys (`fetch`, `create`, page URLs, ...) to the handles
//! that cancel them.

use futures::future::{AbortHandle, AbortRegistration};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Identifies one registration, so a finished operation never removes the
/// handle of a newer operation registered under the same key
pub type Ticket = u64;

/// In-flight cancellable operations of one resource
#[derive(Debug, Default)]
pub struct AbortRegistry {
    handles: Mutex<HashMap<String, (Ticket, AbortHandle)>>,
    next_ticket: AtomicU64,
}

impl AbortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new operation under `key`, replacing any previous handle
    pub fn register(&self, key: &str) -> (Ticket, AbortRegistration) {
        let (handle, registration) = AbortHandle::new_pair();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), (ticket, handle));
        (ticket, registration)
    }

    /// Forget the operation under `key` once it has completed
    pub fn finish(&self, key: &str, ticket: Ticket) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if handles.get(key).map(|(t, _)| *t) == Some(ticket) {
            handles.remove(key);
        }
    }

    /// Abort every tracked operation and clear the registry.
    /// Returns how many operations were aborted.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<AbortHandle> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, (_, handle))| handle)
            .collect();

        for handle in &drained {
            handle.abort();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
