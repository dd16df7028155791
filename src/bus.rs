//! Mutation event bus
//!
//! Successful mutations are published here so that other resources can decide
//! whether to refresh. Publishers never hold references to subscribers.

use crate::resource::{ResourceKey, Verb};
use serde_json::Value;
use tokio::sync::broadcast;

/// Default channel capacity
const BUS_CAPACITY: usize = 256;

/// A mutation that completed successfully
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEvent {
    pub origin: ResourceKey,
    pub verb: Verb,
    /// Resolved path of the mutated resource
    pub path: Option<String>,
    pub record: Value,
    /// Subscribers should not react
    pub silent: bool,
}

/// Decides whether a resource whose current path is `own_path` should
/// refresh after `event`
pub type RefreshPredicate = fn(own_path: Option<&str>, event: &MutationEvent) -> bool;

fn first_segment(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or("");
    path.trim_start_matches('/').split('/').next().unwrap_or("")
}

/// Refresh when the mutation touched the same top-level path
pub fn default_should_refresh(own_path: Option<&str>, event: &MutationEvent) -> bool {
    if event.silent {
        return false;
    }
    match (own_path, event.path.as_deref()) {
        (Some(own), Some(mutated)) => {
            let own = first_segment(own);
            !own.is_empty() && own == first_segment(mutated)
        }
        _ => false,
    }
}

/// Broadcast channel shared by all resources
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MutationEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(BUS_CAPACITY)
    }

    /// Bus keeping at most `capacity` unread events per subscriber; slower
    /// subscribers skip the oldest ones
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; returns the number of subscribers that will see it
    pub fn publish(&self, event: MutationEvent) -> usize {
        tracing::debug!("publish {} {} {:?}", event.origin, event.verb, event.path);
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
