//! In-memory store
//!
//! A minimal host for resources: applies every dispatched action through the
//! reducer, keeps local (non-remote) values visible to templates, and records
//! the action log.

use crate::resource::{reduce, Action, Dispatch, ResourceKey, ResourceState};
use crate::session::{Session, StateAccess};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State tree for every resource in the application
#[derive(Debug, Default)]
pub struct Store {
    session: RwLock<Option<Session>>,
    states: Mutex<BTreeMap<ResourceKey, ResourceState>>,
    local: Mutex<HashMap<(String, Option<String>), Value>>,
    log: Mutex<Vec<Action>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        let store = Self::new();
        store.set_session(Some(session));
        store
    }

    pub fn set_session(&self, session: Option<Session>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    /// Set the value of a local resource
    pub fn set_local(&self, name: &str, data_key: Option<&str>, value: Value) {
        lock(&self.local).insert((name.to_string(), data_key.map(str::to_string)), value);
    }

    /// Current state of a resource (initial state if nothing was dispatched yet)
    pub fn state(&self, key: &ResourceKey) -> ResourceState {
        lock(&self.states).get(key).cloned().unwrap_or_default()
    }

    /// Every action dispatched so far, oldest first
    pub fn actions(&self) -> Vec<Action> {
        lock(&self.log).clone()
    }

    /// Names of the actions dispatched so far
    pub fn action_names(&self) -> Vec<&'static str> {
        lock(&self.log).iter().map(|a| a.kind.name()).collect()
    }

    pub fn clear_log(&self) {
        lock(&self.log).clear();
    }
}

impl Dispatch for Store {
    fn dispatch(&self, action: Action) {
        tracing::trace!("dispatch {} for {}", action.kind.name(), action.meta.key);
        {
            let mut states = lock(&self.states);
            let key = action.meta.key.clone();
            let current = states.entry(key.clone()).or_default();
            *current = reduce(current, &key, &action);
        }
        lock(&self.log).push(action);
    }
}

impl StateAccess for Store {
    fn session(&self) -> Option<Session> {
        self.session.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn resources(&self, data_key: Option<&str>) -> Map<String, Value> {
        let mut resources = Map::new();

        for (key, state) in lock(&self.states).iter() {
            if key.data_key.as_deref() == data_key {
                if let Ok(value) = serde_json::to_value(state) {
                    resources.insert(key.name.clone(), value);
                }
            }
        }

        for ((name, key), value) in lock(&self.local).iter() {
            if key.as_deref() == data_key {
                resources.insert(name.clone(), value.clone());
            }
        }

        resources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ActionKind, ActionMeta};
    use serde_json::json;

    #[test]
    fn test_dispatch_reduces_per_identity() {
        let store = Store::new();
        let users = ResourceKey::new("users", "app", None);
        let scoped = ResourceKey::new("users", "app", Some("k"));

        store.dispatch(Action::new(ActionKind::FetchStart, ActionMeta::new(users.clone())));
        assert!(store.state(&users).is_pending);
        assert!(!store.state(&scoped).is_pending);
        assert_eq!(store.action_names(), vec!["FETCH_START"]);
    }

    #[test]
    fn test_resources_scoped_by_data_key() {
        let store = Store::new();
        store.set_local("query", None, json!({"search": "ada"}));
        store.set_local("query", Some("k"), json!({"search": "bob"}));
        store.dispatch(Action::new(
            ActionKind::FetchStart,
            ActionMeta::new(ResourceKey::new("users", "app", None)),
        ));

        let resources = store.resources(None);
        assert_eq!(resources["query"]["search"], "ada");
        assert_eq!(resources["users"]["isPending"], true);

        let resources = store.resources(Some("k"));
        assert_eq!(resources["query"]["search"], "bob");
        assert!(!resources.contains_key("users"));
    }

    #[test]
    fn test_session_roundtrip() {
        let store = Store::new();
        assert!(store.session().is_none());
        store.set_session(Some(Session::new("http://h", "t")));
        assert_eq!(store.session().unwrap().tenant, "t");
    }
}
