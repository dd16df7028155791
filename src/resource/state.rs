//! Resource state and its reducer
//!
//! [`reduce`] is a pure function from (state, action) to the next state for
//! one resource identity. Actions addressed to any other identity leave the
//! state untouched.

use super::action::{Action, ActionKind, ActionMeta, Failure, ResourceKey};
use super::registry::Verb;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Number of entries kept in `successful_mutations`
pub const MUTATION_HISTORY_LIMIT: usize = 25;

/// A mutation the server accepted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationRecord {
    pub verb: Verb,
    pub record: Value,
    pub at: DateTime<Utc>,
}

/// A mutation the server (or the network) rejected
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedMutation {
    pub verb: Verb,
    pub record: Value,
    pub failure: Failure,
    pub at: DateTime<Utc>,
}

/// Progress of one page in a paging session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStatus {
    pub url: String,
    pub is_complete: bool,
}

/// Observable state of one resource
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceState {
    pub has_loaded: bool,
    pub is_pending: bool,
    #[serde(serialize_with = "serialize_failed")]
    pub failed: Option<Failure>,
    /// Possibly sparse: unfilled slots are `null`
    pub records: Vec<Value>,
    /// Most recent first
    pub successful_mutations: Vec<MutationRecord>,
    /// Most recent first
    pub failed_mutations: Vec<FailedMutation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub other: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_records: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub paging: Vec<PageStatus>,
}

/// `failed` is `false` when absent
fn serialize_failed<S: Serializer>(failed: &Option<Failure>, s: S) -> Result<S::Ok, S::Error> {
    match failed {
        Some(failure) => failure.serialize(s),
        None => s.serialize_bool(false),
    }
}

impl ResourceState {
    /// Every page in the current paging session has arrived
    pub fn paging_complete(&self) -> bool {
        self.paging.iter().all(|p| p.is_complete)
    }
}

/// Compute the next state for the resource identified by `key`
pub fn reduce(state: &ResourceState, key: &ResourceKey, action: &Action) -> ResourceState {
    if !action.is_for(key) {
        return state.clone();
    }

    let meta = &action.meta;
    match &action.kind {
        ActionKind::FetchStart => ResourceState {
            is_pending: true,
            ..state.clone()
        },
        ActionKind::FetchSuccess { records, response } => ResourceState {
            has_loaded: true,
            is_pending: false,
            failed: None,
            records: merge_records(&state.records, records, meta),
            url: Some(response.url.clone()),
            headers: response.headers.clone(),
            http_status: Some(response.http_status),
            other: response.other.clone(),
            total_records: response.total_records,
            paging: Vec::new(),
            ..state.clone()
        },
        ActionKind::FetchError(failure) => ResourceState {
            is_pending: false,
            failed: Some(failure.clone()),
            ..state.clone()
        },
        ActionKind::FetchAbort { .. } | ActionKind::Reset => ResourceState::default(),

        ActionKind::PagingStart | ActionKind::PagingReset => ResourceState {
            paging: Vec::new(),
            ..state.clone()
        },
        ActionKind::PageStart { url } => {
            let mut next = state.clone();
            if !next.paging.iter().any(|p| &p.url == url) {
                next.paging.push(PageStatus {
                    url: url.clone(),
                    is_complete: false,
                });
            }
            next
        }
        ActionKind::PageSuccess { url } => {
            let mut next = state.clone();
            for page in next.paging.iter_mut().filter(|p| &p.url == url) {
                page.is_complete = true;
            }
            next
        }

        ActionKind::CreateStart(record) => {
            let mut next = state.clone();
            next.records.push(record.clone());
            next
        }
        ActionKind::CreateSuccess { record, optimistic } => {
            let mut next = state.clone();
            let slot = pk_of(optimistic, &meta.pk)
                .and_then(|id| next.records.iter().position(|r| pk_of(r, &meta.pk) == Some(id)));
            match slot {
                Some(index) => next.records[index] = record.clone(),
                None => {
                    if !replace_by_pk(&mut next.records, record, &meta.pk) {
                        next.records.push(record.clone());
                    }
                }
            }
            record_success(&mut next, Verb::Post, record);
            next
        }
        ActionKind::CreateError { record, failure } => {
            let mut next = state.clone();
            remove_by_pk(&mut next.records, record, &meta.pk);
            record_failure(&mut next, Verb::Post, record, failure);
            next
        }
        ActionKind::UpdateStart(record) => {
            let mut next = state.clone();
            replace_by_pk(&mut next.records, record, &meta.pk);
            next
        }
        ActionKind::UpdateSuccess(record) => {
            let mut next = state.clone();
            replace_by_pk(&mut next.records, record, &meta.pk);
            record_success(&mut next, Verb::Put, record);
            next
        }
        ActionKind::UpdateError { record, failure } => {
            let mut next = state.clone();
            record_failure(&mut next, Verb::Put, record, failure);
            next
        }
        ActionKind::DeleteStart(_) => state.clone(),
        ActionKind::DeleteSuccess(record) => {
            let mut next = state.clone();
            remove_by_pk(&mut next.records, record, &meta.pk);
            record_success(&mut next, Verb::Delete, record);
            next
        }
        ActionKind::DeleteError { record, failure } => {
            let mut next = state.clone();
            record_failure(&mut next, Verb::Delete, record, failure);
            next
        }
    }
}

/// Combine fetched records with the existing list.
///
/// Without an offset the page replaces the list (or is appended when
/// accumulating). With an offset the page is appended when accumulating,
/// otherwise spliced into a copy of the list at `offset`, padding with `null`.
fn merge_records(existing: &[Value], incoming: &[Value], meta: &ActionMeta) -> Vec<Value> {
    if meta.accumulate {
        let mut out = existing.to_vec();
        out.extend_from_slice(incoming);
        return out;
    }

    let Some(offset) = meta.offset else {
        return incoming.to_vec();
    };

    let offset = offset as usize;
    let mut out = existing.to_vec();
    let needed = offset + incoming.len();
    if out.len() < needed {
        out.resize(needed, Value::Null);
    }
    out[offset..needed].clone_from_slice(incoming);
    out
}

fn pk_of<'a>(record: &'a Value, pk: &str) -> Option<&'a Value> {
    record.get(pk).filter(|v| !v.is_null())
}

fn replace_by_pk(records: &mut [Value], record: &Value, pk: &str) -> bool {
    let Some(id) = pk_of(record, pk) else {
        return false;
    };
    match records.iter_mut().find(|r| pk_of(r, pk) == Some(id)) {
        Some(slot) => {
            *slot = record.clone();
            true
        }
        None => false,
    }
}

fn remove_by_pk(records: &mut Vec<Value>, record: &Value, pk: &str) {
    if let Some(id) = pk_of(record, pk) {
        records.retain(|r| pk_of(r, pk) != Some(id));
    }
}

fn record_success(state: &mut ResourceState, verb: Verb, record: &Value) {
    state.successful_mutations.insert(
        0,
        MutationRecord {
            verb,
            record: record.clone(),
            at: Utc::now(),
        },
    );
    state.successful_mutations.truncate(MUTATION_HISTORY_LIMIT);
}

fn record_failure(state: &mut ResourceState, verb: Verb, record: &Value, failure: &Failure) {
    state.failed_mutations.insert(
        0,
        FailedMutation {
            verb,
            record: record.clone(),
            failure: failure.clone(),
            at: Utc::now(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::action::ResponseMeta;
    use serde_json::json;

    fn key() -> ResourceKey {
        ResourceKey::new("users", "app", None)
    }

    fn action(kind: ActionKind) -> Action {
        Action::new(kind, ActionMeta::new(key()))
    }

    fn apply(state: &ResourceState, kind: ActionKind) -> ResourceState {
        reduce(state, &key(), &action(kind))
    }

    fn success(records: Vec<Value>) -> ActionKind {
        ActionKind::FetchSuccess {
            records,
            response: ResponseMeta {
                url: "/users".to_string(),
                http_status: 200,
                total_records: Some(2),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_ignores_other_resources() {
        let state = ResourceState::default();
        let keyed = ActionMeta::new(ResourceKey::new("users", "app", Some("k")));
        let other = Action::new(ActionKind::FetchStart, keyed);
        assert_eq!(reduce(&state, &key(), &other), state);

        let foreign = ActionMeta::new(ResourceKey::new("users", "other", None));
        let other = Action::new(ActionKind::FetchStart, foreign);
        assert_eq!(reduce(&state, &key(), &other), state);
    }

    #[test]
    fn test_fetch_lifecycle() {
        let state = ResourceState::default();
        let state = reduce(&state, &key(), &action(ActionKind::FetchStart));
        assert!(state.is_pending);
        assert!(!state.has_loaded);

        let state = apply(&state, success(vec![json!({"id": 1}), json!({"id": 2})]));
        assert!(state.has_loaded);
        assert!(!state.is_pending);
        assert_eq!(state.failed, None);
        assert_eq!(state.records.len(), 2);
        assert_eq!(state.total_records, Some(2));
        assert_eq!(state.url.as_deref(), Some("/users"));
    }

    #[test]
    fn test_fetch_error_marks_failed() {
        let state = reduce(&ResourceState::default(), &key(), &action(ActionKind::FetchStart));
        let state = apply(&state, ActionKind::FetchError(Failure::http(500, "boom")));
        assert!(!state.is_pending);
        assert_eq!(state.failed, Some(Failure::http(500, "boom")));
    }

    #[test]
    fn test_abort_resets_everything() {
        let state = apply(&ResourceState::default(), success(vec![json!({"id": 1})]));
        let state = reduce(&state, &key(), &action(ActionKind::FetchStart));
        let state = reduce(
            &state,
            &key(),
            &action(ActionKind::FetchAbort {
                message: "cancelled".to_string(),
            }),
        );
        assert_eq!(state, ResourceState::default());
        assert!(state.records.is_empty());
    }

    #[test]
    fn test_accumulate_appends() {
        let mut meta = ActionMeta::new(key());
        meta.accumulate = true;
        let state = reduce(&ResourceState::default(), &key(), &action(success(vec![json!(1)])));
        let state = reduce(&state, &key(), &Action::new(success(vec![json!(2), json!(3)]), meta));
        assert_eq!(state.records, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_offset_splice_leaves_holes() {
        let state = apply(&ResourceState::default(), success(vec![json!("a"), json!("b")]));
        let mut meta = ActionMeta::new(key());
        meta.offset = Some(5);
        let page = Action::new(success(vec![json!("f"), json!("g")]), meta);
        let state = reduce(&state, &key(), &page);

        let hole = Value::Null;
        assert_eq!(
            state.records,
            vec![json!("a"), json!("b"), hole.clone(), hole.clone(), hole, json!("f"), json!("g")]
        );
    }

    #[test]
    fn test_offset_splice_overwrites_existing() {
        let state = reduce(
            &ResourceState::default(),
            &key(),
            &action(success(vec![json!(0), json!(1), json!(2), json!(3)])),
        );
        let mut meta = ActionMeta::new(key());
        meta.offset = Some(2);
        let state = reduce(&state, &key(), &Action::new(success(vec![json!("x")]), meta));
        assert_eq!(state.records, vec![json!(0), json!(1), json!("x"), json!(3)]);
    }

    #[test]
    fn test_optimistic_create() {
        let record = json!({"id": "c-1", "name": "draft"});
        let state = apply(&ResourceState::default(), ActionKind::CreateStart(record.clone()));
        assert_eq!(state.records, vec![record.clone()]);

        let saved = json!({"id": "c-1", "name": "saved"});
        let state = reduce(
            &state,
            &key(),
            &action(ActionKind::CreateSuccess {
                record: saved.clone(),
                optimistic: record,
            }),
        );
        assert_eq!(state.records, vec![saved.clone()]);
        assert_eq!(state.successful_mutations[0].record, saved);
        assert_eq!(state.successful_mutations[0].verb, Verb::Post);
        assert!(!state.has_loaded);
    }

    #[test]
    fn test_create_success_replaces_optimistic_with_server_pk() {
        let draft = json!({"id": "client-1", "name": "draft"});
        let state = apply(&ResourceState::default(), ActionKind::CreateStart(draft.clone()));
        let saved = json!({"id": 42, "name": "draft"});
        let state = reduce(
            &state,
            &key(),
            &action(ActionKind::CreateSuccess {
                record: saved.clone(),
                optimistic: draft,
            }),
        );
        assert_eq!(state.records, vec![saved]);
    }

    #[test]
    fn test_create_error_rolls_back() {
        let record = json!({"id": "c-1"});
        let state = apply(&ResourceState::default(), ActionKind::CreateStart(record.clone()));
        let state = reduce(
            &state,
            &key(),
            &action(ActionKind::CreateError {
                record,
                failure: Failure::http(422, "invalid"),
            }),
        );
        assert!(state.records.is_empty());
        assert_eq!(state.failed_mutations.len(), 1);
        assert_eq!(state.failed_mutations[0].failure.status, Some(422));
        assert_eq!(state.failed, None);
    }

    #[test]
    fn test_update_and_delete() {
        let state = reduce(
            &ResourceState::default(),
            &key(),
            &action(success(vec![json!({"id": 1, "v": "a"}), json!({"id": 2, "v": "b"})])),
        );
        let state = apply(&state, ActionKind::UpdateSuccess(json!({"id": 2, "v": "c"})));
        assert_eq!(state.records[1]["v"], "c");

        let state = reduce(&state, &key(), &action(ActionKind::DeleteSuccess(json!({"id": 1}))));
        assert_eq!(state.records, vec![json!({"id": 2, "v": "c"})]);
        assert_eq!(state.successful_mutations.len(), 2);
        assert_eq!(state.successful_mutations[0].verb, Verb::Delete);
        assert!(state.has_loaded);
    }

    #[test]
    fn test_mutation_history_is_bounded() {
        let mut state = ResourceState::default();
        for i in 0..(MUTATION_HISTORY_LIMIT + 5) {
            state = reduce(&state, &key(), &action(ActionKind::UpdateSuccess(json!({"id": i}))));
        }
        assert_eq!(state.successful_mutations.len(), MUTATION_HISTORY_LIMIT);
        assert_eq!(state.successful_mutations[0].record["id"], json!(MUTATION_HISTORY_LIMIT + 4));
    }

    #[test]
    fn test_paging_progress() {
        let state = reduce(&ResourceState::default(), &key(), &action(ActionKind::PagingStart));
        let state = reduce(&state, &key(), &action(ActionKind::PageStart { url: "/a".into() }));
        let state = reduce(&state, &key(), &action(ActionKind::PageStart { url: "/b".into() }));
        assert!(!state.paging_complete());

        let state = reduce(&state, &key(), &action(ActionKind::PageSuccess { url: "/b".into() }));
        let state = reduce(&state, &key(), &action(ActionKind::PageSuccess { url: "/a".into() }));
        assert!(state.paging_complete());

        let state = reduce(&state, &key(), &action(ActionKind::PagingReset));
        assert!(state.paging.is_empty());
    }

    #[test]
    fn test_failed_serializes_as_false() {
        let value = serde_json::to_value(ResourceState::default()).unwrap();
        assert_eq!(value["failed"], json!(false));
        assert_eq!(value["hasLoaded"], json!(false));
        assert_eq!(value["records"], json!([]));
    }
}
