//! Mutations
//!
//! Create, update and delete are applied to state optimistically, then
//! confirmed or rolled back when the server answers. Every confirmed
//! mutation is published on the event bus.

use super::action::{ActionKind, Failure};
use super::options::build_options;
use super::registry::Verb;
use super::url::url_from_options;
use super::{RestResource, Sent};
use crate::bus::MutationEvent;
use crate::error::{ConnectError, Result};
use crate::session::Props;
use serde_json::Value;

/// What a mutation ended with
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The record as the server (or, without a JSON body, the client) has it
    Saved(Value),
    Failed(Failure),
    Aborted,
}

fn pk_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Status of one mutation verb
struct Phases {
    start: fn(Value) -> ActionKind,
    error: fn(Value, Failure) -> ActionKind,
}

impl Phases {
    fn of(verb: Verb) -> Self {
        match verb {
            Verb::Get | Verb::Post => Phases {
                start: ActionKind::CreateStart,
                error: |record, failure| ActionKind::CreateError { record, failure },
            },
            Verb::Put => Phases {
                start: ActionKind::UpdateStart,
                error: |record, failure| ActionKind::UpdateError { record, failure },
            },
            Verb::Delete => Phases {
                start: ActionKind::DeleteStart,
                error: |record, failure| ActionKind::DeleteError { record, failure },
            },
        }
    }
}

impl RestResource {
    /// Create `record`, generating a primary key when it has none
    pub async fn create(&self, record: Value, props: &Props) -> Result<Option<MutationOutcome>> {
        self.mutate(Verb::Post, record, props, false).await
    }

    /// Replace the server copy of `record`
    pub async fn update(&self, record: Value, props: &Props) -> Result<Option<MutationOutcome>> {
        self.mutate(Verb::Put, record, props, false).await
    }

    /// Delete `record` by its primary key
    pub async fn delete(&self, record: Value, props: &Props) -> Result<Option<MutationOutcome>> {
        self.mutate(Verb::Delete, record, props, false).await
    }

    /// Run a mutation.
    ///
    /// `silent` marks the published event so that other resources do not
    /// refresh because of it. Returns `Ok(None)` when the verb's options
    /// cannot be resolved yet; nothing is dispatched in that case.
    pub async fn mutate(
        &self,
        verb: Verb,
        record: Value,
        props: &Props,
        silent: bool,
    ) -> Result<Option<MutationOutcome>> {
        let verb = if verb == Verb::Get { Verb::Post } else { verb };

        let Some(options) = build_options(verb, &self.def, self.state.as_ref(), props)? else {
            tracing::warn!("{}: {} options could not be resolved", self.def.name, verb);
            return Ok(None);
        };
        let pk = options.pk.clone();

        let (client_record, outgoing, pk_segment) = match verb {
            Verb::Post => {
                let mut client_record = record.clone();
                if let Value::Object(map) = &mut client_record {
                    if map.get(&pk).map_or(true, Value::is_null) {
                        map.insert(pk.clone(), Value::String(uuid::Uuid::new_v4().to_string()));
                    }
                }
                let outgoing = if options.client_generate_pk {
                    client_record.clone()
                } else {
                    record
                };
                (client_record, outgoing, None)
            }
            _ => {
                let Some(id) = record.get(&pk).and_then(pk_text) else {
                    return Err(ConnectError::MissingPrimaryKey {
                        resource: self.def.name.clone(),
                        pk,
                    });
                };
                (record.clone(), record, Some(id))
            }
        };

        let Some(url) = url_from_options(&options, pk_segment.as_deref()) else {
            tracing::warn!("{}: {} URL could not be composed", self.def.name, verb);
            return Ok(None);
        };

        let mut meta = self.meta(options.path.as_deref());
        meta.pk = pk.clone();
        meta.silent = silent;

        let phases = Phases::of(verb);
        tracing::info!("{}: {} {}", self.def.name, verb, url);
        self.dispatch((phases.start)(client_record.clone()), meta.clone());

        let body = (verb != Verb::Delete).then_some(&outgoing);
        let response = match self.send(verb.as_str(), verb, &url, &options.headers, body).await {
            Sent::Response(response) => response,
            Sent::Aborted => {
                let failure = Failure::transport(super::ABORT_MESSAGE);
                self.dispatch((phases.error)(client_record, failure), meta);
                return Ok(Some(MutationOutcome::Aborted));
            }
            Sent::Failed(err) => {
                let failure = Failure::transport(format!("{:#}", err));
                tracing::error!("{}: {} failed: {}", self.def.name, verb, failure);
                self.dispatch((phases.error)(client_record, failure.clone()), meta);
                return Ok(Some(MutationOutcome::Failed(failure)));
            }
        };

        if response.is_error() {
            let failure = Failure::http(response.status, &response.body);
            self.dispatch((phases.error)(client_record, failure.clone()), meta);
            return Ok(Some(MutationOutcome::Failed(failure)));
        }

        let saved = match verb {
            Verb::Delete => client_record.clone(),
            _ => match response.json() {
                Ok(Value::Object(mut map)) if response.is_json() => {
                    if !map.contains_key("id") {
                        if let Some(id) = map.get(&pk).cloned() {
                            map.insert("id".to_string(), id);
                        }
                    }
                    Value::Object(map)
                }
                _ => client_record.clone(),
            },
        };

        let success = match verb {
            Verb::Put => ActionKind::UpdateSuccess(saved.clone()),
            Verb::Delete => ActionKind::DeleteSuccess(saved.clone()),
            _ => ActionKind::CreateSuccess {
                record: saved.clone(),
                optimistic: client_record,
            },
        };
        self.dispatch(success, meta);

        if let Some(bus) = &self.bus {
            bus.publish(MutationEvent {
                origin: self.key(),
                verb,
                path: options.path.clone(),
                record: saved.clone(),
                silent,
            });
        }

        Ok(Some(MutationOutcome::Saved(saved)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pk_text() {
        assert_eq!(pk_text(&json!("abc")), Some("abc".to_string()));
        assert_eq!(pk_text(&json!(42)), Some("42".to_string()));
        assert_eq!(pk_text(&json!("")), None);
        assert_eq!(pk_text(&Value::Null), None);
    }

    #[test]
    fn test_phases_match_verb() {
        let record = json!({"id": 1});
        assert_eq!((Phases::of(Verb::Post).start)(record.clone()).name(), "CREATE_START");
        assert_eq!((Phases::of(Verb::Put).start)(record.clone()).name(), "UPDATE_START");
        let failure = Failure::transport("x");
        assert_eq!((Phases::of(Verb::Delete).error)(record, failure).name(), "DELETE_ERROR");
    }
}
