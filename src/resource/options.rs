//! Option Builder
//!
//! Turns a resource's configuration template into the concrete [`OptionSet`]
//! for one verb, resolving every templated field against the caller's context.

use super::registry::{MapTemplate, ResourceDef, ResourceKind, StaticFallback, Verb, DEFAULT_PK};
use crate::error::{ConnectError, Result};
use crate::session::{Props, StateAccess};
use crate::template::{resolve, type_name, ConfigValue, Resolution, TemplateContext};
use serde_json::Value;
use std::collections::BTreeMap;

/// Header carrying the session's tenant
pub const TENANT_HEADER: &str = "X-Tenant";

/// Header carrying the session's token
pub const TOKEN_HEADER: &str = "X-Token";

/// Effective options for one request
#[derive(Debug, Clone, PartialEq)]
pub struct OptionSet {
    pub verb: Verb,
    pub root: Option<String>,
    /// `None` when the path template could not be satisfied
    pub path: Option<String>,
    /// `None` when a parameter could not be satisfied
    pub params: Option<BTreeMap<String, Value>>,
    pub headers: BTreeMap<String, String>,
    pub records: Option<String>,
    pub records_required: Option<u64>,
    pub result_offset: Option<u64>,
    pub per_request: Option<u64>,
    pub limit_param: Option<String>,
    pub offset_param: Option<String>,
    pub pk: String,
    pub client_generate_pk: bool,
    pub static_fallback: Option<StaticFallback>,
    pub permissions_required: Vec<String>,
}

impl Default for OptionSet {
    fn default() -> Self {
        Self {
            verb: Verb::Get,
            root: None,
            path: None,
            params: Some(BTreeMap::new()),
            headers: BTreeMap::new(),
            records: None,
            records_required: None,
            result_offset: None,
            per_request: None,
            limit_param: None,
            offset_param: None,
            pk: DEFAULT_PK.to_string(),
            client_generate_pk: true,
            static_fallback: None,
            permissions_required: Vec::new(),
        }
    }
}

impl OptionSet {
    /// Options for a literal path, mostly useful in tests
    pub fn with_path(path: &str) -> Self {
        Self {
            path: Some(path.to_string()),
            ..Default::default()
        }
    }

    /// Merge a static fallback over the path and params
    pub(crate) fn apply_static_fallback(&mut self, fallback: &StaticFallback) {
        if let Some(path) = &fallback.path {
            self.path = Some(path.clone());
        }
        if let Some(fallback_params) = &fallback.params {
            let mut params = self.params.take().unwrap_or_default();
            params.extend(fallback_params.iter().map(|(k, v)| (k.clone(), v.clone())));
            self.params = Some(params);
        }
    }
}

/// Integer option after resolution
enum Count {
    Absent,
    Value(u64),
    Unsatisfied,
}

fn resolve_count(
    field: &str,
    value: Option<&ConfigValue>,
    ctx: &TemplateContext<'_>,
    allow_zero: bool,
) -> Result<Count> {
    let Some(value) = value else {
        return Ok(Count::Absent);
    };

    let resolved = match value {
        ConfigValue::Literal(n @ Value::Number(_)) => n.clone(),
        other => match resolve(field, other, ctx)? {
            Resolution::Satisfied(Value::Null) | Resolution::Undefined => return Ok(Count::Absent),
            Resolution::Satisfied(v) => v,
            Resolution::Unsatisfied { .. } => return Ok(Count::Unsatisfied),
        },
    };

    let parsed = match &resolved {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    Ok(match parsed {
        Some(n) if n > 0 || (allow_zero && n == 0) => Count::Value(n as u64),
        _ => {
            tracing::debug!("{} resolved to unusable value {}", field, resolved);
            Count::Unsatisfied
        }
    })
}

/// Resolve an object-valued option. `Ok(None)` means it cannot be satisfied.
fn resolve_map(
    field: &str,
    template: &MapTemplate,
    ctx: &TemplateContext<'_>,
) -> Result<Option<BTreeMap<String, Value>>> {
    match template {
        MapTemplate::Values(values) => {
            let mut resolved = BTreeMap::new();
            for (key, value) in values {
                match resolve(&format!("{}.{}", field, key), value, ctx)? {
                    Resolution::Satisfied(v) => {
                        resolved.insert(key.clone(), v);
                    }
                    Resolution::Undefined => {}
                    Resolution::Unsatisfied { .. } => return Ok(None),
                }
            }
            Ok(Some(resolved))
        }
        MapTemplate::Callback(callback) => match callback(ctx) {
            Some(Value::Object(map)) => Ok(Some(map.into_iter().collect())),
            Some(Value::Null) => Ok(None),
            None => Ok(Some(BTreeMap::new())),
            Some(other) => Err(ConnectError::InvalidTemplateType {
                field: field.to_string(),
                found: type_name(&other).to_string(),
            }),
        },
    }
}

fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Root URL and headers contributed by application state rather than the manifest
struct StateOptions {
    root: String,
    headers: BTreeMap<String, String>,
}

fn state_options(def: &ResourceDef, state: &dyn StateAccess) -> Result<Option<StateOptions>> {
    if def.kind != ResourceKind::Tenant {
        return Ok(None);
    }

    let session = state
        .session()
        .ok_or_else(|| ConnectError::MissingSession(def.name.clone()))?;

    let mut headers = BTreeMap::new();
    headers.insert(TENANT_HEADER.to_string(), session.tenant);
    if let Some(token) = session.token {
        headers.insert(TOKEN_HEADER.to_string(), token);
    }

    Ok(Some(StateOptions {
        root: session.url,
        headers,
    }))
}

/// Build the effective options for `verb`.
///
/// Returns `Ok(None)` when a required dynamic value is missing. An unresolved
/// `path` or `params` is reported inside the set instead, so that the URL
/// composer can still apply a static fallback.
pub fn build_options(
    verb: Verb,
    def: &ResourceDef,
    state: &dyn StateAccess,
    props: &Props,
) -> Result<Option<OptionSet>> {
    let template = def.verb_template(verb);
    let from_state = state_options(def, state)?;

    let ctx = TemplateContext::new(props, state);

    let path = match &template.path {
        None => Some(String::new()),
        Some(value) => match resolve("path", value, &ctx)? {
            Resolution::Satisfied(v) => value_to_text(v),
            Resolution::Undefined => None,
            Resolution::Unsatisfied { partial } => {
                tracing::debug!("{}: path unsatisfied ({})", def.name, partial);
                None
            }
        },
    };

    let params = match &template.params {
        None => Some(BTreeMap::new()),
        Some(params) => resolve_map("params", params, &ctx)?,
    };

    let mut headers = match &template.headers {
        None => BTreeMap::new(),
        Some(headers) => match resolve_map("headers", headers, &ctx)? {
            Some(headers) => headers
                .into_iter()
                .filter_map(|(k, v)| value_to_text(v).map(|v| (k, v)))
                .collect(),
            None => return Ok(None),
        },
    };

    let mut root = template.root.clone();
    if let Some(from_state) = from_state {
        root = Some(from_state.root);
        headers.extend(from_state.headers);
    }

    let records = match &template.records {
        None => None,
        Some(value) => match resolve("records", value, &ctx)? {
            Resolution::Satisfied(v) => value_to_text(v),
            Resolution::Undefined => None,
            Resolution::Unsatisfied { .. } => return Ok(None),
        },
    };

    let required = template.records_required.as_ref();
    let records_required = match resolve_count("recordsRequired", required, &ctx, false)? {
        Count::Absent => None,
        Count::Value(n) => Some(n),
        Count::Unsatisfied => return Ok(None),
    };

    let offset = template.result_offset.as_ref();
    let result_offset = match resolve_count("resultOffset", offset, &ctx, true)? {
        Count::Absent => None,
        Count::Value(n) => Some(n),
        Count::Unsatisfied => return Ok(None),
    };

    let client_generate_pk = match &template.client_generate_pk {
        None => true,
        Some(value) => match resolve("clientGeneratePk", value, &ctx)? {
            Resolution::Satisfied(Value::Bool(b)) => b,
            Resolution::Satisfied(Value::String(s)) => s == "true",
            Resolution::Satisfied(_) | Resolution::Undefined => false,
            Resolution::Unsatisfied { .. } => return Ok(None),
        },
    };

    let mut options = OptionSet {
        verb,
        root,
        path,
        params,
        headers,
        records,
        records_required,
        result_offset,
        per_request: template.per_request,
        limit_param: template.limit_param.clone(),
        offset_param: template.offset_param.clone(),
        pk: template.pk.clone().unwrap_or_else(|| DEFAULT_PK.to_string()),
        client_generate_pk,
        static_fallback: template.static_fallback.clone(),
        permissions_required: template.permissions_required.clone().unwrap_or_default(),
    };

    if options.path.is_none() {
        if let Some(fallback) = &template.static_fallback {
            tracing::debug!("{}: applying static fallback", def.name);
            options.apply_static_fallback(fallback);
        }
    }

    // Single place the page size is injected into the query
    if verb.is_read() {
        if let (Some(params), Some(per_request), Some(limit_param)) =
            (options.params.as_mut(), options.per_request, options.limit_param.as_ref())
        {
            params.insert(limit_param.clone(), Value::from(per_request));
        }
    }

    Ok(Some(options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::registry::Manifest;
    use crate::session::Session;
    use serde_json::{json, Map};

    struct TestState {
        session: Option<Session>,
        resources: Map<String, Value>,
    }

    impl StateAccess for TestState {
        fn session(&self) -> Option<Session> {
            self.session.clone()
        }

        fn resources(&self, _data_key: Option<&str>) -> Map<String, Value> {
            self.resources.clone()
        }
    }

    fn state() -> TestState {
        let mut resources = Map::new();
        resources.insert("resultCount".to_string(), json!({"count": 30}));
        TestState {
            session: Some(Session::new("http://okapi:9130", "diku").with_token("tok")),
            resources,
        }
    }

    const MANIFEST: &str = r#"{
        "resources": {
            "users": {
                "type": "tenant",
                "path": "users/:{id:-}",
                "records": "users",
                "recordsRequired": "%{resultCount.count}",
                "perRequest": 10,
                "limitParam": "limit",
                "params": {"query": "?{query:-cql.allRecords=1}"}
            },
            "note": {
                "root": "http://notes",
                "path": "notes/:{noteId}",
                "staticFallback": {"path": "notes", "params": {"fallback": "yes"}}
            },
            "search": {
                "root": "http://search",
                "path": "search",
                "params": {"q": "?{q}", "x": "1"},
                "recordsRequired": "!{count}"
            }
        }
    }"#;

    fn manifest() -> Manifest {
        Manifest::from_json_str(MANIFEST).unwrap()
    }

    #[test]
    fn test_tenant_options_from_session() {
        let def = manifest().resource("users", None).unwrap();
        let props = Props::new().with_route_param("id", "u1");
        let options = build_options(Verb::Get, &def, &state(), &props).unwrap().unwrap();

        assert_eq!(options.root.as_deref(), Some("http://okapi:9130"));
        assert_eq!(options.path.as_deref(), Some("users/u1"));
        assert_eq!(options.headers.get(TENANT_HEADER).map(String::as_str), Some("diku"));
        assert_eq!(options.headers.get(TOKEN_HEADER).map(String::as_str), Some("tok"));
        assert_eq!(options.headers.get("Accept").map(String::as_str), Some("application/json"));
        assert_eq!(options.records.as_deref(), Some("users"));
        assert_eq!(options.records_required, Some(30));
    }

    #[test]
    fn test_limit_injected_for_reads_only() {
        let def = manifest().resource("users", None).unwrap();
        let props = Props::new();

        let get = build_options(Verb::Get, &def, &state(), &props).unwrap().unwrap();
        let params = get.params.unwrap();
        assert_eq!(params.get("limit"), Some(&json!(10)));
        assert_eq!(params.get("query"), Some(&json!("cql.allRecords=1")));

        let post = build_options(Verb::Post, &def, &state(), &props).unwrap().unwrap();
        assert!(!post.params.unwrap().contains_key("limit"));
    }

    #[test]
    fn test_missing_session_is_configuration_error() {
        let def = manifest().resource("users", None).unwrap();
        let state = TestState {
            session: None,
            resources: Map::new(),
        };
        let err = build_options(Verb::Get, &def, &state, &Props::new()).unwrap_err();
        assert!(matches!(err, ConnectError::MissingSession(_)));
    }

    #[test]
    fn test_static_fallback_applied_when_path_unsatisfied() {
        let def = manifest().resource("note", None).unwrap();
        let options = build_options(Verb::Get, &def, &state(), &Props::new()).unwrap().unwrap();
        assert_eq!(options.path.as_deref(), Some("notes"));
        assert_eq!(options.params.unwrap().get("fallback"), Some(&json!("yes")));
    }

    #[test]
    fn test_unsatisfied_param_nulls_params() {
        let def = manifest().resource("search", None).unwrap();
        let props = Props::new().with_prop("count", 5);
        let options = build_options(Verb::Get, &def, &state(), &props).unwrap().unwrap();
        assert_eq!(options.path.as_deref(), Some("search"));
        assert_eq!(options.params, None);

        let props = props.with_query("q=abc");
        let options = build_options(Verb::Get, &def, &state(), &props).unwrap().unwrap();
        let params = options.params.unwrap();
        assert_eq!(params.get("q"), Some(&json!("abc")));
        assert_eq!(params.get("x"), Some(&json!("1")));
    }

    #[test]
    fn test_unusable_records_required_is_unsatisfiable() {
        let def = manifest().resource("search", None).unwrap();

        let props = Props::new().with_query("q=a");
        assert_eq!(build_options(Verb::Get, &def, &state(), &props).unwrap(), None);

        let props = Props::new().with_query("q=a").with_prop("count", "0");
        assert_eq!(build_options(Verb::Get, &def, &state(), &props).unwrap(), None);

        let props = Props::new().with_query("q=a").with_prop("count", "many");
        assert_eq!(build_options(Verb::Get, &def, &state(), &props).unwrap(), None);
    }

    #[test]
    fn test_params_callback() {
        let mut def = manifest().resource("search", None).unwrap();
        def.options.records_required = None;
        def.options.params = Some(MapTemplate::callback(|ctx| {
            ctx.query().get("q").map(|q| json!({"query": q}))
        }));

        let props = Props::new().with_query("q=z");
        let options = build_options(Verb::Get, &def, &state(), &props).unwrap().unwrap();
        assert_eq!(options.params.unwrap().get("query"), Some(&json!("z")));

        let options = build_options(Verb::Get, &def, &state(), &Props::new()).unwrap().unwrap();
        assert_eq!(options.params, Some(BTreeMap::new()));
    }

    #[test]
    fn test_invalid_literal_in_params() {
        let manifest = r#"{"resources": {"x": {"path": "x", "params": {"limit": 10}}}}"#;
        let manifest = Manifest::from_json_str(manifest).unwrap();
        let def = manifest.resource("x", None).unwrap();
        let err = build_options(Verb::Get, &def, &state(), &Props::new()).unwrap_err();
        assert!(matches!(
            err,
            ConnectError::InvalidTemplateType { ref field, .. } if field == "params.limit"
        ));
    }
}
