//! Resource Registry - Load resource definitions from a manifest
//!
//! A manifest is a JSON or YAML document mapping resource names to their
//! configuration templates. Loading it yields a [`Manifest`] value that is
//! passed to whoever needs it; there is no global registry.

use super::action::ResourceKey;
use crate::error::{ConnectError, Result};
use crate::template::{Callback, ConfigValue};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

/// Default page size when a manifest entry does not set `perRequest`
pub const DEFAULT_PER_REQUEST: u64 = 50;

/// Default primary key field
pub const DEFAULT_PK: &str = "id";

/// HTTP verb a set of options applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "POST")]
    Post,
    #[serde(rename = "PUT")]
    Put,
    #[serde(rename = "DELETE")]
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
        }
    }

    pub fn method(&self) -> reqwest::Method {
        match self {
            Verb::Get => reqwest::Method::GET,
            Verb::Post => reqwest::Method::POST,
            Verb::Put => reqwest::Method::PUT,
            Verb::Delete => reqwest::Method::DELETE,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Verb::Get)
    }

    /// Headers sent when the manifest does not override them
    fn default_headers(&self) -> BTreeMap<String, ConfigValue> {
        let pairs: &[(&str, &str)] = match self {
            Verb::Get => &[("Accept", "application/json")],
            Verb::Post => &[("Accept", "application/json"), ("Content-Type", "application/json")],
            Verb::Put => &[("Accept", "text/plain"), ("Content-Type", "application/json")],
            Verb::Delete => &[("Accept", "text/plain")],
        };
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), ConfigValue::template(v)))
            .collect()
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a resource gets its root URL and auth headers from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Plain REST endpoint; `root` comes from the manifest
    #[default]
    Rest,
    /// Session-backed endpoint; root URL, tenant and token come from the session
    Tenant,
}

/// Object-valued option (`params`, `headers`)
#[derive(Clone)]
pub enum MapTemplate {
    Values(BTreeMap<String, ConfigValue>),
    Callback(Callback),
}

impl MapTemplate {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&crate::template::TemplateContext<'_>) -> Option<Value> + Send + Sync + 'static,
    {
        MapTemplate::Callback(std::sync::Arc::new(f))
    }

    /// Overlay `other` on top of `self`; keys in `other` win
    fn merged(&self, other: &MapTemplate) -> MapTemplate {
        match (self, other) {
            (MapTemplate::Values(base), MapTemplate::Values(over)) => {
                let mut merged = base.clone();
                merged.extend(over.iter().map(|(k, v)| (k.clone(), v.clone())));
                MapTemplate::Values(merged)
            }
            _ => other.clone(),
        }
    }
}

impl fmt::Debug for MapTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapTemplate::Values(values) => f.debug_map().entries(values.iter()).finish(),
            MapTemplate::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

impl<'de> Deserialize<'de> for MapTemplate {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        BTreeMap::<String, ConfigValue>::deserialize(deserializer).map(MapTemplate::Values)
    }
}

/// Static values merged in when dynamic resolution fails
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StaticFallback {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub params: Option<BTreeMap<String, Value>>,
}

/// Configuration template for one verb (or the defaults shared by all verbs)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsTemplate {
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub path: Option<ConfigValue>,
    #[serde(default)]
    pub params: Option<MapTemplate>,
    #[serde(default)]
    pub headers: Option<MapTemplate>,
    /// Dot path of the record list inside the response envelope
    #[serde(default)]
    pub records: Option<ConfigValue>,
    #[serde(default)]
    pub records_required: Option<ConfigValue>,
    #[serde(default)]
    pub result_offset: Option<ConfigValue>,
    #[serde(default)]
    pub per_request: Option<u64>,
    #[serde(default)]
    pub limit_param: Option<String>,
    #[serde(default)]
    pub offset_param: Option<String>,
    #[serde(default)]
    pub pk: Option<String>,
    #[serde(default)]
    pub client_generate_pk: Option<ConfigValue>,
    #[serde(default)]
    pub static_fallback: Option<StaticFallback>,
    #[serde(default, deserialize_with = "deserialize_permissions")]
    pub permissions_required: Option<Vec<String>>,
}

impl OptionsTemplate {
    /// Overlay `over` on top of `self`. Set fields in `over` win; `params` and
    /// `headers` objects merge key by key.
    pub fn merged(&self, over: &OptionsTemplate) -> OptionsTemplate {
        fn pick<T: Clone>(base: &Option<T>, over: &Option<T>) -> Option<T> {
            over.clone().or_else(|| base.clone())
        }
        fn pick_map(base: &Option<MapTemplate>, over: &Option<MapTemplate>) -> Option<MapTemplate> {
            match (base, over) {
                (Some(b), Some(o)) => Some(b.merged(o)),
                (b, o) => o.clone().or_else(|| b.clone()),
            }
        }

        OptionsTemplate {
            root: pick(&self.root, &over.root),
            path: pick(&self.path, &over.path),
            params: pick_map(&self.params, &over.params),
            headers: pick_map(&self.headers, &over.headers),
            records: pick(&self.records, &over.records),
            records_required: pick(&self.records_required, &over.records_required),
            result_offset: pick(&self.result_offset, &over.result_offset),
            per_request: pick(&self.per_request, &over.per_request),
            limit_param: pick(&self.limit_param, &over.limit_param),
            offset_param: pick(&self.offset_param, &over.offset_param),
            pk: pick(&self.pk, &over.pk),
            client_generate_pk: pick(&self.client_generate_pk, &over.client_generate_pk),
            static_fallback: pick(&self.static_fallback, &over.static_fallback),
            permissions_required: pick(&self.permissions_required, &over.permissions_required),
        }
    }

    /// Built-in defaults every manifest entry is merged over
    fn defaults() -> Self {
        OptionsTemplate {
            per_request: Some(DEFAULT_PER_REQUEST),
            pk: Some(DEFAULT_PK.to_string()),
            client_generate_pk: Some(ConfigValue::from(true)),
            ..Default::default()
        }
    }
}

/// Accepts `"a,b"` or `["a", "b"]`
fn deserialize_permissions<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Perms {
        List(Vec<String>),
        Csv(String),
    }

    Ok(Option::<Perms>::deserialize(deserializer)?.map(|perms| match perms {
        Perms::List(list) => list,
        Perms::Csv(csv) => csv
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
    }))
}

fn default_true() -> bool {
    true
}

/// One resource as written in the manifest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    #[serde(rename = "type", default)]
    pub kind: ResourceKind,
    #[serde(flatten)]
    pub options: OptionsTemplate,
    #[serde(rename = "GET", default)]
    pub get: Option<OptionsTemplate>,
    #[serde(rename = "POST", default)]
    pub post: Option<OptionsTemplate>,
    #[serde(rename = "PUT", default)]
    pub put: Option<OptionsTemplate>,
    #[serde(rename = "DELETE", default)]
    pub delete: Option<OptionsTemplate>,
    #[serde(default)]
    pub accumulate: bool,
    #[serde(default)]
    pub abortable: bool,
    #[serde(default)]
    pub abort_on_unmount: bool,
    /// Read automatically when the caller's props change
    #[serde(default = "default_true")]
    pub fetch: bool,
    /// Treat a missing `records` element as an empty list instead of an error
    #[serde(default)]
    pub allow_undefined_records: bool,
}

/// Immutable definition of one resource instance
#[derive(Debug, Clone)]
pub struct ResourceDef {
    pub name: String,
    pub module: String,
    pub data_key: Option<String>,
    pub kind: ResourceKind,
    /// Defaults merged with the manifest entry
    pub options: OptionsTemplate,
    /// Verb-specific overrides as written in the manifest
    pub verbs: HashMap<Verb, OptionsTemplate>,
    pub accumulate: bool,
    pub abortable: bool,
    pub abort_on_unmount: bool,
    pub fetch: bool,
    pub allow_undefined_records: bool,
}

impl ResourceDef {
    /// Build a definition from a manifest entry
    pub fn from_entry(
        name: &str,
        module: &str,
        data_key: Option<&str>,
        entry: &ManifestEntry,
    ) -> Result<Self> {
        let zero_page = |options: &OptionsTemplate, scope: &str| {
            if options.per_request == Some(0) {
                return Err(ConnectError::InvalidManifest {
                    resource: name.to_string(),
                    reason: format!("{}perRequest must be positive", scope),
                });
            }
            Ok(())
        };
        zero_page(&entry.options, "")?;

        let mut verbs = HashMap::new();
        for (verb, over) in [
            (Verb::Get, &entry.get),
            (Verb::Post, &entry.post),
            (Verb::Put, &entry.put),
            (Verb::Delete, &entry.delete),
        ] {
            if let Some(over) = over {
                zero_page(over, &format!("{} ", verb))?;
                verbs.insert(verb, over.clone());
            }
        }

        Ok(Self {
            name: name.to_string(),
            module: module.to_string(),
            data_key: data_key.map(str::to_string),
            kind: entry.kind,
            options: OptionsTemplate::defaults().merged(&entry.options),
            verbs,
            accumulate: entry.accumulate,
            abortable: entry.abortable,
            abort_on_unmount: entry.abort_on_unmount,
            fetch: entry.fetch,
            allow_undefined_records: entry.allow_undefined_records,
        })
    }

    /// Identity used to address actions at this resource
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.name, &self.module, self.data_key.as_deref())
    }

    /// Options for `verb`: the verb's default headers, then the shared
    /// options, then the manifest's verb-specific overrides
    pub fn verb_template(&self, verb: Verb) -> OptionsTemplate {
        let merged = OptionsTemplate {
            headers: Some(MapTemplate::Values(verb.default_headers())),
            ..Default::default()
        }
        .merged(&self.options);

        match self.verbs.get(&verb) {
            Some(over) => merged.merged(over),
            None => merged,
        }
    }

    /// Primary key field
    pub fn pk(&self) -> &str {
        self.options.pk.as_deref().unwrap_or(DEFAULT_PK)
    }
}

/// A parsed manifest
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    /// Owning module name used in resource identities
    #[serde(default = "default_module")]
    pub module: String,
    #[serde(default)]
    pub resources: BTreeMap<String, ManifestEntry>,
}

fn default_module() -> String {
    "app".to_string()
}

impl Manifest {
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load a manifest file; `.yaml`/`.yml` are parsed as YAML, anything else as JSON
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConnectError::Manifest(format!("{}: {}", path.display(), e)))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    /// Get a resource definition by name
    pub fn resource(&self, name: &str, data_key: Option<&str>) -> Result<ResourceDef> {
        let entry = self
            .resources
            .get(name)
            .ok_or_else(|| ConnectError::UnknownResource(name.to_string()))?;
        ResourceDef::from_entry(name, &self.module, data_key, entry)
    }

    /// Get all resource names
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.keys().map(|s| s.as_str()).collect()
    }
}
