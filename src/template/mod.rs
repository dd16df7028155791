//! Configuration templates
//!
//! Every dynamic manifest field is a [`ConfigValue`]: a literal, a string
//! template with placeholders, or a callback. [`resolve`] turns one into a
//! [`Resolution`] against a [`TemplateContext`].
//!
//! # Placeholders
//!
//! | Sigil | Namespace |
//! |-------|-----------|
//! | `?{name}` | query string of the current location |
//! | `:{name}` | route parameter |
//! | `%{name}` / `${name}` | sibling resource state, dot-path addressable |
//! | `!{name}` | caller property, dot-path addressable |
//!
//! A name may carry a fallback: `name:+value` substitutes `value` when `name`
//! resolves (else the empty string), `name:-value` substitutes the resolved
//! value or `value`.

mod resolver;

pub use resolver::{resolve, resolve_template};

use crate::session::{Props, StateAccess};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Callback signature for programmatic configuration values.
///
/// Returning `None` means "undefined", which is distinct from `Some(Value::Null)`.
pub type Callback = Arc<dyn Fn(&TemplateContext<'_>) -> Option<Value> + Send + Sync>;

/// A configuration value as written in the manifest
#[derive(Clone)]
pub enum ConfigValue {
    Literal(Value),
    Template(String),
    Callback(Callback),
}

impl ConfigValue {
    pub fn template(s: &str) -> Self {
        ConfigValue::Template(s.to_string())
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&TemplateContext<'_>) -> Option<Value> + Send + Sync + 'static,
    {
        ConfigValue::Callback(Arc::new(f))
    }
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            ConfigValue::Template(s) => f.debug_tuple("Template").field(s).finish(),
            ConfigValue::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

impl<'de> Deserialize<'de> for ConfigValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => ConfigValue::Template(s),
            other => ConfigValue::Literal(other),
        })
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::Template(s.to_string())
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Literal(Value::Bool(b))
    }
}

/// Outcome of resolving a single configuration value
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Fully resolved
    Satisfied(Value),
    /// A callback returned nothing
    Undefined,
    /// At least one placeholder had no value and no fallback.
    /// `partial` is the best-effort substitution, useful only for logging.
    Unsatisfied { partial: String },
}

impl Resolution {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Resolution::Satisfied(_))
    }
}

/// Values a template or callback can draw from
pub struct TemplateContext<'a> {
    query: Value,
    resources: Value,
    props: &'a Props,
}

impl<'a> TemplateContext<'a> {
    pub fn new(props: &'a Props, state: &dyn StateAccess) -> Self {
        Self {
            query: Value::Object(props.parsed_query()),
            resources: Value::Object(state.resources(props.data_key.as_deref())),
            props,
        }
    }

    /// Build a context from explicit parts
    pub fn from_parts(props: &'a Props, resources: Map<String, Value>) -> Self {
        Self {
            query: Value::Object(props.parsed_query()),
            resources: Value::Object(resources),
            props,
        }
    }

    /// Parsed query string
    pub fn query(&self) -> &Value {
        &self.query
    }

    pub fn route_params(&self) -> &Map<String, Value> {
        &self.props.route_params
    }

    /// Sibling resources keyed by name
    pub fn resources(&self) -> &Value {
        &self.resources
    }

    /// The caller's original props
    pub fn props(&self) -> &Props {
        self.props
    }

    /// Look up a placeholder name in the namespace selected by `sigil`
    pub(crate) fn lookup(&self, sigil: char, name: &str) -> Option<&Value> {
        match sigil {
            '?' => lookup(&self.query, name),
            ':' => self.props.route_params.get(name),
            '%' | '$' => lookup(&self.resources, name),
            '!' => {
                let (head, rest) = match name.split_once('.') {
                    Some((head, rest)) => (head, Some(rest)),
                    None => (name, None),
                };
                let value = self.props.extra.get(head)?;
                match rest {
                    Some(rest) => lookup(value, rest),
                    None => Some(value),
                }
            }
            _ => None,
        }
    }
}

/// Follow a dot-separated path into a JSON value. Numeric segments index arrays.
pub fn lookup<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(value);
    }

    let mut current = value;
    for part in path.split('.') {
        current = match current {
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            Value::Object(map) => map.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Short type name used in configuration errors
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_nested_and_indexed() {
        let value = json!({"a": {"b": [{"c": 1}, {"c": 2}]}});
        assert_eq!(lookup(&value, "a.b.1.c"), Some(&json!(2)));
        assert_eq!(lookup(&value, "a.x"), None);
        assert_eq!(lookup(&value, ""), Some(&value));
    }

    #[test]
    fn test_deserialize_config_value() {
        let value: ConfigValue = serde_json::from_value(json!("users/:{id}")).unwrap();
        assert!(matches!(value, ConfigValue::Template(ref s) if s == "users/:{id}"));

        let value: ConfigValue = serde_json::from_value(json!(true)).unwrap();
        assert!(matches!(value, ConfigValue::Literal(Value::Bool(true))));

        let value: ConfigValue = serde_json::from_value(json!(10)).unwrap();
        assert!(matches!(value, ConfigValue::Literal(Value::Number(_))));
    }

    #[test]
    fn test_prop_lookup_uses_dot_path() {
        let props = Props::new().with_prop("user", json!({"name": {"first": "Ada"}}));
        let ctx = TemplateContext::from_parts(&props, Map::new());
        assert_eq!(ctx.lookup('!', "user.name.first"), Some(&json!("Ada")));
        assert_eq!(ctx.lookup('!', "user.age"), None);
    }
}
