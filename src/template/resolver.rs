//! Placeholder substitution

use super::{type_name, ConfigValue, Resolution, TemplateContext};
use crate::error::{ConnectError, Result};
use serde_json::Value;

const SIGILS: &[char] = &['?', ':', '%', '$', '!'];

/// Fallback operator attached to a placeholder name
#[derive(Debug, Clone, Copy, PartialEq)]
enum Fallback<'a> {
    None,
    /// `name:+value`
    Alternate(&'a str),
    /// `name:-value`
    Default(&'a str),
}

/// Split `name:+value` / `name:-value` into the name and its fallback
fn parse_fallback(raw: &str) -> (&str, Fallback<'_>) {
    let bytes = raw.as_bytes();
    for i in 0..bytes.len().saturating_sub(1) {
        if bytes[i] == b':' {
            match bytes[i + 1] {
                b'+' => return (&raw[..i], Fallback::Alternate(&raw[i + 2..])),
                b'-' => return (&raw[..i], Fallback::Default(&raw[i + 2..])),
                _ => {}
            }
        }
    }
    (raw, Fallback::None)
}

/// Render a resolved value as template text. Absent, null and empty values
/// count as unresolved.
fn render(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| render(Some(v)))
            .collect::<Vec<_>>()
            .join(","),
        other @ Value::Object(_) => other.to_string(),
    };

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Substitute every placeholder in `template`.
///
/// All placeholders are substituted even when one is unresolved; the result is
/// then [`Resolution::Unsatisfied`] and must not be used.
pub fn resolve_template(template: &str, ctx: &TemplateContext<'_>) -> Resolution {
    let mut out = String::with_capacity(template.len());
    let mut satisfied = true;
    let mut rest = template;

    while let Some(pos) = rest.find(|c: char| SIGILS.contains(&c)) {
        let sigil = rest[pos..].chars().next().unwrap_or_default();
        let after = &rest[pos + 1..];

        let Some(body) = after.strip_prefix('{') else {
            out.push_str(&rest[..=pos]);
            rest = after;
            continue;
        };
        let Some(close) = body.find('}') else {
            out.push_str(&rest[..=pos]);
            rest = after;
            continue;
        };

        out.push_str(&rest[..pos]);
        let (name, fallback) = parse_fallback(&body[..close]);
        let value = render(ctx.lookup(sigil, name));

        match (value, fallback) {
            (Some(_), Fallback::Alternate(alt)) => out.push_str(alt),
            (None, Fallback::Alternate(_)) => {}
            (Some(v), _) => out.push_str(&v),
            (None, Fallback::Default(default)) => out.push_str(default),
            (None, Fallback::None) => {
                tracing::trace!("placeholder {}{{{}}} unresolved", sigil, name);
                satisfied = false;
            }
        }

        rest = &body[close + 1..];
    }
    out.push_str(rest);

    if satisfied {
        Resolution::Satisfied(Value::String(out))
    } else {
        Resolution::Unsatisfied { partial: out }
    }
}

/// Resolve one configuration value.
///
/// `field` only names the value in errors and logs.
pub fn resolve(field: &str, value: &ConfigValue, ctx: &TemplateContext<'_>) -> Result<Resolution> {
    let resolution = match value {
        ConfigValue::Template(template) => resolve_template(template, ctx),
        ConfigValue::Callback(callback) => match callback(ctx) {
            Some(v) => Resolution::Satisfied(v),
            None => Resolution::Undefined,
        },
        ConfigValue::Literal(v @ Value::Bool(_)) => Resolution::Satisfied(v.clone()),
        ConfigValue::Literal(other) => {
            return Err(ConnectError::InvalidTemplateType {
                field: field.to_string(),
                found: type_name(other).to_string(),
            })
        }
    };

    tracing::debug!("resolve {}: {:?} -> {:?}", field, value, resolution);
    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Props;
    use serde_json::{json, Map};

    fn context_props() -> Props {
        Props::new()
            .with_query("?query=smith&sort=name")
            .with_route_param("id", "42")
            .with_prop("user", json!({"profile": {"id": "u-1"}}))
    }

    fn resources() -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("searchState".to_string(), json!({"term": "ada", "limit": 30}));
        map
    }

    fn satisfied(s: &str) -> Resolution {
        Resolution::Satisfied(Value::String(s.to_string()))
    }

    #[test]
    fn test_every_namespace() {
        let props = context_props();
        let ctx = TemplateContext::from_parts(&props, resources());

        assert_eq!(resolve_template("users/:{id}", &ctx), satisfied("users/42"));
        assert_eq!(resolve_template("q=?{query}", &ctx), satisfied("q=smith"));
        assert_eq!(resolve_template("%{searchState.term}", &ctx), satisfied("ada"));
        assert_eq!(resolve_template("${searchState.limit}", &ctx), satisfied("30"));
        assert_eq!(resolve_template("!{user.profile.id}", &ctx), satisfied("u-1"));
    }

    #[test]
    fn test_no_placeholders_is_satisfied() {
        let props = Props::new();
        let ctx = TemplateContext::from_parts(&props, Map::new());
        assert_eq!(resolve_template("users", &ctx), satisfied("users"));
        assert_eq!(resolve_template("http://host:9130/a", &ctx), satisfied("http://host:9130/a"));
    }

    #[test]
    fn test_unresolved_placeholder_is_unsatisfied() {
        let props = context_props();
        let ctx = TemplateContext::from_parts(&props, Map::new());

        let resolution = resolve_template("users/:{id}/notes/:{noteId}", &ctx);
        assert_eq!(
            resolution,
            Resolution::Unsatisfied {
                partial: "users/42/notes/".to_string()
            }
        );
        assert!(!resolution.is_satisfied());
    }

    #[test]
    fn test_default_fallback() {
        let props = context_props();
        let ctx = TemplateContext::from_parts(&props, Map::new());

        assert_eq!(resolve_template("?{missing:-all}", &ctx), satisfied("all"));
        assert_eq!(resolve_template("?{query:-all}", &ctx), satisfied("smith"));
        assert_eq!(resolve_template("?{missing:-}", &ctx), satisfied(""));
    }

    #[test]
    fn test_alternate_fallback() {
        let props = context_props();
        let ctx = TemplateContext::from_parts(&props, Map::new());

        assert_eq!(resolve_template("?{sort:+sortby name}", &ctx), satisfied("sortby name"));
        assert_eq!(resolve_template("x?{missing:+sortby}", &ctx), satisfied("x"));
    }

    #[test]
    fn test_empty_string_counts_as_unresolved() {
        let props = Props::new().with_query("query=");
        let ctx = TemplateContext::from_parts(&props, Map::new());

        assert!(!resolve_template("?{query}", &ctx).is_satisfied());
        assert_eq!(resolve_template("?{query:-x}", &ctx), satisfied("x"));
    }

    #[test]
    fn test_unterminated_placeholder_is_literal() {
        let props = Props::new();
        let ctx = TemplateContext::from_parts(&props, Map::new());
        assert_eq!(resolve_template("a?{b", &ctx), satisfied("a?{b"));
        assert_eq!(resolve_template("50%", &ctx), satisfied("50%"));
    }

    #[test]
    fn test_resolve_literal_and_callback() {
        let props = context_props();
        let ctx = TemplateContext::from_parts(&props, Map::new());

        let literal = ConfigValue::from(true);
        assert_eq!(resolve("flag", &literal, &ctx).unwrap(), Resolution::Satisfied(json!(true)));

        let callback = ConfigValue::callback(|ctx| ctx.route_params().get("id").cloned());
        assert_eq!(resolve("path", &callback, &ctx).unwrap(), Resolution::Satisfied(json!("42")));

        let undefined = ConfigValue::callback(|_| None);
        assert_eq!(resolve("path", &undefined, &ctx).unwrap(), Resolution::Undefined);

        let null = ConfigValue::callback(|_| Some(Value::Null));
        assert_eq!(resolve("path", &null, &ctx).unwrap(), Resolution::Satisfied(Value::Null));
    }

    #[test]
    fn test_numeric_literal_is_invalid() {
        let props = Props::new();
        let ctx = TemplateContext::from_parts(&props, Map::new());
        let err = resolve("path", &ConfigValue::Literal(json!(3)), &ctx).unwrap_err();
        assert!(matches!(
            err,
            ConnectError::InvalidTemplateType { ref found, .. } if found == "number"
        ));
    }

    #[test]
    fn test_parse_fallback() {
        assert_eq!(parse_fallback("name:-x"), ("name", Fallback::Default("x")));
        assert_eq!(parse_fallback("name:+y:z"), ("name", Fallback::Alternate("y:z")));
        assert_eq!(parse_fallback("name"), ("name", Fallback::None));
    }
}
