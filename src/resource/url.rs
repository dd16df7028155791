//! URL Composer

use super::options::OptionSet;
use serde_json::Value;
use std::collections::BTreeMap;

/// Encode params as a query string. Arrays repeat the key; nulls are skipped.
pub fn encode_query(params: &BTreeMap<String, Value>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        match value {
            Value::Null => {}
            Value::String(s) => {
                serializer.append_pair(key, s);
            }
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::String(s) => serializer.append_pair(key, s),
                        other => serializer.append_pair(key, &other.to_string()),
                    };
                }
            }
            other => {
                serializer.append_pair(key, &other.to_string());
            }
        }
    }
    serializer.finish()
}

/// Compose the request URL for a set of options.
///
/// Returns `None` while the options are incomplete: no path, unsatisfied
/// params, or a `null` param that no static fallback fills in.
pub fn url_from_options(options: &OptionSet, pk: Option<&str>) -> Option<String> {
    options.path.as_ref()?;
    let params = options.params.as_ref()?;

    let fallback_applied;
    let options = if params.values().any(Value::is_null) {
        let fallback = options.static_fallback.as_ref()?;
        let mut with_fallback = options.clone();
        with_fallback.apply_static_fallback(fallback);
        fallback_applied = with_fallback;
        &fallback_applied
    } else {
        options
    };

    let params = options.params.as_ref()?;
    if params.values().any(Value::is_null) {
        return None;
    }

    let mut path = options.path.as_deref()?.trim_start_matches('/').to_string();
    if let Some(pk) = pk.filter(|pk| !pk.is_empty()) {
        let segment = urlencoding::encode(pk);
        let already_there = path == segment || path.ends_with(&format!("/{}", segment));
        if !already_there {
            if path.is_empty() {
                path = segment.into_owned();
            } else {
                path = format!("{}/{}", path.trim_end_matches('/'), segment);
            }
        }
    }

    let root = options.root.as_deref().unwrap_or("").trim_end_matches('/');
    let mut url = format!("{}/{}", root, path);

    if !params.is_empty() {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&encode_query(params));
    }

    Some(url)
}
