//! HTTP client for resource requests

use crate::resource::Verb;
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
pub fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| c.is_control(), "")
}

/// A response with its body already read
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    /// Whether the server declared a JSON body
    pub fn is_json(&self) -> bool {
        self.headers
            .get("content-type")
            .map(|ct| ct.contains("json"))
            .unwrap_or(false)
    }

    pub fn json(&self) -> Result<Value> {
        if self.body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body).context("Failed to parse response JSON")
    }
}

/// HTTP client wrapper shared by all resources
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("resource-connect/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Send a request and read the whole response.
    ///
    /// HTTP error statuses are returned as responses; only transport failures
    /// are errors.
    pub async fn send(
        &self,
        verb: Verb,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Option<&Value>,
    ) -> Result<HttpResponse> {
        tracing::debug!("{} {}", verb, url);

        let mut request = self.client.request(verb.method(), url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.context("Failed to send request")?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let response_headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if status >= 400 {
            tracing::error!("{} {} failed: {} - {}", verb, url, status, sanitize_for_log(&body));
        }

        Ok(HttpResponse {
            url: final_url,
            status,
            headers: response_headers,
            body,
        })
    }
}
