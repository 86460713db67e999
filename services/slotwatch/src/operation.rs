//! Upstream operations: candidate calls, payload templates and request building

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::io::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use crate::session::SessionContext;

/// One externally reachable query the probe may attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateOperation {
    pub name: String,
    #[serde(default = "default_method")]
    pub method: HttpMethod,
    pub path: String,
    /// JSON template; string leaves may be placeholders such as `{from_date}`
    #[serde(default)]
    pub payload: Option<Value>,
    /// Lower ranks are probed first
    #[serde(default)]
    pub rank: u32,
}

fn default_method() -> HttpMethod {
    HttpMethod::Get
}

impl CandidateOperation {
    pub fn new(name: &str, method: HttpMethod, path: &str, rank: u32) -> Self {
        Self {
            name: name.to_string(),
            method,
            path: path.to_string(),
            payload: None,
            rank,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Values substituted into payload templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryWindow {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub category: String,
}

/// Substitute placeholders in a payload template.
///
/// `{locations}` always renders as an empty list: the upstream is asked for
/// every location and results are filtered locally.
pub fn render_payload(template: &Value, window: &QueryWindow) -> Value {
    match template {
        Value::String(s) => match s.as_str() {
            "{locations}" => Value::Array(Vec::new()),
            _ => Value::String(
                s.replace("{from_date}", &window.from_date.to_string())
                    .replace("{to_date}", &window.to_date.to_string())
                    .replace("{category}", &window.category),
            ),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_payload(item, window))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_payload(v, window)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Flatten a rendered payload object into query parameters
pub fn query_pairs(rendered: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = rendered else {
        return Vec::new();
    };

    map.iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                Value::Array(items) if items.is_empty() => return None,
                Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(","),
                other => other.to_string(),
            };
            Some((key.clone(), text))
        })
        .collect()
}

/// Join a base URL and an operation path
pub fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// The monitored service: HTTP client, base URL and the headers sent on every call
#[derive(Clone)]
pub struct Upstream {
    http: Arc<dyn HttpClient>,
    base_url: String,
    headers: Vec<(String, String)>,
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Upstream {
    pub fn new(http: Arc<dyn HttpClient>, base_url: &str, headers: Vec<(String, String)>) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
            headers,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the request for an operation, issued with `method`
    pub fn request(
        &self,
        operation: &CandidateOperation,
        method: HttpMethod,
        window: &QueryWindow,
        session: &SessionContext,
        timeout: Duration,
    ) -> HttpRequest {
        let mut request = HttpRequest::new(method, join_url(&self.base_url, &operation.path))
            .with_timeout(timeout);
        for (name, value) in &self.headers {
            request = request.with_header(name.clone(), value.clone());
        }

        let rendered = operation
            .payload
            .as_ref()
            .map(|template| render_payload(template, window));
        request = match (method, rendered) {
            (HttpMethod::Get, Some(rendered)) => request.with_query(query_pairs(&rendered)),
            (HttpMethod::Post, Some(rendered)) => request.with_json(rendered),
            (HttpMethod::Post, None) => request.with_json(Value::Object(Default::default())),
            (HttpMethod::Get, None) => request,
        };

        session.apply(request)
    }

    /// Issue an operation, bounded by `timeout` even if the client ignores it
    pub async fn call(
        &self,
        operation: &CandidateOperation,
        method: HttpMethod,
        window: &QueryWindow,
        session: &SessionContext,
        timeout: Duration,
    ) -> crate::Result<HttpResponse> {
        let request = self.request(operation, method, window, session, timeout);
        self.send(&request, timeout).await
    }

    /// Send a prepared request with the same hard time bound
    pub async fn send(&self, request: &HttpRequest, timeout: Duration) -> crate::Result<HttpResponse> {
        match tokio::time::timeout(timeout, self.http.execute(request)).await {
            Ok(result) => result,
            Err(_) => Err(crate::SlotwatchError::Timeout(format!(
                "{} {} exceeded {:?}",
                request.method, request.url, timeout
            ))),
        }
    }

    /// A bare GET to `path` carrying the standard headers
    pub fn get(&self, path: &str, timeout: Duration) -> HttpRequest {
        let mut request = HttpRequest::get(join_url(&self.base_url, path)).with_timeout(timeout);
        for (name, value) in &self.headers {
            request = request.with_header(name.clone(), value.clone());
        }
        request
    }
}
