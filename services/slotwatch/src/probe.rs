//! Endpoint discovery
//!
//! The booking site's query interface is undocumented and drifts, so at
//! startup every candidate operation is tried in rank order and classified.
//! Probing stops as soon as enough working operations are found or the
//! overall budget runs out; each attempt is time-boxed on its own.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::ProbeConfig;
use crate::io::{HttpMethod, HttpResponse};
use crate::operation::{CandidateOperation, QueryWindow, Upstream};
use crate::session::SessionContext;

/// How a probed response looked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResponseShape {
    /// JSON data, possibly empty
    StructuredData,
    /// HTML or similar, typically a login redirect
    Markup,
    /// 401/403: the operation exists but wants credentials
    Gated,
    /// Not found, server error, unparseable body, timeout
    Error,
}

impl ResponseShape {
    pub fn access(self) -> Option<Access> {
        match self {
            ResponseShape::StructuredData => Some(Access::Usable),
            ResponseShape::Gated => Some(Access::Gated),
            ResponseShape::Markup | ResponseShape::Error => None,
        }
    }
}

/// Whether a working operation can be used as-is. Usable sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Access {
    Usable,
    Gated,
}

/// A candidate confirmed at probe time, with the method that actually worked
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingOperation {
    pub operation: CandidateOperation,
    pub access: Access,
}

impl WorkingOperation {
    pub fn name(&self) -> &str {
        &self.operation.name
    }
}

/// Outcome of one probe attempt
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub candidate: String,
    pub method: HttpMethod,
    pub status: Option<u16>,
    pub shape: ResponseShape,
    pub working: Option<WorkingOperation>,
    pub error: Option<String>,
}

/// Probe timing and stopping rules
#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub attempt_timeout: Duration,
    pub budget: Duration,
    pub target_working: usize,
}

impl From<&ProbeConfig> for ProbeSettings {
    fn from(config: &ProbeConfig) -> Self {
        Self {
            attempt_timeout: Duration::from_secs(config.attempt_timeout_seconds),
            budget: Duration::from_secs(config.budget_seconds),
            target_working: config.target_working,
        }
    }
}

/// Classify a response from a candidate operation
pub fn classify(response: &HttpResponse) -> ResponseShape {
    if response.is_auth_failure() {
        return ResponseShape::Gated;
    }
    if !response.is_success() {
        return ResponseShape::Error;
    }
    if response.looks_like_markup() {
        return ResponseShape::Markup;
    }
    match serde_json::from_str::<serde_json::Value>(&response.body) {
        Ok(_) => ResponseShape::StructuredData,
        Err(_) => ResponseShape::Error,
    }
}

/// Pick the operation to poll: usable before gated, then lowest rank
pub fn select_primary(working: &[WorkingOperation]) -> Option<&WorkingOperation> {
    working
        .iter()
        .min_by_key(|w| (w.access, w.operation.rank))
}

/// Stateless prober over an upstream
#[derive(Debug, Clone)]
pub struct EndpointProbe {
    upstream: Upstream,
    settings: ProbeSettings,
}

impl EndpointProbe {
    pub fn new(upstream: Upstream, settings: ProbeSettings) -> Self {
        Self { upstream, settings }
    }

    /// Try candidates in rank order and report every attempt made
    pub async fn probe_detailed(
        &self,
        candidates: &[CandidateOperation],
        window: &QueryWindow,
        session: &SessionContext,
    ) -> Vec<ProbeResult> {
        let mut ordered: Vec<&CandidateOperation> = candidates.iter().collect();
        ordered.sort_by_key(|c| c.rank);

        let deadline = Instant::now() + self.settings.budget;
        let mut results = Vec::new();
        let mut working = 0;

        for candidate in ordered {
            if working >= self.settings.target_working {
                tracing::debug!(
                    "Found {} working operations, skipping remaining candidates",
                    working
                );
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    "Probe budget of {:?} exhausted after {} attempts",
                    self.settings.budget,
                    results.len()
                );
                break;
            }

            let timeout = self.settings.attempt_timeout.min(deadline - now);
            let result = self.attempt(candidate, window, session, timeout).await;
            tracing::debug!(
                "Probe {} {} -> {:?} (status {:?})",
                result.method,
                candidate.path,
                result.shape,
                result.status
            );
            if result.working.is_some() {
                working += 1;
            }
            results.push(result);
        }

        results
    }

    /// Working operations in probe order; fails if there are none
    pub async fn probe(
        &self,
        candidates: &[CandidateOperation],
        window: &QueryWindow,
        session: &SessionContext,
    ) -> crate::Result<Vec<WorkingOperation>> {
        let results = self.probe_detailed(candidates, window, session).await;
        let attempted = results.len();
        let working: Vec<WorkingOperation> =
            results.into_iter().filter_map(|r| r.working).collect();

        if working.is_empty() {
            return Err(crate::SlotwatchError::NoWorkingOperations { attempted });
        }
        tracing::info!(
            "Probe found {} working operation(s): {}",
            working.len(),
            working
                .iter()
                .map(|w| format!("{} ({:?})", w.name(), w.access))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(working)
    }

    async fn attempt(
        &self,
        candidate: &CandidateOperation,
        window: &QueryWindow,
        session: &SessionContext,
        timeout: Duration,
    ) -> ProbeResult {
        let bounded = tokio::time::timeout(
            timeout,
            self.call_with_fallback(candidate, window, session, timeout),
        )
        .await;

        let (method, response) = match bounded {
            Ok((method, Ok(response))) => (method, response),
            Ok((method, Err(e))) => return failed(candidate, method, e.to_string()),
            Err(_) => {
                return failed(
                    candidate,
                    candidate.method,
                    format!("attempt exceeded {:?}", timeout),
                )
            }
        };

        let shape = classify(&response);
        let working = shape.access().map(|access| WorkingOperation {
            operation: CandidateOperation {
                method,
                ..candidate.clone()
            },
            access,
        });
        ProbeResult {
            candidate: candidate.name.clone(),
            method,
            status: Some(response.status),
            shape,
            working,
            error: None,
        }
    }

    /// A GET answered with 405 is retried once as a POST
    async fn call_with_fallback(
        &self,
        candidate: &CandidateOperation,
        window: &QueryWindow,
        session: &SessionContext,
        timeout: Duration,
    ) -> (HttpMethod, crate::Result<HttpResponse>) {
        let first = self
            .upstream
            .call(candidate, candidate.method, window, session, timeout)
            .await;

        match &first {
            Ok(response) if response.status == 405 && candidate.method == HttpMethod::Get => {
                tracing::debug!("{} rejected GET, retrying as POST", candidate.path);
                let second = self
                    .upstream
                    .call(candidate, HttpMethod::Post, window, session, timeout)
                    .await;
                (HttpMethod::Post, second)
            }
            _ => (candidate.method, first),
        }
    }
}

fn failed(candidate: &CandidateOperation, method: HttpMethod, error: String) -> ProbeResult {
    ProbeResult {
        candidate: candidate.name.clone(),
        method,
        status: None,
        shape: ResponseShape::Error,
        working: None,
        error: Some(error),
    }
}
