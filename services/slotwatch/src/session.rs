//! Session context: credential material, its validity window, and refresh
//!
//! The credentials themselves are supplied from outside (config or an external
//! caller). The monitor only tries to keep the validity window moving forward,
//! and every extension goes through [`SessionHandle::extend_to`], which never
//! lets an older window overwrite a newer one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::config::RefreshConfig;
use crate::io::HttpRequest;
use crate::operation::Upstream;

/// Credential/cookie material and its declared validity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionContext {
    pub cookie: Option<String>,
    pub headers: Vec<(String, String)>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl SessionContext {
    pub fn new(cookie: Option<String>) -> Self {
        Self {
            cookie,
            ..Self::default()
        }
    }

    pub fn with_valid_until(mut self, valid_until: DateTime<Utc>) -> Self {
        self.valid_until = Some(valid_until);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// A context without a declared window never expires on its own
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.is_some_and(|until| now >= until)
    }

    /// Attach credentials to an outgoing request
    pub fn apply(&self, mut request: HttpRequest) -> HttpRequest {
        if let Some(cookie) = &self.cookie {
            request = request.with_header("Cookie", cookie.clone());
        }
        for (name, value) in &self.headers {
            request = request.with_header(name.clone(), value.clone());
        }
        request
    }
}

/// Shared, cloneable handle to one monitoring session's context
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<SessionContext>>,
}

impl SessionHandle {
    pub fn new(context: SessionContext) -> Self {
        Self {
            inner: Arc::new(RwLock::new(context)),
        }
    }

    pub async fn snapshot(&self) -> SessionContext {
        self.inner.read().await.clone()
    }

    pub async fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.inner.read().await.valid_until
    }

    /// Advance the validity window.
    ///
    /// Accepted only if `until` is strictly later than the current window
    /// (or no window is set). Returns whether the write happened.
    pub async fn extend_to(&self, until: DateTime<Utc>) -> bool {
        let mut context = self.inner.write().await;
        match context.valid_until {
            Some(current) if until <= current => {
                tracing::debug!(
                    "Ignoring session extension to {} (current window ends {})",
                    until,
                    current
                );
                false
            }
            _ => {
                context.valid_until = Some(until);
                true
            }
        }
    }

    /// Swap in externally refreshed credentials.
    ///
    /// Cookie and headers are taken from `context`; the validity window keeps
    /// whichever of the two ends later, so a stale writer cannot shorten it.
    pub async fn replace(&self, mut context: SessionContext) {
        let mut inner = self.inner.write().await;
        if let (Some(current), Some(incoming)) = (inner.valid_until, context.valid_until) {
            if current > incoming {
                tracing::debug!(
                    "Keeping session window {} over older replacement {}",
                    current,
                    incoming
                );
                context.valid_until = Some(current);
            }
        }
        *inner = context;
    }
}

/// Best-effort mechanism for keeping a session alive between polls
#[async_trait]
pub trait SessionRefresher: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    async fn refresh(&self, session: &SessionHandle) -> crate::Result<()>;
}

/// Used when no refresh mechanism is configured
#[derive(Debug, Default)]
pub struct NoopRefresher;

#[async_trait]
impl SessionRefresher for NoopRefresher {
    fn name(&self) -> &str {
        "none"
    }

    async fn refresh(&self, _session: &SessionHandle) -> crate::Result<()> {
        Ok(())
    }
}

/// Touches a keep-alive path and, if the upstream accepts the session,
/// pushes the validity window forward by a fixed lease
#[derive(Debug)]
pub struct KeepAliveRefresher {
    upstream: Upstream,
    path: String,
    lease: chrono::Duration,
    timeout: Duration,
}

impl KeepAliveRefresher {
    pub fn new(upstream: Upstream, path: &str, lease: Duration, timeout: Duration) -> Self {
        Self {
            upstream,
            path: path.to_string(),
            lease: chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::zero()),
            timeout,
        }
    }
}

#[async_trait]
impl SessionRefresher for KeepAliveRefresher {
    fn name(&self) -> &str {
        "keep_alive"
    }

    async fn refresh(&self, session: &SessionHandle) -> crate::Result<()> {
        let context = session.snapshot().await;
        let request = context.apply(self.upstream.get(&self.path, self.timeout));
        let response = self.upstream.send(&request, self.timeout).await?;

        if response.is_auth_failure() {
            return Err(crate::SlotwatchError::Unauthorized {
                status: response.status,
            });
        }
        if !response.is_success() {
            return Err(crate::SlotwatchError::Session(format!(
                "keep-alive {} returned status {}",
                self.path, response.status
            )));
        }

        let until = Utc::now() + self.lease;
        if session.extend_to(until).await {
            tracing::debug!("Session extended until {}", until);
        }
        Ok(())
    }
}

/// Build the configured refresher
pub fn refresher_from_config(
    config: &RefreshConfig,
    upstream: Upstream,
    timeout: Duration,
) -> Arc<dyn SessionRefresher> {
    match config {
        RefreshConfig::None => Arc::new(NoopRefresher),
        RefreshConfig::KeepAlive {
            path,
            extend_by_seconds,
        } => Arc::new(KeepAliveRefresher::new(
            upstream,
            path,
            Duration::from_secs(*extend_by_seconds),
            timeout,
        )),
    }
}
