//! Slotwatch - availability slot monitoring and notification service
//!
//! Discovers which query endpoints of the booking site currently work, polls
//! them on an interval, and sends one notification per tick for slots that
//! were not on offer before.

pub mod config;
pub mod dashboard;
pub mod engine;
pub mod error;
pub mod io;
pub mod monitor;
pub mod notifier;
pub mod operation;
pub mod probe;
pub mod pushover;
pub mod record;
pub mod seen;
pub mod session;
pub mod state;
pub mod webhook;

pub use config::{load_config, Config, MonitoringConfig};
pub use error::{Result, SlotwatchError};
pub use monitor::{MonitorHandle, SlotMonitor, TickOutcome};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::engine::{monitors_from_config, Engine};
use crate::io::{HttpClient, ReqwestHttpClient};
use crate::notifier::{dispatcher_from_config, NotificationDispatcher};
use crate::operation::Upstream;
use crate::session::SessionRefresher;
use crate::state::StateHandle;

/// Assembles the service from configuration, with optional injected parts
pub struct SlotwatchBuilder {
    config: Config,
    http: Option<Arc<dyn HttpClient>>,
    dispatcher: Option<Arc<dyn NotificationDispatcher>>,
    refresher: Option<Arc<dyn SessionRefresher>>,
    cancel: Option<CancellationToken>,
}

impl SlotwatchBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            http: None,
            dispatcher: None,
            refresher: None,
            cancel: None,
        }
    }

    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn SessionRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub async fn build(self) -> Result<Slotwatch> {
        self.config.validate()?;

        let http = self
            .http
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));
        let upstream = Upstream::new(
            Arc::clone(&http),
            &self.config.upstream.base_url,
            self.config.upstream.header_pairs(),
        );
        let dispatcher = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => dispatcher_from_config(&self.config.notifiers, Arc::clone(&http))?,
        };
        let state = state::new_state_handle(self.config.dashboard.history_size);
        let cancel = self.cancel.unwrap_or_default();

        tracing::debug!(
            "Building slotwatch: {} session(s), dispatcher '{}', upstream {}",
            self.config.monitors.len(),
            dispatcher.type_name(),
            upstream.base_url()
        );

        let monitors = monitors_from_config(
            &self.config,
            &upstream,
            dispatcher,
            self.refresher,
            &state,
        );

        Ok(Slotwatch {
            engine: Engine::new(Arc::clone(&state), cancel.clone()),
            config: self.config,
            monitors,
            state,
            cancel,
        })
    }
}

/// A built service, ready to start
pub struct Slotwatch {
    config: Config,
    monitors: Vec<(String, Result<SlotMonitor>)>,
    engine: Engine,
    state: StateHandle,
    cancel: CancellationToken,
}

impl Slotwatch {
    pub fn state(&self) -> StateHandle {
        Arc::clone(&self.state)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start every session and serve until cancelled.
    ///
    /// Fails if sessions are configured but none of them could start.
    pub async fn start(mut self) -> Result<()> {
        let cancel_for_signal = self.cancel.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to listen for ctrl-c");
            tracing::info!("Shutdown signal received");
            cancel_for_signal.cancel();
        });

        if self.config.dashboard.enabled {
            spawn_dashboard(
                self.config.dashboard.port,
                Arc::clone(&self.state),
                self.cancel.clone(),
            );
        }

        let configured = self.monitors.len();
        let monitors = std::mem::take(&mut self.monitors);
        let failures = self.engine.start_all(monitors).await;

        if configured == 0 {
            tracing::warn!("No monitoring sessions configured");
        } else if self.engine.handles().is_empty() {
            self.cancel.cancel();
            tracing::error!("No monitoring session started");
            return Err(failures
                .into_iter()
                .next()
                .map(|(_, error)| error)
                .unwrap_or_else(|| {
                    SlotwatchError::Config("no monitoring session started".to_string())
                }));
        }

        tracing::info!(
            "Slotwatch started: {} of {} session(s) active",
            self.engine.handles().len(),
            configured
        );

        self.engine.run().await;
        tracing::info!("Slotwatch stopped");
        Ok(())
    }
}

fn spawn_dashboard(port: u16, state: StateHandle, cancel: CancellationToken) {
    tokio::spawn(async move {
        let router = dashboard::build_router(state);
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        tracing::info!("Dashboard listening on http://{}", addr);

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(
                    "Failed to bind dashboard to port {}: {}. Continuing without dashboard.",
                    port,
                    e
                );
                return;
            }
        };

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await
            .ok();

        tracing::debug!("Dashboard stopped");
    });
}
