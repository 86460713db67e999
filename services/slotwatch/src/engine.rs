//! Engine: builds, starts and stops the configured monitoring sessions

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::monitor::{MonitorDeps, MonitorHandle, SlotMonitor};
use crate::notifier::NotificationDispatcher;
use crate::operation::Upstream;
use crate::probe::ProbeSettings;
use crate::session::{refresher_from_config, SessionHandle, SessionRefresher};
use crate::state::{MonitorStatus, StateHandle};

/// Build one `SlotMonitor` per configured session.
///
/// Sessions share nothing but the upstream client and the dispatcher; each
/// gets its own session context and seen set.
pub fn monitors_from_config(
    config: &Config,
    upstream: &Upstream,
    dispatcher: Arc<dyn NotificationDispatcher>,
    refresher: Option<Arc<dyn SessionRefresher>>,
    state: &StateHandle,
) -> Vec<(String, crate::Result<SlotMonitor>)> {
    config
        .monitors
        .iter()
        .map(|monitor_config| {
            let refresher = refresher.clone().unwrap_or_else(|| {
                refresher_from_config(
                    &config.session.refresh,
                    upstream.clone(),
                    monitor_config.query_timeout(),
                )
            });
            let deps = MonitorDeps {
                upstream: upstream.clone(),
                probe: ProbeSettings::from(&config.probe),
                candidates: config.probe.candidates.clone(),
                session: SessionHandle::new(config.session.to_context()),
                refresher,
                dispatcher: Arc::clone(&dispatcher),
                state: Arc::clone(state),
            };
            (
                monitor_config.name.clone(),
                SlotMonitor::new(monitor_config.clone(), deps),
            )
        })
        .collect()
}

/// The running sessions
pub struct Engine {
    handles: Vec<MonitorHandle>,
    state: StateHandle,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(state: StateHandle, cancel: CancellationToken) -> Self {
        Self {
            handles: Vec::new(),
            state,
            cancel,
        }
    }

    /// Start one session. Probe failure is returned, not retried.
    pub async fn start(&mut self, monitor: SlotMonitor) -> crate::Result<()> {
        let monitor = monitor.with_cancellation_token(self.cancel.child_token());
        let handle = monitor.start().await?;
        self.handles.push(handle);
        Ok(())
    }

    /// Start every session independently, returning the ones that failed
    pub async fn start_all(
        &mut self,
        monitors: Vec<(String, crate::Result<SlotMonitor>)>,
    ) -> Vec<(String, crate::SlotwatchError)> {
        let mut failures = Vec::new();
        for (name, monitor) in monitors {
            let result = match monitor {
                Ok(monitor) => self.start(monitor).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::warn!("Monitoring session '{}' did not start: {}", name, e);
                failures.push((name, e));
            }
        }
        failures
    }

    pub fn handles(&self) -> &[MonitorHandle] {
        &self.handles
    }

    pub fn handle(&self, name: &str) -> Option<&MonitorHandle> {
        self.handles.iter().find(|h| h.name() == name)
    }

    pub async fn statuses(&self) -> Vec<MonitorStatus> {
        self.state.read().await.monitors.clone()
    }

    /// Stop a single session, returning false if it is not running
    pub async fn stop(&mut self, name: &str) -> bool {
        match self.handles.iter().position(|h| h.name() == name) {
            Some(index) => {
                self.handles.remove(index).stop().await;
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&mut self) {
        for handle in self.handles.drain(..) {
            tracing::debug!("Stopping monitor '{}'", handle.name());
            handle.stop().await;
        }
    }

    /// Block until cancelled, then stop every session
    pub async fn run(&mut self) {
        self.cancel.cancelled().await;
        self.stop_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitoringConfig;
    use crate::io::{HttpMethod, HttpResponse, MockHttpClient};
    use crate::notifier::LogDispatcher;
    use crate::operation::CandidateOperation;
    use crate::state::{new_state_handle, SessionState};
    use chrono::NaiveDate;

    fn config() -> Config {
        let from = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        let to = NaiveDate::from_ymd_opt(2025, 2, 15).unwrap();
        let mut config = Config::default();
        config.probe.candidates = vec![CandidateOperation::new(
            "occasions",
            HttpMethod::Get,
            "/occasions",
            0,
        )];
        config.probe.target_working = 1;
        config.monitors = vec![
            MonitoringConfig::new("farsta", &["Farsta"], from, to),
            MonitoringConfig::new("kista", &["Kista"], from, to),
        ];
        config
    }

    fn upstream(status: u16) -> Upstream {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .returning(move |_| Box::pin(async move { Ok(HttpResponse::json(status, "[]")) }));
        Upstream::new(Arc::new(mock), "https://h", vec![])
    }

    #[tokio::test]
    async fn sessions_start_and_stop_independently() {
        let state = new_state_handle(10);
        let mut engine = Engine::new(Arc::clone(&state), CancellationToken::new());
        let monitors = monitors_from_config(
            &config(),
            &upstream(200),
            Arc::new(LogDispatcher),
            None,
            &state,
        );

        let failures = engine.start_all(monitors).await;
        assert!(failures.is_empty());
        assert_eq!(engine.handles().len(), 2);
        let kista = engine.handle("kista").unwrap().status().await.unwrap();
        assert_eq!(kista.state, SessionState::Active);

        assert!(engine.stop("farsta").await);
        assert!(engine.handle("farsta").is_none());
        assert!(!engine.stop("farsta").await);

        let statuses = engine.statuses().await;
        let farsta = statuses.iter().find(|s| s.name == "farsta").unwrap();
        let kista = statuses.iter().find(|s| s.name == "kista").unwrap();
        assert_eq!(farsta.state, SessionState::Stopped);
        assert_eq!(kista.state, SessionState::Active);

        engine.stop_all().await;
        assert!(engine.handles().is_empty());
        let statuses = engine.statuses().await;
        assert!(statuses.iter().all(|s| s.state == SessionState::Stopped));
    }

    #[tokio::test]
    async fn start_failures_are_reported_per_session() {
        let state = new_state_handle(10);
        let mut engine = Engine::new(Arc::clone(&state), CancellationToken::new());
        let mut config = config();
        config.monitors[1].locations.clear();
        let monitors = monitors_from_config(
            &config,
            &upstream(404),
            Arc::new(LogDispatcher),
            None,
            &state,
        );

        let failures = engine.start_all(monitors).await;

        assert_eq!(failures.len(), 2);
        assert!(matches!(
            failures[0].1,
            crate::SlotwatchError::NoWorkingOperations { .. }
        ));
        assert!(matches!(failures[1].1, crate::SlotwatchError::Config(_)));
        assert!(engine.handles().is_empty());
    }

    #[tokio::test]
    async fn cancelling_the_engine_stops_every_session() {
        let state = new_state_handle(10);
        let cancel = CancellationToken::new();
        let mut engine = Engine::new(Arc::clone(&state), cancel.clone());
        let monitors = monitors_from_config(
            &config(),
            &upstream(200),
            Arc::new(LogDispatcher),
            None,
            &state,
        );
        engine.start_all(monitors).await;

        cancel.cancel();
        engine.run().await;

        let statuses = engine.statuses().await;
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.state == SessionState::Stopped));
    }
}
