//! Slot monitor: one session's probe, baseline and poll-diff-notify loop

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::MonitoringConfig;
use crate::notifier::{compose_batch, NotificationDispatcher, NotificationRecord};
use crate::operation::{CandidateOperation, Upstream};
use crate::probe::{select_primary, EndpointProbe, ProbeSettings, WorkingOperation};
use crate::record::{parse_availability, AvailabilityRecord, LocationFilter};
use crate::seen::SeenSet;
use crate::session::{SessionHandle, SessionRefresher};
use crate::state::{
    current_epoch_ms, MonitorStatus, SessionState, StateHandle, StatusSummary, TickPhase,
};

/// Everything a monitor needs from outside its own configuration
#[derive(Debug, Clone)]
pub struct MonitorDeps {
    pub upstream: Upstream,
    pub probe: ProbeSettings,
    pub candidates: Vec<CandidateOperation>,
    pub session: SessionHandle,
    pub refresher: Arc<dyn SessionRefresher>,
    pub dispatcher: Arc<dyn NotificationDispatcher>,
    pub state: StateHandle,
}

/// What one tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// First successful poll; its records seed the seen set silently
    Baseline { records: usize },
    Notified { records: usize },
    NothingNew,
    /// New records found but stop was requested before dispatch
    Suppressed,
    DispatchFailed,
    AuthExpired,
    Failed,
}

/// A monitoring session that has not started yet
#[derive(Debug)]
pub struct SlotMonitor {
    config: MonitoringConfig,
    deps: MonitorDeps,
    cancel: CancellationToken,
}

impl SlotMonitor {
    pub fn new(config: MonitoringConfig, deps: MonitorDeps) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            deps,
            cancel: CancellationToken::new(),
        })
    }

    /// Stop this session when `cancel` fires
    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Run the Starting phase: probe, then a baseline poll.
    ///
    /// A probe that finds nothing is fatal and leaves the session Stopped.
    /// A failed baseline is not; the next successful poll becomes the baseline.
    pub async fn prepare(self) -> crate::Result<ActiveMonitor> {
        let SlotMonitor {
            config,
            deps,
            cancel,
        } = self;
        let name = config.name.clone();
        if let Err(e) = deps.state.write().await.register(&name) {
            tracing::error!("Monitor '{}' cannot start: {}", name, e);
            return Err(e);
        }
        tracing::info!("Starting monitor '{}'", name);

        let prober = EndpointProbe::new(deps.upstream.clone(), deps.probe);
        let context = deps.session.snapshot().await;
        let operation = match prober
            .probe(&deps.candidates, &config.window(), &context)
            .await
            .and_then(|working| {
                select_primary(&working).cloned().ok_or_else(|| {
                    crate::SlotwatchError::NoWorkingOperations {
                        attempted: working.len(),
                    }
                })
            }) {
            Ok(operation) => operation,
            Err(e) => {
                tracing::error!("Monitor '{}' cannot start: {}", name, e);
                let message = e.to_string();
                deps.state.write().await.update_monitor(&name, |status| {
                    status.state = SessionState::Stopped;
                    status.last_error = Some(message);
                });
                return Err(e);
            }
        };

        tracing::info!(
            "Monitor '{}' polling {} {} ({:?})",
            name,
            operation.operation.method,
            operation.operation.path,
            operation.access
        );
        let operation_name = operation.name().to_string();
        deps.state.write().await.update_monitor(&name, |status| {
            status.state = SessionState::Active;
            status.operation = Some(operation_name);
        });

        let mut active = ActiveMonitor {
            name,
            filter: LocationFilter::new(&config.locations),
            seen: SeenSet::new(config.seen_capacity),
            config,
            operation,
            upstream: deps.upstream,
            session: deps.session,
            refresher: deps.refresher,
            dispatcher: deps.dispatcher,
            state: deps.state,
            cancel,
            baseline_pending: true,
        };
        active.tick().await;
        Ok(active)
    }

    /// Prepare, then run the polling loop in the background
    pub async fn start(self) -> crate::Result<MonitorHandle> {
        let active = self.prepare().await?;
        let handle = MonitorHandle {
            name: active.name.clone(),
            state: Arc::clone(&active.state),
            session: active.session.clone(),
            cancel: active.cancel.clone(),
            task: None,
        };
        Ok(handle.with_task(tokio::spawn(active.run())))
    }
}

/// A session past probing. Owns the seen set; only its own loop touches it.
#[derive(Debug)]
pub struct ActiveMonitor {
    name: String,
    config: MonitoringConfig,
    filter: LocationFilter,
    operation: WorkingOperation,
    upstream: Upstream,
    session: SessionHandle,
    refresher: Arc<dyn SessionRefresher>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    state: StateHandle,
    seen: SeenSet,
    cancel: CancellationToken,
    baseline_pending: bool,
}

impl ActiveMonitor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operation(&self) -> &WorkingOperation {
        &self.operation
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Refresh, query, diff and notify once. Never fails; errors end the tick.
    pub async fn tick(&mut self) -> TickOutcome {
        self.set_phase(TickPhase::RefreshingAuth).await;
        self.refresh_session().await;

        self.set_phase(TickPhase::Querying).await;
        let records = match self.query().await {
            Ok(records) => records,
            Err(e) => return self.tick_failed(e).await,
        };

        self.set_phase(TickPhase::Diffing).await;
        let fresh = self.seen.unseen(&records);
        self.seen.observe(&records);

        if self.baseline_pending {
            self.baseline_pending = false;
            tracing::info!(
                "Monitor '{}' baseline: {} slot(s) already on offer",
                self.name,
                records.len()
            );
            self.tick_completed(0).await;
            return TickOutcome::Baseline {
                records: records.len(),
            };
        }

        let outcome = self.notify(&fresh).await;
        let sent = match outcome {
            TickOutcome::Notified { .. } => 1,
            _ => 0,
        };
        self.tick_completed(sent).await;
        outcome
    }

    /// Tick on a fixed schedule until cancelled.
    ///
    /// Ticks never overlap. When a tick overruns one or more interval
    /// boundaries, those boundaries are skipped rather than queued.
    pub async fn run(mut self) {
        let period = self.config.poll_interval();
        let mut next = Instant::now() + period;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep_until(next) => {}
            }

            let outcome = self.tick().await;
            tracing::debug!("Monitor '{}' tick: {:?}", self.name, outcome);

            next += period;
            let now = Instant::now();
            if now > next {
                let missed = ((now - next).as_nanos() / period.as_nanos()) as u32 + 1;
                next += period * missed;
                tracing::warn!(
                    "Monitor '{}' tick overran, skipping {} interval(s)",
                    self.name,
                    missed
                );
                self.update_status(|status| status.ticks_skipped += u64::from(missed))
                    .await;
            }
        }

        self.update_status(|status| {
            status.state = SessionState::Stopped;
            status.phase = TickPhase::Idle;
        })
        .await;
        tracing::info!("Monitor '{}' stopped", self.name);
    }

    /// Best effort; the tick goes ahead on the existing context regardless
    async fn refresh_session(&self) {
        let bound = self.config.query_timeout();
        match tokio::time::timeout(bound, self.refresher.refresh(&self.session)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(
                "Session refresh ({}) for '{}' failed: {}",
                self.refresher.name(),
                self.name,
                e
            ),
            Err(_) => tracing::warn!(
                "Session refresh ({}) for '{}' exceeded {:?}",
                self.refresher.name(),
                self.name,
                bound
            ),
        }
    }

    async fn query(&self) -> crate::Result<Vec<AvailabilityRecord>> {
        let context = self.session.snapshot().await;
        if context.is_expired(Utc::now()) {
            tracing::debug!(
                "Session window for '{}' has lapsed, querying anyway",
                self.name
            );
        }

        let operation = &self.operation.operation;
        let response = self
            .upstream
            .call(
                operation,
                operation.method,
                &self.config.window(),
                &context,
                self.config.query_timeout(),
            )
            .await?;

        if response.is_auth_failure() {
            return Err(crate::SlotwatchError::Unauthorized {
                status: response.status,
            });
        }
        if !response.is_success() {
            return Err(crate::SlotwatchError::Http(format!(
                "{} {} returned status {}",
                operation.method, operation.path, response.status
            )));
        }
        if response.looks_like_markup() {
            return Err(crate::SlotwatchError::MalformedResponse(format!(
                "{} returned markup instead of data",
                operation.path
            )));
        }

        parse_availability(&response.body, &self.filter, &self.config.category)
    }

    async fn notify(&mut self, fresh: &[AvailabilityRecord]) -> TickOutcome {
        let Some(batch) = compose_batch(fresh, &self.filter, self.config.booking_url.as_deref())
        else {
            return TickOutcome::NothingNew;
        };

        if self.cancel.is_cancelled() {
            tracing::info!(
                "Monitor '{}' stopping, suppressing notification for {} new slot(s)",
                self.name,
                batch.records.len()
            );
            return TickOutcome::Suppressed;
        }

        self.set_phase(TickPhase::Notifying).await;
        tracing::info!("Monitor '{}': {}", self.name, batch.subject);
        let result = self
            .dispatcher
            .send(&self.config.notify_address, &batch.subject, &batch.body)
            .await;

        if let Err(e) = &result {
            tracing::warn!(
                "Notification via '{}' for '{}' failed: {}",
                self.dispatcher.type_name(),
                self.name,
                e
            );
        }
        self.state.write().await.add_notification(NotificationRecord {
            monitor_name: self.name.clone(),
            notifier_type: self.dispatcher.type_name().to_string(),
            subject: batch.subject.clone(),
            record_count: batch.records.len(),
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
            timestamp_epoch_ms: current_epoch_ms(),
        });

        match result {
            Ok(()) => TickOutcome::Notified {
                records: batch.records.len(),
            },
            Err(_) => TickOutcome::DispatchFailed,
        }
    }

    async fn tick_completed(&self, notifications: u64) {
        let records_seen = self.seen.len();
        self.update_status(|status| {
            status.phase = TickPhase::Idle;
            status.records_seen = records_seen;
            status.last_tick_epoch_ms = Some(current_epoch_ms());
            status.ticks_completed += 1;
            status.consecutive_failures = 0;
            status.notifications_sent += notifications;
            status.last_error = None;
        })
        .await;
    }

    async fn tick_failed(&self, error: crate::SlotwatchError) -> TickOutcome {
        if error.is_auth() {
            tracing::warn!(
                "Monitor '{}': upstream rejected the session ({}), retrying next tick",
                self.name,
                error
            );
        } else {
            tracing::warn!("Monitor '{}' tick failed: {}", self.name, error);
        }

        let message = error.to_string();
        let mut failures = 0;
        self.update_status(|status| {
            status.phase = TickPhase::Idle;
            status.last_tick_epoch_ms = Some(current_epoch_ms());
            status.ticks_failed += 1;
            status.consecutive_failures += 1;
            status.last_error = Some(message);
            failures = status.consecutive_failures;
        })
        .await;
        if failures == 5 {
            tracing::warn!(
                "Monitor '{}' has {} consecutive failed ticks",
                self.name,
                failures
            );
        }

        if error.is_auth() {
            TickOutcome::AuthExpired
        } else {
            TickOutcome::Failed
        }
    }

    async fn set_phase(&self, phase: TickPhase) {
        self.update_status(|status| status.phase = phase).await;
    }

    async fn update_status(&self, update: impl FnOnce(&mut MonitorStatus)) {
        self.state.write().await.update_monitor(&self.name, update);
    }
}

/// Caller-side handle to a running session
#[derive(Debug)]
pub struct MonitorHandle {
    name: String,
    state: StateHandle,
    session: SessionHandle,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The session's credentials, for external refresh
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub async fn status(&self) -> Option<StatusSummary> {
        self.details().await.map(|status| status.summary())
    }

    pub async fn details(&self) -> Option<MonitorStatus> {
        self.state.read().await.monitor(&self.name).cloned()
    }

    /// Stop for good. An in-flight query may finish, but nothing more is sent.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Monitor '{}' task ended abnormally: {}", self.name, e);
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
