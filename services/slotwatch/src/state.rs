//! Shared state for monitor statuses and notification history

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::notifier::NotificationRecord;

/// Lifecycle of one monitoring session. Stopped is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Starting,
    Active,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Starting => write!(f, "Starting"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Where an active monitor is within its tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickPhase {
    RefreshingAuth,
    Querying,
    Diffing,
    Notifying,
    Idle,
}

/// Status of a single monitoring session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub name: String,
    pub state: SessionState,
    pub phase: TickPhase,
    pub operation: Option<String>,
    pub records_seen: usize,
    pub last_tick_epoch_ms: Option<u64>,
    pub ticks_completed: u64,
    pub ticks_failed: u64,
    pub ticks_skipped: u64,
    pub consecutive_failures: u32,
    pub notifications_sent: u64,
    pub last_error: Option<String>,
}

impl MonitorStatus {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: SessionState::Starting,
            phase: TickPhase::Idle,
            operation: None,
            records_seen: 0,
            last_tick_epoch_ms: None,
            ticks_completed: 0,
            ticks_failed: 0,
            ticks_skipped: 0,
            consecutive_failures: 0,
            notifications_sent: 0,
            last_error: None,
        }
    }

    pub fn summary(&self) -> StatusSummary {
        StatusSummary {
            state: self.state,
            records_seen: self.records_seen,
            last_tick_epoch_ms: self.last_tick_epoch_ms,
        }
    }
}

/// The compact status exposed to callers of a session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub state: SessionState,
    pub records_seen: usize,
    pub last_tick_epoch_ms: Option<u64>,
}

/// Shared state accessible by monitors and dashboard
#[derive(Debug)]
pub struct SharedState {
    pub monitors: Vec<MonitorStatus>,
    pub history: VecDeque<NotificationRecord>,
    pub history_max_size: usize,
    pub started_at: Instant,
}

impl SharedState {
    pub fn new(history_max_size: usize) -> Self {
        Self {
            monitors: Vec::new(),
            history: VecDeque::with_capacity(history_max_size),
            history_max_size,
            started_at: Instant::now(),
        }
    }

    /// Add a fresh Starting entry. A stopped session with the same name is
    /// replaced; a name still Starting or Active is refused, since status is
    /// keyed by name.
    pub fn register(&mut self, name: &str) -> crate::Result<()> {
        let status = MonitorStatus::new(name);
        match self.monitors.iter_mut().find(|m| m.name == name) {
            Some(existing) if existing.state != SessionState::Stopped => {
                Err(crate::SlotwatchError::Session(format!(
                    "a session named '{}' is already {}",
                    name,
                    existing.state.to_string().to_lowercase()
                )))
            }
            Some(existing) => {
                *existing = status;
                Ok(())
            }
            None => {
                self.monitors.push(status);
                Ok(())
            }
        }
    }

    pub fn monitor(&self, name: &str) -> Option<&MonitorStatus> {
        self.monitors.iter().find(|m| m.name == name)
    }

    /// Apply `update` to a monitor's status, returning false if it is unknown
    pub fn update_monitor(&mut self, name: &str, update: impl FnOnce(&mut MonitorStatus)) -> bool {
        match self.monitors.iter_mut().find(|m| m.name == name) {
            Some(status) => {
                update(status);
                true
            }
            None => false,
        }
    }

    /// Add a notification to history
    pub fn add_notification(&mut self, record: NotificationRecord) {
        if self.history_max_size == 0 {
            return;
        }
        if self.history.len() >= self.history_max_size {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }
}

/// Thread-safe shared state handle
pub type StateHandle = Arc<RwLock<SharedState>>;

pub fn new_state_handle(history_max_size: usize) -> StateHandle {
    Arc::new(RwLock::new(SharedState::new(history_max_size)))
}

pub fn current_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
