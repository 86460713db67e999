//! Notification dispatch boundary and batch composition

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::NotifierConfig;
use crate::io::HttpClient;
use crate::pushover::PushoverDispatcher;
use crate::record::{AvailabilityRecord, LocationFilter};
use crate::webhook::WebhookDispatcher;

/// Record of a dispatched notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub monitor_name: String,
    pub notifier_type: String,
    pub subject: String,
    pub record_count: usize,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp_epoch_ms: u64,
}

/// Delivers one message to an opaque destination
#[async_trait]
pub trait NotificationDispatcher: Send + Sync + std::fmt::Debug {
    /// Get the dispatcher type name (e.g. "pushover")
    fn type_name(&self) -> &str;

    async fn send(&self, destination: &str, subject: &str, body: &str) -> crate::Result<()>;
}

/// Writes notifications to the log; used when nothing else is configured
#[derive(Debug, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    fn type_name(&self) -> &str {
        "log"
    }

    async fn send(&self, destination: &str, subject: &str, body: &str) -> crate::Result<()> {
        tracing::info!("Notification for '{}': {}\n{}", destination, subject, body);
        Ok(())
    }
}

/// Build the dispatcher for the first configured notifier
pub fn dispatcher_from_config(
    notifiers: &[NotifierConfig],
    http: Arc<dyn HttpClient>,
) -> crate::Result<Arc<dyn NotificationDispatcher>> {
    if notifiers.len() > 1 {
        tracing::warn!(
            "{} notifiers configured, only the first ('{}') is used",
            notifiers.len(),
            notifiers[0].type_name()
        );
    }
    Ok(match notifiers.first() {
        Some(config @ NotifierConfig::Pushover { .. }) => {
            Arc::new(PushoverDispatcher::new(config, http)?)
        }
        Some(config @ NotifierConfig::Webhook { .. }) => {
            Arc::new(WebhookDispatcher::new(config, http)?)
        }
        Some(NotifierConfig::Log) | None => Arc::new(LogDispatcher),
    })
}

/// One tick's worth of new slots, ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct SlotBatch {
    pub subject: String,
    pub body: String,
    pub records: Vec<AvailabilityRecord>,
}

/// Summarize new slots, grouped by location, into a single message.
///
/// The allow-list is applied again here. Anything it removes got past the
/// parser's filter and is logged as a defect. Returns `None` when nothing
/// in scope remains.
pub fn compose_batch(
    records: &[AvailabilityRecord],
    filter: &LocationFilter,
    fallback_booking_url: Option<&str>,
) -> Option<SlotBatch> {
    let (in_scope, leaked): (Vec<&AvailabilityRecord>, Vec<&AvailabilityRecord>) =
        records.iter().partition(|r| filter.allows(r));

    if !leaked.is_empty() {
        tracing::error!(
            "Dropped {} out-of-scope slot(s) at dispatch: {}",
            leaked.len(),
            leaked
                .iter()
                .map(|r| r.display_location())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    if in_scope.is_empty() {
        return None;
    }

    // Keyed by location id: distinct sites may share a display name
    let mut by_location: BTreeMap<&str, Vec<&AvailabilityRecord>> = BTreeMap::new();
    for record in &in_scope {
        by_location
            .entry(record.location.as_str())
            .or_default()
            .push(record);
    }

    let mut body = String::new();
    for (_, mut slots) in by_location {
        slots.sort_by_key(|r| r.start);
        body.push_str(&location_label(slots[0]));
        body.push('\n');
        for slot in slots {
            body.push_str(&format!(
                "  - {} ({})",
                slot.start.format("%Y-%m-%d %H:%M"),
                slot.category
            ));
            if let Some(url) = &slot.booking_url {
                body.push_str(&format!(" {}", url));
            }
            body.push('\n');
        }
    }
    if let Some(url) = fallback_booking_url {
        body.push_str(&format!("\nBook at: {}\n", url));
    }

    let count = in_scope.len();
    let subject = if count == 1 {
        "1 new slot available".to_string()
    } else {
        format!("{} new slots available", count)
    };

    Some(SlotBatch {
        subject,
        body,
        records: in_scope.into_iter().cloned().collect(),
    })
}

/// Display name with the id alongside, or the bare id when no name is known
fn location_label(record: &AvailabilityRecord) -> String {
    match record.location_name.as_deref() {
        Some(name) if name != record.location => format!("{} ({})", name, record.location),
        _ => record.location.clone(),
    }
}
