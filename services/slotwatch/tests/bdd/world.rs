//! BDD test world for slotwatch service

use std::collections::HashMap;
use std::sync::Arc;

use cucumber::World;
use tokio::sync::RwLock;

use slotwatch::io::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use slotwatch::monitor::{ActiveMonitor, TickOutcome};
use slotwatch::notifier::NotificationDispatcher;
use slotwatch::operation::CandidateOperation;
use slotwatch::probe::WorkingOperation;
use slotwatch::state::StateHandle;

pub const BASE_URL: &str = "https://booking.test";

// --- Test doubles ---

/// A canned upstream reply
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl Reply {
    pub fn data(body: &str) -> Self {
        Self {
            status: 200,
            content_type: Some("application/json".to_string()),
            body: body.to_string(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: String::new(),
        }
    }

    pub fn markup() -> Self {
        Self {
            status: 200,
            content_type: Some("text/html".to_string()),
            body: "<html><body>Logga in</body></html>".to_string(),
        }
    }
}

/// An upstream that answers by method and path and records every request
#[derive(Debug, Default)]
pub struct FakeUpstream {
    routes: RwLock<HashMap<(HttpMethod, String), Reply>>,
    pub requests: RwLock<Vec<(HttpMethod, String)>>,
}

impl FakeUpstream {
    pub async fn route(&self, method: HttpMethod, path: &str, reply: Reply) {
        self.routes
            .write()
            .await
            .insert((method, path.to_string()), reply);
    }

    pub async fn requested_paths(&self) -> Vec<String> {
        self.requests
            .read()
            .await
            .iter()
            .map(|(_, path)| path.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl HttpClient for FakeUpstream {
    async fn execute(&self, request: &HttpRequest) -> slotwatch::Result<HttpResponse> {
        let path = request
            .url
            .strip_prefix(BASE_URL)
            .unwrap_or(&request.url)
            .to_string();
        self.requests
            .write()
            .await
            .push((request.method, path.clone()));

        let reply = self
            .routes
            .read()
            .await
            .get(&(request.method, path))
            .cloned()
            .unwrap_or_else(|| Reply::status(404));
        Ok(HttpResponse {
            status: reply.status,
            content_type: reply.content_type,
            body: reply.body,
        })
    }
}

/// A dispatcher that keeps every message it is asked to send
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    pub sent: RwLock<Vec<(String, String, String)>>,
}

#[async_trait::async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    fn type_name(&self) -> &str {
        "recording"
    }

    async fn send(&self, destination: &str, subject: &str, body: &str) -> slotwatch::Result<()> {
        self.sent.write().await.push((
            destination.to_string(),
            subject.to_string(),
            body.to_string(),
        ));
        Ok(())
    }
}

#[derive(Debug, Default, World)]
pub struct SlotwatchWorld {
    pub upstream: Arc<FakeUpstream>,
    pub dispatcher: Arc<RecordingDispatcher>,

    // Probe testing
    pub candidates: Vec<CandidateOperation>,
    pub target_working: Option<usize>,
    pub probe_outcome: Option<slotwatch::Result<Vec<WorkingOperation>>>,

    // Monitor testing
    pub locations: Vec<String>,
    pub state: Option<StateHandle>,
    pub active: Option<ActiveMonitor>,
    pub start_error: Option<slotwatch::SlotwatchError>,
    pub outcomes: Vec<TickOutcome>,

    // Lifecycle testing
    pub config: Option<slotwatch::Config>,
    pub pre_cancelled: bool,
    pub lifecycle_result: Option<slotwatch::Result<()>>,
}
