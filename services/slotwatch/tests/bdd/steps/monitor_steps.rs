//! Step definitions for the poll-diff-notify cycle

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use cucumber::gherkin::Step;
use cucumber::{given, then, when};

use slotwatch::io::{HttpClient, HttpMethod};
use slotwatch::monitor::{MonitorDeps, SlotMonitor, TickOutcome};
use slotwatch::notifier::NotificationDispatcher;
use slotwatch::operation::{CandidateOperation, Upstream};
use slotwatch::probe::ProbeSettings;
use slotwatch::session::{NoopRefresher, SessionHandle};
use slotwatch::state::{new_state_handle, SessionState};
use slotwatch::MonitoringConfig;

use crate::world::{Reply, SlotwatchWorld, BASE_URL};

pub const OCCASIONS_PATH: &str = "/occasions";

/// Turn a `location | date | time | type` table into an upstream body
pub fn occasions_body(step: &Step) -> String {
    let table = step.table.as_ref().expect("step needs a data table");
    let items: Vec<serde_json::Value> = table
        .rows
        .iter()
        .skip(1)
        .map(|row| {
            serde_json::json!({
                "locationId": row[0],
                "date": row[1],
                "time": row[2],
                "examType": row[3],
            })
        })
        .collect();
    serde_json::json!({ "occasions": items }).to_string()
}

pub fn window_config(name: &str, locations: &[String]) -> MonitoringConfig {
    let locations: Vec<&str> = locations.iter().map(String::as_str).collect();
    MonitoringConfig::new(
        name,
        &locations,
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
        NaiveDate::from_ymd_opt(2025, 2, 15).unwrap(),
    )
}

#[given(expr = "a monitoring session for locations {string}")]
fn session_for_locations(world: &mut SlotwatchWorld, locations: String) {
    world.locations = locations.split(',').map(|l| l.trim().to_string()).collect();
}

pub async fn answer_queries(world: &SlotwatchWorld, reply: Reply) {
    world
        .upstream
        .route(HttpMethod::Get, OCCASIONS_PATH, reply)
        .await;
}

#[given("the site offers:")]
async fn site_offers(world: &mut SlotwatchWorld, step: &Step) {
    answer_queries(world, Reply::data(&occasions_body(step))).await;
}

#[when("the site starts offering:")]
async fn site_starts_offering(world: &mut SlotwatchWorld, step: &Step) {
    answer_queries(world, Reply::data(&occasions_body(step))).await;
}

#[given(expr = "the site answers every query with status {int}")]
async fn site_answers_status(world: &mut SlotwatchWorld, status: u16) {
    answer_queries(world, Reply::status(status)).await;
}

#[when(expr = "the site starts rejecting queries with status {int}")]
async fn site_rejects(world: &mut SlotwatchWorld, status: u16) {
    answer_queries(world, Reply::status(status)).await;
}

#[when("the session starts")]
async fn session_starts(world: &mut SlotwatchWorld) {
    let state = new_state_handle(10);
    let deps = MonitorDeps {
        upstream: Upstream::new(
            Arc::clone(&world.upstream) as Arc<dyn HttpClient>,
            BASE_URL,
            vec![],
        ),
        probe: ProbeSettings {
            attempt_timeout: Duration::from_secs(15),
            budget: Duration::from_secs(120),
            target_working: 1,
        },
        candidates: vec![CandidateOperation::new(
            "occasions",
            HttpMethod::Get,
            OCCASIONS_PATH,
            0,
        )],
        session: SessionHandle::default(),
        refresher: Arc::new(NoopRefresher),
        dispatcher: Arc::clone(&world.dispatcher) as Arc<dyn NotificationDispatcher>,
        state: Arc::clone(&state),
    };
    world.state = Some(state);

    let monitor = SlotMonitor::new(window_config("watch", &world.locations), deps)
        .expect("valid monitoring config");
    match monitor.prepare().await {
        Ok(active) => world.active = Some(active),
        Err(e) => world.start_error = Some(e),
    }
}

#[when("the session ticks")]
async fn session_ticks(world: &mut SlotwatchWorld) {
    let active = world.active.as_mut().expect("session is not active");
    let outcome = active.tick().await;
    world.outcomes.push(outcome);
}

#[then("no notification was sent")]
async fn no_notification(world: &mut SlotwatchWorld) {
    assert!(world.dispatcher.sent.read().await.is_empty());
}

#[then(expr = "exactly {int} notification(s) was/were sent")]
async fn notifications_sent(world: &mut SlotwatchWorld, expected: usize) {
    assert_eq!(world.dispatcher.sent.read().await.len(), expected);
}

#[then(expr = "the seen set holds {int} slot(s)")]
fn seen_holds(world: &mut SlotwatchWorld, expected: usize) {
    let active = world.active.as_ref().expect("session is not active");
    assert_eq!(active.seen().len(), expected);
}

#[then(expr = "the last notification has subject {string}")]
async fn last_subject(world: &mut SlotwatchWorld, subject: String) {
    let sent = world.dispatcher.sent.read().await;
    let (_, actual, _) = sent.last().expect("nothing was sent");
    assert_eq!(actual, &subject);
}

#[then(expr = "the last notification mentions {string}")]
async fn last_mentions(world: &mut SlotwatchWorld, text: String) {
    let sent = world.dispatcher.sent.read().await;
    let (_, _, body) = sent.last().expect("nothing was sent");
    assert!(body.contains(&text), "'{}' not in:\n{}", text, body);
}

#[then(expr = "the last notification does not mention {string}")]
async fn last_does_not_mention(world: &mut SlotwatchWorld, text: String) {
    let sent = world.dispatcher.sent.read().await;
    let (_, _, body) = sent.last().expect("nothing was sent");
    assert!(!body.contains(&text), "'{}' unexpectedly in:\n{}", text, body);
}

#[then("the last tick found nothing new")]
fn last_tick_nothing_new(world: &mut SlotwatchWorld) {
    assert_eq!(world.outcomes.last(), Some(&TickOutcome::NothingNew));
}

#[then("the last tick reported expired authorization")]
fn last_tick_auth_expired(world: &mut SlotwatchWorld) {
    assert_eq!(world.outcomes.last(), Some(&TickOutcome::AuthExpired));
}

#[then(expr = "the session is {word}")]
async fn session_is(world: &mut SlotwatchWorld, expected: String) {
    let state = world.state.as_ref().expect("no session state");
    let guard = state.read().await;
    let status = guard.monitor("watch").expect("session not registered");
    let expected = match expected.as_str() {
        "active" => SessionState::Active,
        "stopped" => SessionState::Stopped,
        other => panic!("unknown session state '{}'", other),
    };
    assert_eq!(status.state, expected);
}

#[then("the session failed to start")]
fn session_failed_to_start(world: &mut SlotwatchWorld) {
    assert!(world.active.is_none());
    assert!(matches!(
        world.start_error,
        Some(slotwatch::SlotwatchError::NoWorkingOperations { .. })
    ));
}
