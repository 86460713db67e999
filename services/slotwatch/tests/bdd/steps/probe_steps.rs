//! Step definitions for endpoint probing

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use cucumber::{given, then, when};

use slotwatch::io::{HttpClient, HttpMethod};
use slotwatch::operation::{CandidateOperation, Upstream};
use slotwatch::probe::{select_primary, Access, EndpointProbe, ProbeSettings};
use slotwatch::session::SessionContext;
use slotwatch::{MonitoringConfig, SlotwatchError};

use crate::world::{Reply, SlotwatchWorld, BASE_URL};

const STRUCTURED_DATA: &str = r#"{"occasions": []}"#;

fn parse_method(method: &str) -> HttpMethod {
    match method {
        "POST" => HttpMethod::Post,
        _ => HttpMethod::Get,
    }
}

fn add_candidate(world: &mut SlotwatchWorld, name: &str, rank: u32, method: HttpMethod) {
    if !world.candidates.iter().any(|c| c.name == name) {
        world.candidates.push(CandidateOperation::new(
            name,
            method,
            &format!("/{}", name),
            rank,
        ));
    }
}

#[given(expr = "{int} candidate operations that all return structured data")]
async fn candidates_all_work(world: &mut SlotwatchWorld, count: u32) {
    for rank in 0..count {
        let name = format!("op{}", rank);
        add_candidate(world, &name, rank, HttpMethod::Get);
        world
            .upstream
            .route(HttpMethod::Get, &format!("/{}", name), Reply::data(STRUCTURED_DATA))
            .await;
    }
}

#[given(expr = "the probe wants {int} working operation(s)")]
fn probe_target(world: &mut SlotwatchWorld, target: usize) {
    world.target_working = Some(target);
}

#[given(expr = "candidate {string} at rank {int} answers {word} with status {int}")]
async fn candidate_status(
    world: &mut SlotwatchWorld,
    name: String,
    rank: u32,
    method: String,
    status: u16,
) {
    let method = parse_method(&method);
    add_candidate(world, &name, rank, method);
    world
        .upstream
        .route(method, &format!("/{}", name), Reply::status(status))
        .await;
}

#[given(expr = "candidate {string} at rank {int} answers {word} with structured data")]
async fn candidate_data(world: &mut SlotwatchWorld, name: String, rank: u32, method: String) {
    let method = parse_method(&method);
    add_candidate(world, &name, rank, method);
    world
        .upstream
        .route(method, &format!("/{}", name), Reply::data(STRUCTURED_DATA))
        .await;
}

#[given(expr = "candidate {string} at rank {int} answers {word} with markup")]
async fn candidate_markup(world: &mut SlotwatchWorld, name: String, rank: u32, method: String) {
    let method = parse_method(&method);
    add_candidate(world, &name, rank, method);
    world
        .upstream
        .route(method, &format!("/{}", name), Reply::markup())
        .await;
}

#[when("the candidates are probed")]
async fn probe_candidates(world: &mut SlotwatchWorld) {
    let upstream = Upstream::new(
        Arc::clone(&world.upstream) as Arc<dyn HttpClient>,
        BASE_URL,
        vec![],
    );
    let settings = ProbeSettings {
        attempt_timeout: Duration::from_secs(15),
        budget: Duration::from_secs(120),
        target_working: world.target_working.unwrap_or(2),
    };
    let window = MonitoringConfig::new(
        "probe",
        &["Farsta"],
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
        NaiveDate::from_ymd_opt(2025, 2, 15).unwrap(),
    )
    .window();

    let outcome = EndpointProbe::new(upstream, settings)
        .probe(&world.candidates, &window, &SessionContext::default())
        .await;
    world.probe_outcome = Some(outcome);
}

fn working(world: &SlotwatchWorld) -> &[slotwatch::probe::WorkingOperation] {
    match world.probe_outcome.as_ref().expect("probe has not run") {
        Ok(working) => working,
        Err(e) => panic!("probe failed: {}", e),
    }
}

#[then(expr = "{int} candidate(s) were/was attempted")]
async fn candidates_attempted(world: &mut SlotwatchWorld, expected: usize) {
    let mut paths = world.upstream.requested_paths().await;
    paths.dedup();
    assert_eq!(paths.len(), expected, "requested: {:?}", paths);
}

#[then(expr = "{int} working operation(s) were/was found")]
fn working_found(world: &mut SlotwatchWorld, expected: usize) {
    assert_eq!(working(world).len(), expected);
}

#[then(expr = "the working operation {string} is gated")]
fn operation_is_gated(world: &mut SlotwatchWorld, name: String) {
    let op = working(world)
        .iter()
        .find(|w| w.name() == name)
        .unwrap_or_else(|| panic!("'{}' is not a working operation", name));
    assert_eq!(op.access, Access::Gated);
}

#[then(expr = "{string} is not a working operation")]
fn not_working(world: &mut SlotwatchWorld, name: String) {
    assert!(working(world).iter().all(|w| w.name() != name));
}

#[then(expr = "the primary operation is {string}")]
fn primary_is(world: &mut SlotwatchWorld, name: String) {
    let primary = select_primary(working(world)).expect("no primary operation");
    assert_eq!(primary.name(), name);
    assert_eq!(primary.access, Access::Usable);
}

#[then(expr = "the working operation {string} uses {word}")]
fn operation_uses(world: &mut SlotwatchWorld, name: String, method: String) {
    let op = working(world)
        .iter()
        .find(|w| w.name() == name)
        .unwrap_or_else(|| panic!("'{}' is not a working operation", name));
    assert_eq!(op.operation.method, parse_method(&method));
}

#[then(expr = "probing fails with no working operations after {int} attempts")]
fn probing_fails(world: &mut SlotwatchWorld, expected: usize) {
    match world.probe_outcome.as_ref().expect("probe has not run") {
        Err(SlotwatchError::NoWorkingOperations { attempted }) => {
            assert_eq!(*attempted, expected)
        }
        other => panic!("expected NoWorkingOperations, got {:?}", other),
    }
}
