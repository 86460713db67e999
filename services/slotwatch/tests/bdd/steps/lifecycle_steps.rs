//! Step definitions for service startup and shutdown

use std::sync::Arc;

use cucumber::{given, then, when};
use tokio_util::sync::CancellationToken;

use slotwatch::io::{HttpClient, HttpMethod};
use slotwatch::notifier::NotificationDispatcher;
use slotwatch::operation::CandidateOperation;
use slotwatch::{Config, SlotwatchBuilder};

use super::monitor_steps::{window_config, OCCASIONS_PATH};
use crate::world::{SlotwatchWorld, BASE_URL};

#[given(expr = "a service configured with one session for locations {string}")]
fn service_configured(world: &mut SlotwatchWorld, locations: String) {
    world.locations = locations.split(',').map(|l| l.trim().to_string()).collect();

    let mut config = Config::default();
    config.upstream.base_url = BASE_URL.to_string();
    config.probe.candidates = vec![CandidateOperation::new(
        "occasions",
        HttpMethod::Get,
        OCCASIONS_PATH,
        0,
    )];
    config.probe.target_working = 1;
    config.monitors = vec![window_config("watch", &world.locations)];
    config.dashboard.enabled = false;
    world.config = Some(config);
}

#[given("the service is cancelled before it starts")]
fn service_pre_cancelled(world: &mut SlotwatchWorld) {
    world.pre_cancelled = true;
}

#[when("the service runs")]
async fn service_runs(world: &mut SlotwatchWorld) {
    let config = world.config.clone().expect("service is not configured");
    let cancel = CancellationToken::new();
    if world.pre_cancelled {
        cancel.cancel();
    }

    let service = SlotwatchBuilder::new(config)
        .with_http_client(Arc::clone(&world.upstream) as Arc<dyn HttpClient>)
        .with_dispatcher(Arc::clone(&world.dispatcher) as Arc<dyn NotificationDispatcher>)
        .with_cancellation_token(cancel)
        .build()
        .await;
    let service = match service {
        Ok(service) => service,
        Err(e) => {
            world.lifecycle_result = Some(Err(e));
            return;
        }
    };

    world.state = Some(service.state());
    world.lifecycle_result = Some(service.start().await);
}

#[then("the service stopped without error")]
fn service_stopped_cleanly(world: &mut SlotwatchWorld) {
    match world.lifecycle_result.as_ref().expect("service has not run") {
        Ok(()) => {}
        Err(e) => panic!("service failed: {}", e),
    }
}

#[then("the service failed to start")]
fn service_failed(world: &mut SlotwatchWorld) {
    match world.lifecycle_result.as_ref().expect("service has not run") {
        Err(slotwatch::SlotwatchError::NoWorkingOperations { .. }) => {}
        other => panic!("expected a start failure, got {:?}", other),
    }
}
