//! Read-only status page and JSON API

use axum::extract::State;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::state::StateHandle;

/// Dashboard application state
#[derive(Clone)]
pub struct DashboardState {
    pub state: StateHandle,
}

/// Build the dashboard axum router
pub fn build_router(state: StateHandle) -> Router {
    let dashboard_state = DashboardState { state };
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/api/status", get(status_handler))
        .route("/api/history", get(history_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(dashboard_state)
}

async fn index_handler(State(dashboard): State<DashboardState>) -> impl IntoResponse {
    let state = dashboard.state.read().await;

    let monitor_rows: String = state
        .monitors
        .iter()
        .map(|m| {
            let last_tick = match m.last_tick_epoch_ms {
                Some(ms) => format!(
                    r#"<script>document.write(new Date({}).toLocaleTimeString())</script>"#,
                    ms
                ),
                None => "Never".to_string(),
            };
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(&m.name),
                m.state,
                m.records_seen,
                m.notifications_sent,
                m.consecutive_failures,
                last_tick
            )
        })
        .collect();

    let history_rows: String = state
        .history
        .iter()
        .rev()
        .map(|h| {
            let status = if h.success { "OK" } else { "Failed" };
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(&h.monitor_name),
                escape(&h.subject),
                h.notifier_type,
                status
            )
        })
        .collect();

    let uptime = format_uptime(state.started_at.elapsed().as_secs());

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta http-equiv="refresh" content="30">
    <title>Slotwatch</title>
    <style>
        body {{ font-family: system-ui, sans-serif; max-width: 960px; margin: 0 auto; padding: 1rem; }}
        table {{ width: 100%; border-collapse: collapse; }}
        th, td {{ padding: 0.5rem; text-align: left; border-bottom: 1px solid #dee2e6; }}
    </style>
</head>
<body>
    <h1>Slotwatch</h1>
    <p>Up {uptime}</p>
    <section>
        <h2>Sessions</h2>
        <table>
            <thead><tr><th>Name</th><th>State</th><th>Slots Seen</th><th>Notifications</th><th>Failures</th><th>Last Tick</th></tr></thead>
            <tbody>{monitor_rows}</tbody>
        </table>
    </section>
    <section>
        <h2>Notification History</h2>
        <table>
            <thead><tr><th>Session</th><th>Subject</th><th>Notifier</th><th>Status</th></tr></thead>
            <tbody>{history_rows}</tbody>
        </table>
    </section>
</body>
</html>"#
    ))
}

fn format_uptime(seconds: u64) -> String {
    let (hours, minutes) = (seconds / 3600, (seconds % 3600) / 60);
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m {}s", minutes, seconds % 60)
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

async fn status_handler(State(dashboard): State<DashboardState>) -> impl IntoResponse {
    let state = dashboard.state.read().await;
    axum::Json(state.monitors.clone())
}

async fn history_handler(State(dashboard): State<DashboardState>) -> impl IntoResponse {
    let state = dashboard.state.read().await;
    axum::Json(state.history.iter().cloned().collect::<Vec<_>>())
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}
