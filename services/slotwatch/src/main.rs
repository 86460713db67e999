//! Slotwatch CLI
//!
//! Command-line interface for the availability slot monitor.

use std::path::PathBuf;

use clap::Parser;
use slotwatch::{load_config, Config, SlotwatchBuilder};
use tracing::Level;

#[derive(Parser)]
#[command(name = "slotwatch")]
#[command(about = "Watches a booking site for newly released slots and sends notifications")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dashboard port (overrides config file)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: Level,

    /// Validate the configuration, list the sessions it defines, and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    tracing::debug!(
        "Parsed command line arguments: config={:?}, dashboard_port={:?}, log_level={:?}",
        args.config,
        args.dashboard_port,
        args.log_level
    );

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    config.resolve_secrets()?;

    if let Some(dashboard_port) = args.dashboard_port {
        config.dashboard.port = dashboard_port;
    }

    if args.check {
        config.validate()?;
        for line in session_summaries(&config) {
            println!("{}", line);
        }
        println!(
            "Configuration OK: {} session(s), {} candidate operation(s)",
            config.monitors.len(),
            config.probe.candidates.len()
        );
        return Ok(());
    }

    tracing::info!("Starting slotwatch service against {}", config.upstream.base_url);
    for line in session_summaries(&config) {
        tracing::info!("Session {}", line);
    }
    tracing::debug!(
        "Notifiers: {}, Candidates: {}",
        config.notifiers.len(),
        config.probe.candidates.len()
    );

    SlotwatchBuilder::new(config).build().await?.start().await?;

    Ok(())
}

/// One line per configured session: name, locations, date window and cadence
fn session_summaries(config: &Config) -> Vec<String> {
    config
        .monitors
        .iter()
        .map(|m| {
            format!(
                "'{}': [{}] {}..{} category {}, every {}s",
                m.name,
                m.locations.join(", "),
                m.from_date,
                m.to_date,
                m.category,
                m.poll_interval_seconds
            )
        })
        .collect()
}
