//! # fleetpulse
//!
//! Realtime fleet server binary: loads settings, starts the hub dispatcher,
//! the telemetry simulator and the HTTP/WebSocket listener, then waits for a
//! signal and shuts everything down in order.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use fleetpulse_server::config::{HubConfig, PumpConfig};
use fleetpulse_server::server::FleetServer;
use fleetpulse_server::shutdown::{ShutdownCoordinator, wait_for_signal};
use fleetpulse_server::simulator::TelemetrySimulator;
use fleetpulse_server::websocket::hub::Hub;
use fleetpulse_settings::FleetSettings;
use tracing::{info, warn};

/// FleetPulse realtime server.
#[derive(Parser, Debug)]
#[command(name = "fleetpulse", about = "FleetPulse realtime fleet server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file. Defaults to `~/.fleetpulse/settings.json`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `fleetpulse_server=trace`.
    #[arg(long)]
    log_level: Option<String>,

    /// Do not start the telemetry simulator.
    #[arg(long)]
    no_simulator: bool,

    /// Do not install the Prometheus recorder.
    #[arg(long)]
    no_metrics: bool,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(fleetpulse_settings::settings_path)
    }

    /// Flags win over file and env values.
    fn apply(&self, settings: &mut FleetSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.no_simulator {
            settings.simulator.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.settings_path();
    let mut settings = fleetpulse_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);

    fleetpulse_logging::init_logging(&settings.logging, &settings.server, cli.log_level.as_deref());

    let coordinator = ShutdownCoordinator::new();
    let (hub, dispatcher) = Hub::new(&HubConfig::from(&settings.hub), coordinator.child_token());
    let mut handles = vec![tokio::spawn(dispatcher.run())];

    if settings.simulator.enabled {
        let simulator = TelemetrySimulator::new(hub.clone(), settings.simulator.interval());
        handles.push(tokio::spawn(simulator.run(coordinator.child_token())));
    } else {
        info!("telemetry simulator disabled");
    }

    let mut server = FleetServer::new(
        settings.server.clone(),
        hub,
        PumpConfig::from(&settings.hub),
        coordinator.token(),
    );
    if cli.no_metrics {
        info!("metrics disabled");
    } else {
        match fleetpulse_server::metrics::install_recorder() {
            Ok(handle) => server = server.with_metrics(handle),
            Err(err) => warn!(error = %err, "failed to install metrics recorder, /metrics disabled"),
        }
    }

    let (addr, serve) = server.listen().await.context("Failed to bind server")?;
    handles.push(serve);
    info!(
        "FleetPulse listening on http://{addr} (ws://{addr}/ws, environment {})",
        settings.server.environment
    );

    wait_for_signal().await;
    info!("Shutting down...");
    let drained = coordinator
        .graceful_shutdown(handles, Some(settings.server.shutdown_timeout()))
        .await;
    info!(drained, "Shutdown complete");
    Ok(())
}
