//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup. Fails if another recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket clients registered (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket clients removed from the registry (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Currently registered clients (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Messages taken off the broadcast queue (counter).
pub const HUB_BROADCASTS_TOTAL: &str = "hub_broadcasts_total";
/// Clients evicted for a full mailbox (counter).
pub const HUB_EVICTIONS_TOTAL: &str = "hub_evictions_total";
/// Keepalive rounds (counter).
pub const HUB_PINGS_TOTAL: &str = "hub_pings_total";
/// Simulated telemetry readings published (counter).
pub const SIMULATOR_READINGS_TOTAL: &str = "simulator_readings_total";
