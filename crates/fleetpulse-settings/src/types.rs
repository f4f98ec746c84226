//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial JSON
//! is accepted and missing fields keep their compiled default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Upper bound for the keepalive period and the simulator interval.
pub const MAX_INTERVAL_SECS: u64 = 3600;
/// Upper bound for the write and idle timeouts.
pub const MAX_TIMEOUT_SECS: u64 = 86_400;
/// Upper bound for queue capacities.
pub const MAX_CAPACITY: usize = 1 << 20;

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FleetSettings {
    /// HTTP/WebSocket listener.
    pub server: ServerSettings,
    /// Hub queue sizes and timers.
    pub hub: HubSettings,
    /// Synthetic telemetry producer.
    pub simulator: SimulatorSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl FleetSettings {
    /// Reject values the hub cannot run with. Timers are bounded so that
    /// `Instant + period` cannot overflow.
    pub fn validate(&self) -> Result<()> {
        let hub = &self.hub;
        let sim = &self.simulator;
        let checks = [
            (
                !(1..=MAX_CAPACITY).contains(&hub.broadcast_capacity),
                "hub.broadcastCapacity must be in 1..=1048576",
            ),
            (
                !(1..=MAX_CAPACITY).contains(&hub.mailbox_capacity),
                "hub.mailboxCapacity must be in 1..=1048576",
            ),
            (
                !(1..=MAX_INTERVAL_SECS).contains(&hub.ping_interval_secs),
                "hub.pingIntervalSecs must be in 1..=3600",
            ),
            (
                !(1..=MAX_TIMEOUT_SECS).contains(&hub.write_timeout_secs),
                "hub.writeTimeoutSecs must be in 1..=86400",
            ),
            (
                hub.idle_timeout_secs > MAX_TIMEOUT_SECS,
                "hub.idleTimeoutSecs must be <= 86400",
            ),
            (
                sim.enabled && !(1..=MAX_INTERVAL_SECS).contains(&sim.interval_secs),
                "simulator.intervalSecs must be in 1..=3600",
            ),
            (
                self.server.shutdown_timeout_secs > MAX_TIMEOUT_SECS,
                "server.shutdownTimeoutSecs must be <= 86400",
            ),
        ];
        match checks.iter().find(|(bad, _)| *bad) {
            Some((_, msg)) => Err(SettingsError::InvalidValue((*msg).to_string())),
            None => Ok(()),
        }
    }
}

/// Network listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port. `0` picks a free port.
    pub port: u16,
    /// `development` or `production`; selects the default log format.
    pub environment: String,
    /// Allowed CORS origins. `["*"]` allows any.
    pub cors_allowed_origins: Vec<String>,
    /// How long to wait for tasks to drain on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            environment: "development".into(),
            cors_allowed_origins: vec!["*".into()],
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerSettings {
    /// Whether this is a development deployment.
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Shutdown grace period.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Hub queue sizes and timers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Capacity of the shared broadcast queue.
    pub broadcast_capacity: usize,
    /// Capacity of each client's outbound mailbox.
    pub mailbox_capacity: usize,
    /// Keepalive ping period.
    pub ping_interval_secs: u64,
    /// Per-write budget on a client connection.
    pub write_timeout_secs: u64,
    /// Max silence on a client connection, transport pongs included, before
    /// the reader gives up. `0`, the default, disables it.
    pub idle_timeout_secs: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
            mailbox_capacity: 64,
            ping_interval_secs: 30,
            write_timeout_secs: 10,
            idle_timeout_secs: 0,
        }
    }
}

impl HubSettings {
    /// Keepalive ping period.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Per-write budget.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Reader idle deadline, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

/// Synthetic telemetry producer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulatorSettings {
    /// Run the simulator at all.
    pub enabled: bool,
    /// Seconds between telemetry rounds.
    pub interval_secs: u64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3,
        }
    }
}

impl SimulatorSettings {
    /// Period between rounds.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Output format for log lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (`info`, `debug`, `fleetpulse_server=trace`, ...).
    pub level: String,
    /// Explicit format. When absent, development uses compact and production uses JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<LogFormat>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: None,
        }
    }
}

impl LoggingSettings {
    /// Format to use given the deployment environment.
    pub fn effective_format(&self, server: &ServerSettings) -> LogFormat {
        self.format.unwrap_or(if server.is_development() {
            LogFormat::Compact
        } else {
            LogFormat::Json
        })
    }
}
