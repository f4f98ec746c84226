//! Runtime configuration for the hub and the per-client pumps.

use std::time::Duration;

use fleetpulse_settings::HubSettings;

/// Default capacity of the shared broadcast queue.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;
/// Default capacity of each client mailbox.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;
/// Default keepalive period.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
/// Default budget for a single frame write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Hub dispatcher configuration.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Broadcast queue capacity. Producers wait when it is full.
    pub broadcast_capacity: usize,
    /// Per-client mailbox capacity. A full mailbox gets the client evicted.
    pub mailbox_capacity: usize,
    /// Period of the keepalive ping fan-out.
    pub ping_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }
}

impl From<&HubSettings> for HubConfig {
    fn from(settings: &HubSettings) -> Self {
        Self {
            broadcast_capacity: settings.broadcast_capacity,
            mailbox_capacity: settings.mailbox_capacity,
            ping_interval: settings.ping_interval(),
        }
    }
}

/// Reader/writer pump configuration.
#[derive(Clone, Copy, Debug)]
pub struct PumpConfig {
    /// Budget for writing one frame.
    pub write_timeout: Duration,
    /// How long the reader waits for any inbound frame, transport pongs
    /// included. `None`, the default, waits forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            idle_timeout: None,
        }
    }
}

impl From<&HubSettings> for PumpConfig {
    fn from(settings: &HubSettings) -> Self {
        Self {
            write_timeout: settings.write_timeout(),
            idle_timeout: settings.idle_timeout(),
        }
    }
}
