//! Synthetic telemetry for a small demo fleet.
//!
//! Every interval, if at least one viewer is connected, one reading per
//! vehicle is broadcast. Readings are a pure function of the wall clock so
//! successive rounds drift smoothly.

use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use fleetpulse_core::HubError;
use fleetpulse_core::models::{Location, Telemetry};
use metrics::counter;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics::SIMULATOR_READINGS_TOTAL;
use crate::websocket::hub::Hub;

/// Vehicles the simulator reports on.
pub const SIMULATED_VEHICLES: [Uuid; 4] = [
    Uuid::from_u128(0x1111_1111_1111_1111_1111_1111_1111_1111),
    Uuid::from_u128(0x2222_2222_2222_2222_2222_2222_2222_2222),
    Uuid::from_u128(0x3333_3333_3333_3333_3333_3333_3333_3333),
    Uuid::from_u128(0x4444_4444_4444_4444_4444_4444_4444_4444),
];

const BASE_LAT: f64 = 40.7128;
const BASE_LNG: f64 = -74.0060;

/// Periodic telemetry producer.
pub struct TelemetrySimulator {
    hub: Hub,
    interval: Duration,
}

impl TelemetrySimulator {
    /// Simulator publishing through `hub` every `interval`.
    pub fn new(hub: Hub, interval: Duration) -> Self {
        Self { hub, interval }
    }

    /// Run until `cancel` fires or the hub closes.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.interval, vehicles = SIMULATED_VEHICLES.len(), "telemetry simulator started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => match self.publish_round(Utc::now()).await {
                    Ok(sent) => debug!(sent, "simulated telemetry round"),
                    Err(HubError::Closed) => break,
                    Err(err) => warn!(error_kind = err.error_kind(), error = %err, "failed to publish simulated telemetry"),
                },
            }
        }
        info!("telemetry simulator stopped");
    }

    /// Broadcast one reading per vehicle, unless nobody is listening.
    /// Returns the number of readings sent.
    pub async fn publish_round(&self, now: DateTime<Utc>) -> Result<usize, HubError> {
        if self.hub.client_count() == 0 {
            return Ok(0);
        }
        for (index, vehicle_id) in SIMULATED_VEHICLES.iter().enumerate() {
            let reading = reading_for(*vehicle_id, index, now);
            self.hub.broadcast_telemetry(&reading).await?;
            counter!(SIMULATOR_READINGS_TOTAL).increment(1);
        }
        Ok(SIMULATED_VEHICLES.len())
    }
}

/// Deterministic reading for the `index`-th vehicle at `now`.
pub fn reading_for(vehicle_id: Uuid, index: usize, now: DateTime<Utc>) -> Telemetry {
    let sec = now.second();
    let min = now.minute();
    let offset = f64::from(u32::try_from(index).unwrap_or(0)) * 0.01;
    let speed = 40 + sec % 30;

    Telemetry {
        id: Uuid::now_v7(),
        vehicle_id,
        timestamp: now,
        location: Location {
            lat: BASE_LAT + offset + f64::from(sec) * 0.0001,
            lng: BASE_LNG + offset + f64::from(min) * 0.0001,
            address: None,
        },
        speed: speed as f32,
        battery_level: u8::try_from(75 + min % 20).unwrap_or(u8::MAX),
        fuel_level: None,
        engine_temp: (85 + sec % 15) as f32,
        engine_rpm: speed * 45,
        heading: ((sec * 6) % 360) as f32,
    }
}
