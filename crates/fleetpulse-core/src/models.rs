//! Fleet payloads carried inside broadcast messages.
//!
//! These are the producer-facing types. The hub never inspects them: they are
//! serialized once at the broadcast boundary and travel as opaque JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Geographic position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Human-readable address, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Operational state of a vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleStatus {
    /// On the road.
    Active,
    /// In the workshop.
    Maintenance,
    /// Parked, engine off.
    Idle,
    /// Plugged in.
    Charging,
}

/// Alert priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Needs immediate attention.
    Critical,
    /// Should be looked at soon.
    Warning,
    /// Informational only.
    Info,
}

/// Alert lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Raised and not yet handled.
    Active,
    /// Seen by an operator.
    Acknowledged,
    /// Closed.
    Resolved,
}

/// One real-time reading from a vehicle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub id: Uuid,
    pub vehicle_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub location: Location,
    /// km/h
    pub speed: f32,
    /// 0-100
    pub battery_level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel_level: Option<u8>,
    /// Celsius
    pub engine_temp: f32,
    pub engine_rpm: u32,
    /// Degrees from north.
    pub heading: f32,
}

/// Current state of a fleet vehicle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: Uuid,
    pub vin: String,
    pub name: String,
    pub model: String,
    pub brand: String,
    pub status: VehicleStatus,
    pub battery_level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel_level: Option<u8>,
    /// Remaining range in km.
    pub range: u32,
    pub location: Location,
    pub speed: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<Uuid>,
    pub temperature: f32,
    /// km
    pub odometer: u64,
    pub efficiency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A fleet alert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<Uuid>,
    /// Free-form kind, e.g. `fuel_low`, `speed_excess`, `geofence_exit`.
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Aggregate fleet statistics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetStats {
    pub active_vehicles: u32,
    pub total_vehicles: u32,
    pub critical_alerts: u32,
    pub total_distance_km: f64,
    pub avg_efficiency: f64,
    pub vehicles_charging: u32,
    pub timestamp: DateTime<Utc>,
}
