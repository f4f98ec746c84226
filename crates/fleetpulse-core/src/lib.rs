//! # fleetpulse-core
//!
//! Shared vocabulary for the FleetPulse realtime hub.
//!
//! - **Message envelope**: [`message::Message`] with its [`message::MessageType`] tag,
//!   a timestamp and an opaque JSON payload
//! - **Client commands**: [`message::ClientCommand`], the typed view of inbound frames
//! - **Fleet payloads**: telemetry, alerts, vehicles and aggregate stats in [`models`]
//! - **Branded IDs**: [`ids::ClientId`]
//! - **Errors**: [`errors::HubError`], [`errors::ConnectionError`], [`errors::MalformedMessage`]

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod message;
pub mod models;

pub use errors::{ConnectionError, HubError, MalformedMessage};
pub use ids::ClientId;
pub use message::{ClientCommand, FleetEvent, Message, MessageType};
