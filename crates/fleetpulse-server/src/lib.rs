//! # fleetpulse-server
//!
//! Realtime fan-out of fleet events to connected viewers.
//!
//! - [`websocket::hub`]: the single dispatcher that owns the client registry,
//!   serializes broadcasts, evicts slow consumers and sends keepalive pings
//! - [`websocket::pump`]: the reader and writer task pair behind every client
//! - [`websocket::connection`]: the duplex-stream abstraction the pumps run on
//! - [`server`]: axum router with the WebSocket upgrade and health endpoints
//! - [`simulator`]: synthetic telemetry producer
//! - [`shutdown`]: `CancellationToken`-based shutdown coordination

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod simulator;
pub mod websocket;

pub use config::{HubConfig, PumpConfig};
pub use server::FleetServer;
pub use shutdown::ShutdownCoordinator;
pub use websocket::hub::{Dispatcher, Hub};
