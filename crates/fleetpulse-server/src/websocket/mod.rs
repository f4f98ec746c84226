//! WebSocket fan-out: the hub, its clients, and the pumps that move frames.

pub mod client;
pub mod connection;
pub mod hub;
pub mod pump;
