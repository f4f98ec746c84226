//! The wire envelope exchanged with viewers and passed through the hub.
//!
//! Every frame on the wire is `{"type": <string>, "timestamp": <RFC3339>, "data": <opaque>}`.
//! The hub treats `data` as opaque serialized bytes: producers encode once at
//! the broadcast boundary, clients decode. Inbound frames go the other way and
//! are turned into a typed [`ClientCommand`] by the reader pump.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::errors::MalformedMessage;
use crate::models::{Alert, FleetStats, Telemetry, Vehicle};

/// Kind tag of a [`Message`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Vehicle telemetry reading.
    Telemetry,
    /// Fleet alert.
    Alert,
    /// Vehicle status update.
    Vehicle,
    /// Aggregate fleet stats.
    Stats,
    /// Client → server: add channels to the subscription set.
    Subscribe,
    /// Client → server: remove channels from the subscription set.
    Unsubscribe,
    /// Server → client keepalive.
    Ping,
    /// Client → server keepalive answer.
    Pong,
}

impl MessageType {
    /// Wire name of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Telemetry => "telemetry",
            Self::Alert => "alert",
            Self::Vehicle => "vehicle",
            Self::Stats => "stats",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed, timestamped envelope with an opaque payload. Immutable once built.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    kind: MessageType,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Box<RawValue>>,
}

impl Message {
    /// Build a message stamped with the current UTC time.
    pub fn new(kind: MessageType, data: Option<Box<RawValue>>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            data,
        }
    }

    /// Serialize `payload` and wrap it in a message of the given type.
    pub fn with_payload<T: Serialize + ?Sized>(
        kind: MessageType,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        let raw = serde_json::value::to_raw_value(payload)?;
        Ok(Self::new(kind, Some(raw)))
    }

    /// Keepalive ping. Carries no data.
    pub fn ping() -> Self {
        Self::new(MessageType::Ping, None)
    }

    /// Type tag.
    pub fn kind(&self) -> MessageType {
        self.kind
    }

    /// Raw payload bytes, if any.
    pub fn data(&self) -> Option<&RawValue> {
        self.data.as_deref()
    }

    /// Decode the payload into a concrete type.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.data
            .as_deref()
            .map(|raw| serde_json::from_str(raw.get()))
            .transpose()
    }

    /// Encode the full envelope for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Typed view of an inbound client frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    /// Add these channels to the subscription set.
    Subscribe(Vec<String>),
    /// Remove these channels from the subscription set.
    Unsubscribe(Vec<String>),
    /// Liveness answer to a ping.
    Pong,
    /// Well-formed, but not something a client may send. Dropped.
    Ignored(MessageType),
}

#[derive(Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: MessageType,
    #[serde(default)]
    data: Option<Box<RawValue>>,
}

impl ClientCommand {
    /// Parse a text frame received from a client.
    ///
    /// The timestamp is not required on inbound frames. `subscribe` and
    /// `unsubscribe` must carry a list of channel-name strings.
    pub fn parse(text: &str) -> Result<Self, MalformedMessage> {
        let frame: InboundFrame = serde_json::from_str(text).map_err(MalformedMessage::new)?;
        match frame.kind {
            MessageType::Subscribe => Ok(Self::Subscribe(channel_list(frame.data.as_deref())?)),
            MessageType::Unsubscribe => {
                Ok(Self::Unsubscribe(channel_list(frame.data.as_deref())?))
            }
            MessageType::Pong => Ok(Self::Pong),
            other => Ok(Self::Ignored(other)),
        }
    }
}

fn channel_list(data: Option<&RawValue>) -> Result<Vec<String>, MalformedMessage> {
    let raw = data.ok_or_else(|| MalformedMessage::new("missing channel list"))?;
    serde_json::from_str(raw.get()).map_err(MalformedMessage::new)
}

/// Producer-side event, statically typed until it reaches the hub.
#[derive(Clone, Debug, PartialEq)]
pub enum FleetEvent {
    /// New telemetry reading.
    Telemetry(Telemetry),
    /// Alert raised or changed.
    Alert(Alert),
    /// Vehicle state changed.
    Vehicle(Vehicle),
    /// Fresh aggregate stats.
    Stats(FleetStats),
}

impl FleetEvent {
    /// Wire type this event is broadcast under.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Telemetry(_) => MessageType::Telemetry,
            Self::Alert(_) => MessageType::Alert,
            Self::Vehicle(_) => MessageType::Vehicle,
            Self::Stats(_) => MessageType::Stats,
        }
    }

    /// Serialize into an envelope.
    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        let kind = self.message_type();
        match self {
            Self::Telemetry(t) => Message::with_payload(kind, t),
            Self::Alert(a) => Message::with_payload(kind, a),
            Self::Vehicle(v) => Message::with_payload(kind, v),
            Self::Stats(s) => Message::with_payload(kind, s),
        }
    }
}
