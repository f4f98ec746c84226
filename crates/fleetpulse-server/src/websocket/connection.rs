//! Duplex text-frame stream the pumps run on.
//!
//! The pumps only see [`FrameReader`] and [`FrameWriter`]. The axum
//! [`WebSocket`] is the production implementation.
//!
//! Transport control frames are surfaced as [`InboundFrame::Heartbeat`] so
//! the reader's idle deadline tracks transport liveness, not application
//! traffic. Browsers answer control pings on their own.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, close_code};
use fleetpulse_core::ConnectionError;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tracing::trace;

/// One unit of inbound traffic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    /// Application text frame.
    Text(String),
    /// Transport-level ping or pong. Carries nothing but proof of life.
    Heartbeat,
}

/// Inbound half of a connection.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Next inbound frame. `Ok(None)` means the peer closed cleanly.
    async fn read_frame(&mut self) -> Result<Option<InboundFrame>, ConnectionError>;
}

/// Outbound half of a connection.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    /// Write one text frame.
    async fn write_frame(&mut self, frame: String) -> Result<(), ConnectionError>;

    /// Send a transport-level ping the peer's stack answers with a pong.
    async fn write_ping(&mut self) -> Result<(), ConnectionError>;

    /// Send a close frame and shut the stream down.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// A connection that can be split into independently owned halves.
pub trait Connection: Send + 'static {
    /// Inbound half.
    type Reader: FrameReader;
    /// Outbound half.
    type Writer: FrameWriter;

    /// Split into reader and writer.
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Inbound half of an axum WebSocket.
pub struct WsReader(SplitStream<WebSocket>);

/// Outbound half of an axum WebSocket.
pub struct WsWriter(SplitSink<WebSocket, WsMessage>);

impl Connection for WebSocket {
    type Reader = WsReader;
    type Writer = WsWriter;

    fn split(self) -> (WsReader, WsWriter) {
        let (sink, stream) = StreamExt::split(self);
        (WsReader(stream), WsWriter(sink))
    }
}

#[async_trait]
impl FrameReader for WsReader {
    async fn read_frame(&mut self) -> Result<Option<InboundFrame>, ConnectionError> {
        let frame = match self.0.next().await {
            None | Some(Ok(WsMessage::Close(_))) => return Ok(None),
            Some(Err(err)) => return Err(ConnectionError::transport(err)),
            Some(Ok(WsMessage::Text(text))) => InboundFrame::Text(text.as_str().to_owned()),
            Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => InboundFrame::Text(text),
                Err(_) => {
                    trace!("dropping non-UTF-8 binary frame");
                    InboundFrame::Heartbeat
                }
            },
            // Pings are answered by the protocol layer
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => InboundFrame::Heartbeat,
        };
        Ok(Some(frame))
    }
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn write_frame(&mut self, frame: String) -> Result<(), ConnectionError> {
        self.0
            .send(WsMessage::Text(frame.into()))
            .await
            .map_err(ConnectionError::transport)
    }

    async fn write_ping(&mut self) -> Result<(), ConnectionError> {
        self.0
            .send(WsMessage::Ping(vec![].into()))
            .await
            .map_err(ConnectionError::transport)
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        };
        // The peer may already be gone; closing the sink still matters.
        let _ = self.0.send(WsMessage::Close(Some(frame))).await;
        self.0.close().await.map_err(ConnectionError::transport)
    }
}
