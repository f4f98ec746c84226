//! Per-client reader and writer tasks.
//!
//! Each accepted connection gets exactly two tasks:
//!
//! - the **writer** drains the mailbox onto the connection, one frame per
//!   message with a write deadline, and owns closing the connection. Each
//!   keepalive is followed by a transport ping.
//! - the **reader** consumes inbound frames, updates subscriptions and pong
//!   liveness, and ignores anything it cannot parse. When an idle deadline is
//!   configured, transport pongs count as traffic, so a viewer that only
//!   listens stays connected.
//!
//! Either pump hitting a terminal condition moves the client to `Closing` and
//! asks the hub to unregister it. Unregistration closes the mailbox, which
//! ends the writer; a failed writer also cancels the reader directly.

use std::sync::Arc;
use std::time::Duration;

use fleetpulse_core::{ClientCommand, ClientId, ConnectionError, HubError, MessageType};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::client::{Client, ClientShared, Mailbox};
use super::connection::{Connection, FrameReader, FrameWriter, InboundFrame};
use super::hub::Hub;
use crate::config::PumpConfig;

/// Why the writer pump stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriterExit {
    /// The hub closed the mailbox (unregister, eviction or shutdown).
    MailboxClosed,
    /// Writing a frame failed or exceeded the write deadline.
    WriteFailed(ConnectionError),
}

/// Why the reader pump stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReaderExit {
    /// The peer closed the connection.
    PeerClosed,
    /// Reading failed.
    ReadFailed(ConnectionError),
    /// Nothing arrived within the idle deadline.
    IdleTimeout,
    /// The writer gave up first.
    Cancelled,
}

/// Handles on a served connection's pumps.
pub struct ClientTasks {
    /// Client identity.
    pub id: ClientId,
    /// State shared with the hub's registry entry.
    pub shared: Arc<ClientShared>,
    /// Writer pump.
    pub writer: JoinHandle<WriterExit>,
    /// Reader pump.
    pub reader: JoinHandle<ReaderExit>,
}

/// Register a new client for `connection` and start its pumps.
///
/// On [`HubError::Closed`] the connection is closed and no tasks are started.
pub async fn serve_connection<C: Connection>(
    hub: Hub,
    connection: C,
    config: &PumpConfig,
) -> Result<ClientTasks, HubError> {
    let (client, mailbox) = Client::new(ClientId::new(), hub.mailbox_capacity());
    let id = client.id().clone();
    let shared = client.shared();
    let (reader, mut writer) = connection.split();

    if let Err(err) = hub.register(client).await {
        let _ = writer.close().await;
        return Err(err);
    }

    let done = CancellationToken::new();
    let writer = tokio::spawn(run_writer(
        hub.clone(),
        Arc::clone(&shared),
        mailbox,
        writer,
        config.write_timeout,
        done.clone(),
    ));
    let reader = tokio::spawn(run_reader(
        hub,
        Arc::clone(&shared),
        reader,
        config.idle_timeout,
        done,
    ));

    Ok(ClientTasks {
        id,
        shared,
        writer,
        reader,
    })
}

/// Drain `mailbox` onto `writer` until the mailbox closes or a write fails.
pub async fn run_writer<W: FrameWriter>(
    hub: Hub,
    client: Arc<ClientShared>,
    mut mailbox: Mailbox,
    mut writer: W,
    write_timeout: Duration,
    done: CancellationToken,
) -> WriterExit {
    let exit = loop {
        let Some(message) = mailbox.recv().await else {
            break WriterExit::MailboxClosed;
        };
        let frame = match message.to_json() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(client_id = %client.id(), error = %err, "failed to encode message, skipping");
                continue;
            }
        };
        if let Err(err) = write_message(&mut writer, message.kind(), frame, write_timeout).await {
            warn!(client_id = %client.id(), error_kind = err.error_kind(), error = %err, "websocket write failed");
            break WriterExit::WriteFailed(err);
        }
    };

    let _ = client.begin_closing();
    hub.unregister(client.id());
    done.cancel();
    if let Err(err) = writer.close().await {
        debug!(client_id = %client.id(), error = %err, "error closing connection");
    }
    exit
}

/// Write one encoded message within `limit`. A keepalive also sends a
/// transport ping, which the peer's stack answers without application code.
async fn write_message<W: FrameWriter>(
    writer: &mut W,
    kind: MessageType,
    frame: String,
    limit: Duration,
) -> Result<(), ConnectionError> {
    let write = async {
        writer.write_frame(frame).await?;
        if kind == MessageType::Ping {
            writer.write_ping().await?;
        }
        Ok::<(), ConnectionError>(())
    };
    time::timeout(limit, write)
        .await
        .unwrap_or(Err(ConnectionError::Timeout(limit)))
}

/// Consume inbound frames until the peer goes away, the idle deadline
/// passes, a read fails, or `done` is cancelled.
pub async fn run_reader<R: FrameReader>(
    hub: Hub,
    client: Arc<ClientShared>,
    mut reader: R,
    idle_timeout: Option<Duration>,
    done: CancellationToken,
) -> ReaderExit {
    let exit = loop {
        let next = tokio::select! {
            () = done.cancelled() => break ReaderExit::Cancelled,
            next = read_with_deadline(&mut reader, idle_timeout) => next,
        };
        match next {
            Ok(Some(InboundFrame::Text(text))) => handle_frame(&client, &text),
            Ok(Some(InboundFrame::Heartbeat)) => trace!(client_id = %client.id(), "transport heartbeat"),
            Ok(None) => break ReaderExit::PeerClosed,
            Err(ConnectionError::Timeout(_)) => {
                debug!(client_id = %client.id(), "client idle, closing");
                break ReaderExit::IdleTimeout;
            }
            Err(err) => {
                debug!(client_id = %client.id(), error_kind = err.error_kind(), error = %err, "websocket read failed");
                break ReaderExit::ReadFailed(err);
            }
        }
    };

    let _ = client.begin_closing();
    hub.unregister(client.id());
    exit
}

async fn read_with_deadline<R: FrameReader>(
    reader: &mut R,
    idle_timeout: Option<Duration>,
) -> Result<Option<InboundFrame>, ConnectionError> {
    match idle_timeout {
        Some(limit) => time::timeout(limit, reader.read_frame())
            .await
            .unwrap_or(Err(ConnectionError::Timeout(limit))),
        None => reader.read_frame().await,
    }
}

/// Apply one inbound frame to the client's state.
pub fn handle_frame(client: &ClientShared, text: &str) {
    match ClientCommand::parse(text) {
        Ok(ClientCommand::Subscribe(channels)) => {
            let added = client.subscribe(channels);
            debug!(client_id = %client.id(), added, "client subscribed");
        }
        Ok(ClientCommand::Unsubscribe(channels)) => {
            let removed = client.unsubscribe(&channels);
            debug!(client_id = %client.id(), removed, "client unsubscribed");
        }
        Ok(ClientCommand::Pong) => {
            client.record_pong();
            debug!(client_id = %client.id(), "received pong");
        }
        Ok(ClientCommand::Ignored(kind)) => {
            trace!(client_id = %client.id(), %kind, "ignoring client message");
        }
        Err(err) => {
            trace!(client_id = %client.id(), error = %err, "ignoring malformed client message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::websocket::client::ClientState;
    use crate::websocket::connection::memory::{Outbound, Peer, WriteMode, pair};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn start_hub() -> (Hub, CancellationToken) {
        let cancel = CancellationToken::new();
        let (hub, dispatcher) = Hub::new(&HubConfig::default(), cancel.clone());
        let _ = tokio::spawn(dispatcher.run());
        (hub, cancel)
    }

    async fn connect(hub: &Hub, mode: WriteMode, config: &PumpConfig) -> (ClientTasks, Peer) {
        let (conn, peer) = pair(mode);
        let tasks = serve_connection(hub.clone(), conn, config).await.unwrap();
        (tasks, peer)
    }

    async fn recv(peer: &mut Peer) -> Outbound {
        timeout(WAIT, peer.from_server.recv())
            .await
            .expect("peer recv timed out")
            .expect("server side dropped")
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        timeout(WAIT, async {
            while !check() {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition never held");
    }

    fn wire(out: Outbound) -> serde_json::Value {
        match out {
            Outbound::Frame(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    /// Expect one keepalive: the JSON ping frame, then the transport ping.
    async fn expect_keepalive(peer: &mut Peer) {
        let frame = timeout(Duration::from_secs(31), peer.from_server.recv())
            .await
            .expect("no keepalive within one interval")
            .expect("server side dropped");
        assert_eq!(wire(frame)["type"], "ping");
        assert_eq!(recv(peer).await, Outbound::Ping);
    }

    #[test]
    fn subscribe_twice_then_unsubscribe_once() {
        let (client, _rx) = Client::new(ClientId::new(), 1);
        let shared = client.shared();

        handle_frame(&shared, r#"{"type":"subscribe","data":["telemetry"]}"#);
        handle_frame(&shared, r#"{"type":"subscribe","data":["telemetry"]}"#);
        assert_eq!(shared.subscriptions(), vec!["telemetry"]);

        handle_frame(&shared, r#"{"type":"unsubscribe","data":["telemetry"]}"#);
        assert!(!shared.is_subscribed("telemetry"));
    }

    #[test]
    fn garbage_frames_change_nothing() {
        let (client, _rx) = Client::new(ClientId::new(), 1);
        let shared = client.shared();

        handle_frame(&shared, "not json at all");
        handle_frame(&shared, r#"{"type":"subscribe","data":"telemetry"}"#);
        handle_frame(&shared, r#"{"type":"telemetry","data":{}}"#);
        assert!(shared.subscriptions().is_empty());
        assert!(shared.last_pong().is_none());
        assert_eq!(shared.state(), ClientState::Connected);
    }

    #[test]
    fn pong_records_liveness() {
        let (client, _rx) = Client::new(ClientId::new(), 1);
        let shared = client.shared();
        handle_frame(&shared, r#"{"type":"pong"}"#);
        assert!(shared.last_pong().is_some());
    }

    #[tokio::test]
    async fn broadcast_is_written_to_connection() {
        let (hub, _cancel) = start_hub();
        let (_tasks, mut peer) = connect(&hub, WriteMode::Normal, &PumpConfig::default()).await;

        hub.broadcast(
            MessageType::Telemetry,
            &serde_json::json!({ "vehicleId": "V1", "speed": 42 }),
        )
        .await
        .unwrap();

        let value = wire(recv(&mut peer).await);
        assert_eq!(value["type"], "telemetry");
        assert_eq!(value["data"]["vehicleId"], "V1");
        assert_eq!(value["data"]["speed"], 42);
    }

    #[tokio::test]
    async fn reader_applies_commands_and_survives_garbage() {
        let (hub, _cancel) = start_hub();
        let (tasks, peer) = connect(&hub, WriteMode::Normal, &PumpConfig::default()).await;

        peer.send_text("{{{{");
        peer.send_text(r#"{"type":"subscribe","data":["alert","telemetry"]}"#);
        peer.send_text(r#"{"type":"unsubscribe","data":["alert"]}"#);
        peer.send_text(r#"{"type":"pong"}"#);

        let shared = Arc::clone(&tasks.shared);
        eventually(|| shared.last_pong().is_some()).await;
        assert_eq!(tasks.shared.subscriptions(), vec!["telemetry"]);
        assert_eq!(hub.client_count(), 1);
        assert!(!tasks.reader.is_finished());
    }

    #[tokio::test]
    async fn peer_close_unregisters_and_closes_connection() {
        let (hub, _cancel) = start_hub();
        let (tasks, mut peer) = connect(&hub, WriteMode::Normal, &PumpConfig::default()).await;
        assert_eq!(hub.client_count(), 1);

        // Dropping the inbound sender ends the stream cleanly
        let (dead, _) = mpsc::unbounded_channel();
        peer.to_server = dead;

        assert_eq!(timeout(WAIT, tasks.reader).await.unwrap().unwrap(), ReaderExit::PeerClosed);
        assert_eq!(
            timeout(WAIT, tasks.writer).await.unwrap().unwrap(),
            WriterExit::MailboxClosed
        );
        assert_eq!(recv(&mut peer).await, Outbound::Closed);
        assert_eq!(hub.client_count(), 0);
        assert_eq!(tasks.shared.state(), ClientState::Closed);
    }

    #[tokio::test]
    async fn read_error_ends_reader() {
        let (hub, _cancel) = start_hub();
        let (tasks, peer) = connect(&hub, WriteMode::Normal, &PumpConfig::default()).await;

        let _ = peer.to_server.send(Err(ConnectionError::transport("reset by peer")));
        let exit = timeout(WAIT, tasks.reader).await.unwrap().unwrap();
        assert!(matches!(exit, ReaderExit::ReadFailed(ConnectionError::Transport(_))));
        eventually(|| hub.client_count() == 0).await;
    }

    #[tokio::test]
    async fn write_failure_cancels_reader_and_unregisters() {
        let (hub, _cancel) = start_hub();
        let (tasks, mut peer) = connect(&hub, WriteMode::Fail, &PumpConfig::default()).await;

        hub.broadcast(MessageType::Alert, &serde_json::json!({})).await.unwrap();

        let writer_exit = timeout(WAIT, tasks.writer).await.unwrap().unwrap();
        assert!(matches!(writer_exit, WriterExit::WriteFailed(ConnectionError::Transport(_))));
        assert_eq!(
            timeout(WAIT, tasks.reader).await.unwrap().unwrap(),
            ReaderExit::Cancelled
        );
        assert_eq!(recv(&mut peer).await, Outbound::Closed);
        eventually(|| hub.client_count() == 0).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_times_out() {
        let (hub, _cancel) = start_hub();
        let config = PumpConfig {
            write_timeout: Duration::from_secs(10),
            idle_timeout: None,
        };
        let (tasks, _peer) = connect(&hub, WriteMode::Stall, &config).await;

        hub.broadcast(MessageType::Vehicle, &serde_json::json!({})).await.unwrap();

        let exit = timeout(Duration::from_secs(11), tasks.writer).await.unwrap().unwrap();
        assert_eq!(
            exit,
            WriterExit::WriteFailed(ConnectionError::Timeout(Duration::from_secs(10)))
        );
        eventually(|| hub.client_count() == 0).await;
    }

    #[tokio::test(start_paused = true)]
    async fn listen_only_viewer_keeps_receiving_pings() {
        let (hub, _cancel) = start_hub();
        let (tasks, mut peer) = connect(&hub, WriteMode::Normal, &PumpConfig::default()).await;

        for _ in 0..6 {
            expect_keepalive(&mut peer).await;
        }
        assert_eq!(hub.client_count(), 1);
        assert!(!tasks.reader.is_finished());
        assert_eq!(tasks.shared.state(), ClientState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_pongs_keep_idle_deadline_fresh() {
        let (hub, _cancel) = start_hub();
        let config = PumpConfig {
            write_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(45)),
        };
        let (tasks, mut peer) = connect(&hub, WriteMode::Normal, &config).await;

        for _ in 0..4 {
            expect_keepalive(&mut peer).await;
            peer.send_heartbeat();
        }
        assert_eq!(hub.client_count(), 1);
        assert!(!tasks.reader.is_finished());

        // Stop answering: the next deadline is 45 s after the last pong
        let exit = timeout(Duration::from_secs(46), tasks.reader).await.unwrap().unwrap();
        assert_eq!(exit, ReaderExit::IdleTimeout);
        eventually(|| hub.client_count() == 0).await;
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_transport_pings_hit_idle_timeout() {
        let (hub, _cancel) = start_hub();
        let config = PumpConfig {
            write_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(45)),
        };
        let (tasks, mut peer) = connect(&hub, WriteMode::Normal, &config).await;

        let exit = timeout(Duration::from_secs(46), tasks.reader).await.unwrap().unwrap();
        assert_eq!(exit, ReaderExit::IdleTimeout);

        expect_keepalive(&mut peer).await;
        assert_eq!(recv(&mut peer).await, Outbound::Closed);
    }

    #[tokio::test]
    async fn hub_shutdown_closes_connections() {
        let (hub, cancel) = start_hub();
        let (tasks, mut peer) = connect(&hub, WriteMode::Normal, &PumpConfig::default()).await;

        cancel.cancel();

        assert_eq!(
            timeout(WAIT, tasks.writer).await.unwrap().unwrap(),
            WriterExit::MailboxClosed
        );
        assert_eq!(recv(&mut peer).await, Outbound::Closed);
        assert_eq!(
            timeout(WAIT, tasks.reader).await.unwrap().unwrap(),
            ReaderExit::Cancelled
        );
    }

    #[tokio::test]
    async fn serve_after_shutdown_is_refused() {
        let (hub, cancel) = start_hub();
        cancel.cancel();

        let (conn, mut peer) = pair(WriteMode::Normal);
        let result = serve_connection(hub, conn, &PumpConfig::default()).await;
        assert!(matches!(result, Err(HubError::Closed)));
        assert_eq!(recv(&mut peer).await, Outbound::Closed);
    }
}
