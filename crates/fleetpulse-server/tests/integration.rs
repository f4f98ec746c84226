//! End-to-end tests over a real socket with a real WebSocket client.

use std::time::Duration;

use fleetpulse_core::MessageType;
use fleetpulse_server::config::{HubConfig, PumpConfig};
use fleetpulse_server::server::FleetServer;
use fleetpulse_server::websocket::hub::Hub;
use fleetpulse_settings::ServerSettings;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    url: String,
    hub: Hub,
    cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
}

/// Boot a server on an ephemeral port.
async fn boot_server() -> TestServer {
    boot_server_with(HubConfig::default()).await
}

async fn boot_server_with(config: HubConfig) -> TestServer {
    let cancel = CancellationToken::new();
    let (hub, dispatcher) = Hub::new(&config, cancel.clone());
    let dispatcher = tokio::spawn(dispatcher.run());

    let settings = ServerSettings {
        host: "127.0.0.1".into(),
        port: 0,
        ..ServerSettings::default()
    };
    let server = FleetServer::new(settings, hub.clone(), PumpConfig::default(), cancel.clone());
    let (addr, _serve) = server.listen().await.unwrap();

    TestServer {
        url: format!("ws://{addr}"),
        hub,
        cancel,
        dispatcher,
    }
}

async fn connect(server: &TestServer, path: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(format!("{}{path}", server.url)))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    wait_for_clients(&server.hub, |n| n >= 1).await;
    ws
}

async fn wait_for_clients(hub: &Hub, check: impl Fn(usize) -> bool) {
    timeout(TIMEOUT, async {
        while !check(hub.client_count()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client count never settled");
}

/// Next text frame, parsed as JSON. Skips control frames.
async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("read timed out")
            .expect("stream ended")
            .expect("read failed");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn telemetry_broadcast_reaches_websocket_client() {
    let server = boot_server().await;
    let mut ws = connect(&server, "/ws").await;

    server
        .hub
        .broadcast(MessageType::Telemetry, &json!({ "vehicleId": "V1", "speed": 42 }))
        .await
        .unwrap();

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "telemetry");
    assert_eq!(frame["data"]["vehicleId"], "V1");
    assert_eq!(frame["data"]["speed"], 42);
    assert!(frame["timestamp"].is_string());
}

#[tokio::test]
async fn every_client_gets_every_broadcast_in_order() {
    let server = boot_server().await;
    let mut a = connect(&server, "/ws").await;
    let mut b = connect(&server, "/ws/telemetry").await;
    wait_for_clients(&server.hub, |n| n == 2).await;

    for seq in 0..5 {
        server
            .hub
            .broadcast(MessageType::Alert, &json!({ "seq": seq }))
            .await
            .unwrap();
    }

    for ws in [&mut a, &mut b] {
        for seq in 0..5 {
            let frame = next_json(ws).await;
            assert_eq!(frame["type"], "alert");
            assert_eq!(frame["data"]["seq"], seq);
        }
    }
}

#[tokio::test]
async fn subscribe_frames_update_client_state() {
    let server = boot_server().await;
    let mut ws = connect(&server, "/ws").await;
    let id = server.hub.client_ids().pop().unwrap();
    let client = server.hub.lookup(&id).unwrap();

    ws.send(Message::text("definitely not json")).await.unwrap();
    ws.send(Message::text(r#"{"type":"subscribe","data":["telemetry"]}"#))
        .await
        .unwrap();
    ws.send(Message::text(r#"{"type":"pong"}"#)).await.unwrap();

    timeout(TIMEOUT, async {
        while client.last_pong().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(client.is_subscribed("telemetry"));
    assert_eq!(server.hub.client_count(), 1);
}

#[tokio::test]
async fn keepalive_sends_json_and_transport_pings() {
    let server = boot_server_with(HubConfig {
        ping_interval: Duration::from_millis(100),
        ..HubConfig::default()
    })
    .await;
    let mut ws = connect(&server, "/ws").await;

    let (mut json_pings, mut transport_pings) = (0, 0);
    while json_pings < 2 || transport_pings < 2 {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("read timed out")
            .expect("stream ended")
            .expect("read failed");
        match msg {
            Message::Text(text) => {
                let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(frame["type"], "ping");
                json_pings += 1;
            }
            Message::Ping(_) => transport_pings += 1,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
    assert_eq!(server.hub.client_count(), 1);
}

#[tokio::test]
async fn client_close_unregisters() {
    let server = boot_server().await;
    let mut ws = connect(&server, "/ws").await;

    ws.close(None).await.unwrap();
    wait_for_clients(&server.hub, |n| n == 0).await;
}

#[tokio::test]
async fn shutdown_closes_open_sockets() {
    let server = boot_server().await;
    let mut ws = connect(&server, "/ws").await;

    server.cancel.cancel();
    timeout(TIMEOUT, server.dispatcher).await.unwrap().unwrap();

    let ended = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "socket stayed open after shutdown");
    assert_eq!(server.hub.client_count(), 0);
}
