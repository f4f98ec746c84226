//! The hub: a single dispatcher task that owns the client registry.
//!
//! Producers and pumps talk to the dispatcher over three queues:
//!
//! - **register**: bounded, each request carries an ack so `register` returns
//!   only once the client is visible in the registry
//! - **unregister**: unbounded, so a pump can always hand off its id without
//!   waiting on the dispatcher
//! - **broadcast**: bounded; a full queue makes producers wait
//!
//! The dispatcher is the only writer of the registry. Fan-out never blocks:
//! a client whose mailbox is full is evicted on the spot instead of being
//! routed back through the unregister queue, which the dispatcher itself
//! would have to drain. Keepalive pings are fanned out straight from the
//! dispatcher's own timer and never enter the broadcast queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fleetpulse_core::models::{Alert, FleetStats, Telemetry, Vehicle};
use fleetpulse_core::{ClientId, FleetEvent, HubError, Message, MessageType};
use metrics::{counter, gauge};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{Client, ClientShared, DeliveryError};
use crate::config::HubConfig;
use crate::metrics::{
    HUB_BROADCASTS_TOTAL, HUB_EVICTIONS_TOTAL, HUB_PINGS_TOTAL, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

type Registry = Arc<RwLock<HashMap<ClientId, Client>>>;

/// Registration request. The dispatcher acks once the client is inserted.
struct Registration {
    client: Client,
    ack: oneshot::Sender<()>,
}

/// Cloneable producer/pump handle on the hub.
#[derive(Clone)]
pub struct Hub {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::UnboundedSender<ClientId>,
    broadcast_tx: mpsc::Sender<Arc<Message>>,
    registry: Registry,
    mailbox_capacity: usize,
    cancel: CancellationToken,
}

/// The dispatcher loop. Spawn [`Dispatcher::run`] exactly once.
pub struct Dispatcher {
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::UnboundedReceiver<ClientId>,
    broadcast_rx: mpsc::Receiver<Arc<Message>>,
    registry: Registry,
    ping_interval: Duration,
    cancel: CancellationToken,
}

impl Hub {
    /// Create a hub and its dispatcher. Cancelling `cancel` shuts the hub down.
    pub fn new(config: &HubConfig, cancel: CancellationToken) -> (Self, Dispatcher) {
        let (register_tx, register_rx) = mpsc::channel(config.broadcast_capacity.max(1));
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_capacity.max(1));
        let registry: Registry = Arc::new(RwLock::new(HashMap::new()));

        let hub = Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            registry: Arc::clone(&registry),
            mailbox_capacity: config.mailbox_capacity.max(1),
            cancel: cancel.clone(),
        };
        let dispatcher = Dispatcher {
            register_rx,
            unregister_rx,
            broadcast_rx,
            registry,
            ping_interval: config.ping_interval,
            cancel,
        };
        (hub, dispatcher)
    }

    /// Capacity new client mailboxes should be created with.
    pub fn mailbox_capacity(&self) -> usize {
        self.mailbox_capacity
    }

    /// Whether shutdown has been requested.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Add a client. Returns once it is in the registry.
    pub async fn register(&self, client: Client) -> Result<(), HubError> {
        if self.cancel.is_cancelled() {
            return Err(HubError::Closed);
        }
        let (ack, acked) = oneshot::channel();
        let request = Registration { client, ack };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(HubError::Closed),
            sent = self.register_tx.send(request) => sent.map_err(|_| HubError::Closed)?,
        }
        // A request still queued when the dispatcher exits is dropped with its ack
        acked.await.map_err(|_| HubError::Closed)
    }

    /// Ask the dispatcher to remove a client. Idempotent and never blocks.
    pub fn unregister(&self, id: &ClientId) {
        let _ = self.unregister_tx.send(id.clone());
    }

    /// Serialize `payload` and enqueue it for every client.
    ///
    /// Waits while the broadcast queue is full. Returns
    /// [`HubError::Serialization`] without enqueuing anything if the payload
    /// cannot be encoded, and [`HubError::Closed`] once the hub shuts down,
    /// including while waiting for queue space.
    pub async fn broadcast<T>(&self, kind: MessageType, payload: &T) -> Result<(), HubError>
    where
        T: Serialize + ?Sized,
    {
        let message = Message::with_payload(kind, payload)?;
        self.publish(message).await
    }

    /// Enqueue an already-built message.
    pub async fn publish(&self, message: Message) -> Result<(), HubError> {
        if self.cancel.is_cancelled() {
            return Err(HubError::Closed);
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(HubError::Closed),
            sent = self.broadcast_tx.send(Arc::new(message)) => sent.map_err(|_| HubError::Closed),
        }
    }

    /// Broadcast a typed fleet event.
    pub async fn broadcast_event(&self, event: &FleetEvent) -> Result<(), HubError> {
        self.publish(event.to_message()?).await
    }

    /// Broadcast a telemetry reading.
    pub async fn broadcast_telemetry(&self, telemetry: &Telemetry) -> Result<(), HubError> {
        self.broadcast(MessageType::Telemetry, telemetry).await
    }

    /// Broadcast an alert.
    pub async fn broadcast_alert(&self, alert: &Alert) -> Result<(), HubError> {
        self.broadcast(MessageType::Alert, alert).await
    }

    /// Broadcast a vehicle update.
    pub async fn broadcast_vehicle(&self, vehicle: &Vehicle) -> Result<(), HubError> {
        self.broadcast(MessageType::Vehicle, vehicle).await
    }

    /// Broadcast fleet stats.
    pub async fn broadcast_stats(&self, stats: &FleetStats) -> Result<(), HubError> {
        self.broadcast(MessageType::Stats, stats).await
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.registry.read().len()
    }

    /// Ids of all registered clients.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.registry.read().keys().cloned().collect()
    }

    /// Shared state of a registered client.
    pub fn lookup(&self, id: &ClientId) -> Option<Arc<ClientShared>> {
        self.registry.read().get(id).map(Client::shared)
    }
}

impl Dispatcher {
    /// Run until cancelled or until every [`Hub`] handle is dropped, then
    /// close all remaining clients.
    pub async fn run(mut self) {
        let mut keepalive = time::interval_at(
            Instant::now() + self.ping_interval,
            self.ping_interval,
        );
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(ping_interval = ?self.ping_interval, "hub dispatcher started");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                request = self.register_rx.recv() => match request {
                    Some(request) => self.add(request),
                    None => break,
                },
                id = self.unregister_rx.recv() => match id {
                    Some(id) => self.remove(&id),
                    None => break,
                },
                message = self.broadcast_rx.recv() => match message {
                    Some(message) => {
                        counter!(HUB_BROADCASTS_TOTAL).increment(1);
                        self.fan_out(&message);
                    }
                    None => break,
                },
                _ = keepalive.tick() => {
                    counter!(HUB_PINGS_TOTAL).increment(1);
                    self.fan_out(&Arc::new(Message::ping()));
                }
            }
        }

        self.shutdown();
    }

    fn add(&self, request: Registration) {
        let Registration { client, ack } = request;
        let id = client.id().clone();
        let total = {
            let mut clients = self.registry.write();
            if let Some(previous) = clients.insert(id.clone(), client) {
                previous.close();
            }
            clients.len()
        };
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).set(total as f64);
        info!(client_id = %id, total_clients = total, "client connected");
        let _ = ack.send(());
    }

    fn remove(&self, id: &ClientId) {
        let (removed, total) = {
            let mut clients = self.registry.write();
            (clients.remove(id), clients.len())
        };
        if let Some(client) = removed {
            let connected_for = client.shared().age();
            client.close();
            counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
            gauge!(WS_CONNECTIONS_ACTIVE).set(total as f64);
            info!(client_id = %id, total_clients = total, ?connected_for, "client disconnected");
        }
    }

    /// Offer `message` to every mailbox without waiting. Full or closed
    /// mailboxes are removed after the pass.
    fn fan_out(&self, message: &Arc<Message>) {
        let failed: Vec<(ClientId, DeliveryError)> = self
            .registry
            .read()
            .iter()
            .filter_map(|(id, client)| client.try_deliver(message).err().map(|e| (id.clone(), e)))
            .collect();

        for (id, reason) in failed {
            match reason {
                DeliveryError::Full => {
                    counter!(HUB_EVICTIONS_TOTAL).increment(1);
                    warn!(client_id = %id, kind = %message.kind(), "mailbox full, evicting slow client");
                }
                DeliveryError::Closed => {
                    debug!(client_id = %id, "mailbox already closed, removing client");
                }
            }
            self.remove(&id);
        }
    }

    fn shutdown(&mut self) {
        self.register_rx.close();
        self.broadcast_rx.close();

        let closed = {
            let mut clients = self.registry.write();
            let count = clients.len();
            clients.drain().for_each(|(_, client)| client.close());
            count
        };
        gauge!(WS_CONNECTIONS_ACTIVE).set(0.0);
        info!(closed_clients = closed, "hub dispatcher stopped");
    }
}
