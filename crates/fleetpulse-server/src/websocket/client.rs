//! A registered viewer: mailbox sender plus the state its pumps share.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use fleetpulse_core::{ClientId, Message};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Receiving half of a client mailbox. Owned by the writer pump.
pub type Mailbox = mpsc::Receiver<Arc<Message>>;

/// Lifecycle of a client. Moves forward only; `Closed` is absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    /// Registered and pumping.
    Connected = 0,
    /// A pump has hit a terminal condition; unregistration is under way.
    Closing = 1,
    /// Mailbox closed and removed from the registry.
    Closed = 2,
}

impl ClientState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connected,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Why a non-blocking delivery failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryError {
    /// The mailbox is at capacity.
    Full,
    /// The writer pump has dropped the mailbox.
    Closed,
}

/// State shared between the registry entry and the two pumps.
#[derive(Debug)]
pub struct ClientShared {
    id: ClientId,
    state: AtomicU8,
    subscriptions: Mutex<HashSet<String>>,
    last_pong: Mutex<Option<Instant>>,
    connected_at: Instant,
}

impl ClientShared {
    fn new(id: ClientId) -> Self {
        Self {
            id,
            state: AtomicU8::new(ClientState::Connected as u8),
            subscriptions: Mutex::new(HashSet::new()),
            last_pong: Mutex::new(None),
            connected_at: Instant::now(),
        }
    }

    /// Client identity.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move `Connected -> Closing`. Returns `false` if already past `Connected`.
    pub fn begin_closing(&self) -> bool {
        self.state
            .compare_exchange(
                ClientState::Connected as u8,
                ClientState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Closed`. Returns `true` only for the call that made the transition.
    fn mark_closed(&self) -> bool {
        self.state.swap(ClientState::Closed as u8, Ordering::AcqRel) != ClientState::Closed as u8
    }

    /// Add channels to the subscription set. Returns how many were new.
    pub fn subscribe<I>(&self, channels: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut subs = self.subscriptions.lock();
        channels.into_iter().filter(|c| subs.insert(c.clone())).count()
    }

    /// Remove channels from the subscription set. Returns how many were present.
    pub fn unsubscribe(&self, channels: &[String]) -> usize {
        let mut subs = self.subscriptions.lock();
        channels.iter().filter(|c| subs.remove(c.as_str())).count()
    }

    /// Whether the client subscribed to `channel`.
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.lock().contains(channel)
    }

    /// Sorted snapshot of the subscription set.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut subs: Vec<String> = self.subscriptions.lock().iter().cloned().collect();
        subs.sort();
        subs
    }

    /// Record a pong from the client.
    pub fn record_pong(&self) {
        *self.last_pong.lock() = Some(Instant::now());
    }

    /// When the last pong arrived, if ever.
    pub fn last_pong(&self) -> Option<Instant> {
        *self.last_pong.lock()
    }

    /// Time since the client connected.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Registry entry for one viewer. Holds the only sender of its mailbox, so
/// dropping the entry closes the mailbox; there is no way to close it twice.
#[derive(Debug)]
pub struct Client {
    shared: Arc<ClientShared>,
    mailbox: mpsc::Sender<Arc<Message>>,
}

impl Client {
    /// Create a client with a mailbox of `capacity` messages.
    pub fn new(id: ClientId, capacity: usize) -> (Self, Mailbox) {
        let (tx, rx) = mpsc::channel(capacity);
        let client = Self {
            shared: Arc::new(ClientShared::new(id)),
            mailbox: tx,
        };
        (client, rx)
    }

    /// Client identity.
    pub fn id(&self) -> &ClientId {
        self.shared.id()
    }

    /// Handle on the state shared with the pumps.
    pub fn shared(&self) -> Arc<ClientShared> {
        Arc::clone(&self.shared)
    }

    /// Enqueue without waiting.
    pub fn try_deliver(&self, message: &Arc<Message>) -> Result<(), DeliveryError> {
        self.mailbox
            .try_send(Arc::clone(message))
            .map_err(|err| match err {
                TrySendError::Full(_) => DeliveryError::Full,
                TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Close the mailbox and mark the client `Closed`.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = self.shared.mark_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_client(capacity: usize) -> (Client, Mailbox) {
        Client::new(ClientId::from_raw("client_test"), capacity)
    }

    #[test]
    fn starts_connected() {
        let (client, _rx) = make_client(4);
        assert_eq!(client.shared().state(), ClientState::Connected);
        assert_eq!(client.id().as_str(), "client_test");
        assert!(client.shared().last_pong().is_none());
    }

    #[test]
    fn state_only_moves_forward() {
        let (client, _rx) = make_client(4);
        let shared = client.shared();
        assert!(shared.begin_closing());
        assert!(!shared.begin_closing());
        assert_eq!(shared.state(), ClientState::Closing);

        client.close();
        assert_eq!(shared.state(), ClientState::Closed);
        assert!(!shared.begin_closing());
        assert!(!shared.mark_closed());
    }

    #[test]
    fn close_ends_the_mailbox() {
        let (client, mut rx) = make_client(4);
        client.try_deliver(&Arc::new(Message::ping())).unwrap();
        client.close();
        assert!(rx.try_recv().is_ok());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn full_mailbox_reports_full() {
        let (client, _rx) = make_client(1);
        let msg = Arc::new(Message::ping());
        assert_eq!(client.try_deliver(&msg), Ok(()));
        assert_eq!(client.try_deliver(&msg), Err(DeliveryError::Full));
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let (client, rx) = make_client(1);
        drop(rx);
        assert_eq!(
            client.try_deliver(&Arc::new(Message::ping())),
            Err(DeliveryError::Closed)
        );
    }

    #[test]
    fn subscriptions_are_a_set() {
        let (client, _rx) = make_client(1);
        let shared = client.shared();
        assert_eq!(shared.subscribe(["telemetry".to_string()]), 1);
        assert_eq!(shared.subscribe(["telemetry".to_string()]), 0);
        assert!(shared.is_subscribed("telemetry"));

        assert_eq!(shared.unsubscribe(&["telemetry".to_string()]), 1);
        assert!(!shared.is_subscribed("telemetry"));
        assert_eq!(shared.unsubscribe(&["telemetry".to_string()]), 0);
    }

    #[test]
    fn subscriptions_snapshot_is_sorted() {
        let (client, _rx) = make_client(1);
        let shared = client.shared();
        let _ = shared.subscribe(["vehicle", "alert", "telemetry"].map(String::from));
        assert_eq!(shared.subscriptions(), vec!["alert", "telemetry", "vehicle"]);
    }

    #[test]
    fn record_pong_sets_timestamp() {
        let (client, _rx) = make_client(1);
        let shared = client.shared();
        shared.record_pong();
        assert!(shared.last_pong().is_some());
    }

    #[test]
    fn age_counts_from_creation() {
        let (client, _rx) = make_client(1);
        std::thread::sleep(Duration::from_millis(5));
        assert!(client.shared().age() >= Duration::from_millis(5));
    }
}
