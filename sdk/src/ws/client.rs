//! Notification client implementation.
//!
//! Provides [`AuctionSocket`], the shared connection manager. Every method is
//! synchronous: frames are queued to the session driver task and listener
//! tables are updated in place.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::WsConfig;
use super::error::WsError;
use super::frame::Frame;
use super::listeners::{DispatchReport, Disposer, ListenerTable};
use super::messages::{
    auction_topic, destination_for, AuctionIntent, GlobalTopic, PlaceBid, AUCTION_SPECIFIC_EVENT,
    SUBSCRIBE_DESTINATION, UNSUBSCRIBE_DESTINATION,
};
use super::metrics::SocketMetrics;
use super::router::SubscriptionRouter;
use super::session;
use super::transport::{Connector, WebSocketConnector};
use crate::types::AuctionId;

const SESSION_KEY: &str = "session";

/// Lifecycle notifications published to [`AuctionSocket::on_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The STOMP handshake completed and global topics were requested.
    Connected {
        /// Session generation, bumped on every handshake.
        generation: u64,
    },
    /// A connected session ended.
    Disconnected {
        /// Generation of the session that ended.
        generation: u64,
    },
    /// A connection attempt or a live session failed.
    Error(WsError),
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// First connection attempt in progress.
    Connecting,
    /// Session established.
    Connected,
    /// Waiting for or performing a reconnection.
    Reconnecting,
    /// Disconnected by the caller, or gave up reconnecting.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Result of a topic subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscribeOutcome {
    /// A SUBSCRIBE frame was queued.
    Subscribed,
    /// The topic was already active; nothing was sent.
    AlreadySubscribed,
    /// No live session; nothing was stored or sent.
    Rejected,
}

impl SubscribeOutcome {
    /// Returns true if the topic is active after the call.
    #[must_use]
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Mutable session bookkeeping, guarded by one lock.
#[derive(Default)]
struct SessionState {
    /// True from `connect` until `disconnect` or give-up.
    active: bool,
    epoch: u64,
    generation: u64,
    connected: bool,
    credential: Option<String>,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    shutdown: Option<oneshot::Sender<()>>,
    server_session: Option<String>,
    driver: Option<JoinHandle<()>>,
}

impl SessionState {
    fn live_outbound(&self) -> Option<&mpsc::UnboundedSender<Frame>> {
        if !self.connected {
            return None;
        }
        self.outbound.as_ref().filter(|tx| !tx.is_closed())
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.active && self.epoch == epoch
    }
}

/// State shared between socket handles and the session driver.
pub(super) struct SocketInner {
    pub(super) config: WsConfig,
    pub(super) connector: Box<dyn Connector>,
    pub(super) router: SubscriptionRouter,
    pub(super) metrics: Arc<SocketMetrics>,
    session_listeners: ListenerTable<SessionEvent>,
    state: Mutex<SessionState>,
    state_tx: watch::Sender<ConnectionState>,
}

impl SocketInner {
    /// Marks the session connected. Returns the new generation, or `None`
    /// if the driver was superseded.
    pub(super) fn begin_session(
        &self,
        epoch: u64,
        outbound: mpsc::UnboundedSender<Frame>,
        server_session: Option<String>,
    ) -> Option<u64> {
        let mut state = self.state.lock();
        if !state.is_current(epoch) {
            return None;
        }
        state.generation += 1;
        state.connected = true;
        state.outbound = Some(outbound);
        state.server_session = server_session;
        self.state_tx.send_replace(ConnectionState::Connected);
        self.metrics.record_session();
        Some(state.generation)
    }

    /// Clears the connected flag and drains the topic table, then announces
    /// the loss. No-op if the session already ended.
    pub(super) fn end_session(&self, epoch: u64, generation: u64) {
        {
            let mut state = self.state.lock();
            if !state.is_current(epoch) || state.generation != generation || !state.connected {
                return;
            }
            state.connected = false;
            state.outbound = None;
            state.server_session = None;
            let dropped = self.router.drain();
            debug!(
                "Session {} ended, dropped {} subscriptions",
                generation,
                dropped.len()
            );
        }
        self.publish(&SessionEvent::Disconnected { generation });
    }

    /// Ends the epoch after too many failed attempts.
    pub(super) fn give_up(&self, epoch: u64) {
        let mut state = self.state.lock();
        if !state.is_current(epoch) {
            return;
        }
        state.active = false;
        state.credential = None;
        state.shutdown = None;
        self.state_tx.send_replace(ConnectionState::Closed);
    }

    /// Updates the observable state if `epoch` is still current.
    pub(super) fn set_state_if_current(&self, epoch: u64, next: ConnectionState) -> bool {
        let state = self.state.lock();
        if !state.is_current(epoch) {
            return false;
        }
        self.state_tx.send_replace(next);
        true
    }

    /// Subscribes the global topics for a new session.
    pub(super) fn subscribe_global_topics(&self, authenticated: bool) {
        for topic in GlobalTopic::for_session(authenticated) {
            self.subscribe(topic.destination(), topic.event_name());
        }
    }

    pub(super) fn publish(&self, event: &SessionEvent) {
        let report = self.session_listeners.notify(SESSION_KEY, event);
        self.metrics.record_listener_panics(report.panicked);
    }

    pub(super) fn publish_if_current(&self, epoch: u64, event: SessionEvent) {
        if self.state.lock().is_current(epoch) {
            self.publish(&event);
        }
    }

    fn subscribe(&self, topic: &str, event_name: &str) -> SubscribeOutcome {
        let state = self.state.lock();
        let Some(outbound) = state.live_outbound() else {
            warn!("Cannot subscribe to {}: not connected", topic);
            return SubscribeOutcome::Rejected;
        };

        let Some(subscription) = self.router.register(topic, event_name, state.generation) else {
            debug!("Already subscribed to {}", topic);
            return SubscribeOutcome::AlreadySubscribed;
        };

        let frame = Frame::subscribe(&subscription.id, topic, state.credential.as_deref());
        if outbound.send(frame).is_err() {
            self.router.remove(topic);
            warn!("Cannot subscribe to {}: session is closing", topic);
            return SubscribeOutcome::Rejected;
        }

        debug!("Subscribed to {} as {}", topic, subscription.id);
        SubscribeOutcome::Subscribed
    }

    fn unsubscribe(&self, topic: &str) -> bool {
        let state = self.state.lock();
        let Some(subscription) = self.router.remove(topic) else {
            return false;
        };

        if subscription.generation == state.generation {
            if let Some(outbound) = state.live_outbound() {
                let _ = outbound.send(Frame::unsubscribe(&subscription.id));
            }
        }
        debug!("Unsubscribed from {}", topic);
        true
    }

    fn send_json(&self, destination: &str, json: String) -> bool {
        let state = self.state.lock();
        let Some(outbound) = state.live_outbound() else {
            warn!("Cannot send to {}: not connected", destination);
            return false;
        };

        let frame = Frame::send(destination, json, state.credential.as_deref());
        if outbound.send(frame).is_err() {
            warn!("Cannot send to {}: session is closing", destination);
            return false;
        }
        self.metrics.record_published();
        true
    }

    fn disconnect(&self) {
        let generation = {
            let mut state = self.state.lock();
            if !state.active {
                return;
            }
            state.active = false;
            state.credential = None;
            state.outbound = None;
            state.server_session = None;
            if let Some(shutdown) = state.shutdown.take() {
                let _ = shutdown.send(());
            }
            self.router.drain();
            self.state_tx.send_replace(ConnectionState::Closed);
            std::mem::take(&mut state.connected).then_some(state.generation)
        };

        if let Some(generation) = generation {
            self.publish(&SessionEvent::Disconnected { generation });
        }
        self.router.clear_listeners();
        self.session_listeners.clear();
        info!("Disconnected");
    }
}

/// Disconnects when the last [`AuctionSocket`] handle is dropped.
struct Lifetime {
    inner: Weak<SocketInner>,
}

impl Drop for Lifetime {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.disconnect();
        }
    }
}

/// Shared real-time connection to the auction server.
///
/// Cloning is cheap and every clone drives the same session. The session
/// stays up until [`disconnect`](Self::disconnect) is called or the last
/// clone is dropped.
#[derive(Clone)]
pub struct AuctionSocket {
    inner: Arc<SocketInner>,
    _lifetime: Arc<Lifetime>,
}

impl fmt::Debug for AuctionSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuctionSocket")
            .field("url", &self.inner.config.url)
            .field("state", &*self.inner.state_tx.borrow())
            .finish()
    }
}

impl AuctionSocket {
    /// Creates a new socket with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: WsConfig) -> Result<Self, WsError> {
        Self::with_connector(config, WebSocketConnector)
    }

    /// Creates a new socket with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_defaults() -> Result<Self, WsError> {
        Self::new(WsConfig::default())
    }

    /// Creates a new socket with the given URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_url(url: impl Into<String>) -> Result<Self, WsError> {
        Self::new(WsConfig::new(url))
    }

    /// Creates a new socket that opens links through `connector`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_connector(config: WsConfig, connector: impl Connector) -> Result<Self, WsError> {
        config.validate()?;

        let metrics = Arc::new(SocketMetrics::new());
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let inner = Arc::new(SocketInner {
            config,
            connector: Box::new(connector),
            router: SubscriptionRouter::new(Arc::clone(&metrics)),
            metrics,
            session_listeners: ListenerTable::new(),
            state: Mutex::new(SessionState::default()),
            state_tx,
        });
        let lifetime = Arc::new(Lifetime {
            inner: Arc::downgrade(&inner),
        });

        Ok(Self {
            inner,
            _lifetime: lifetime,
        })
    }

    /// Returns the socket configuration.
    #[must_use]
    pub fn config(&self) -> &WsConfig {
        &self.inner.config
    }

    /// Starts a session in the background.
    ///
    /// The credential is sent as the `token` query parameter and as a
    /// bearer `Authorization` header. No-op while a session exists
    /// (connecting or connected). Must be called within a tokio runtime;
    /// otherwise the call is logged and ignored.
    pub fn connect(&self, credential: Option<&str>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("Cannot connect: no tokio runtime");
            return;
        };
        let credential = credential.filter(|c| !c.is_empty()).map(str::to_string);

        let mut state = self.inner.state.lock();
        if state.active {
            debug!("Session already active, ignoring connect");
            return;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        state.active = true;
        state.epoch += 1;
        state.credential.clone_from(&credential);
        state.shutdown = Some(shutdown_tx);
        self.inner.state_tx.send_replace(ConnectionState::Connecting);

        info!(
            "Connecting (epoch {}, authenticated: {})",
            state.epoch,
            credential.is_some()
        );
        let driver = session::drive(
            Arc::clone(&self.inner),
            state.epoch,
            credential,
            shutdown_rx,
        );
        state.driver = Some(runtime.spawn(driver));
    }

    /// Ends the session.
    ///
    /// Sends DISCONNECT, cancels every subscription and removes every
    /// listener, including session listeners. No-op without a session.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Disconnects and waits for the session driver to finish.
    pub async fn close(&self) {
        let driver = self.inner.state.lock().driver.take();
        self.disconnect();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                warn!("Session driver ended abnormally: {}", e);
            }
        }
    }

    /// Returns true if a session is established and its transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().live_outbound().is_some()
    }

    /// Returns the server-assigned session id while connected.
    #[must_use]
    pub fn socket_id(&self) -> Option<String> {
        let state = self.inner.state.lock();
        if state.connected {
            state.server_session.clone()
        } else {
            None
        }
    }

    /// Returns the generation of the live session.
    #[must_use]
    pub fn session_generation(&self) -> Option<u64> {
        let state = self.inner.state.lock();
        state.live_outbound().map(|_| state.generation)
    }

    /// Returns a receiver for connection state changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Returns the shared metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<SocketMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Subscribes to `topic`; messages are dispatched to `event_name`
    /// listeners.
    ///
    /// Rejected without a live session. Subscribing an active topic again
    /// sends nothing.
    pub fn subscribe_to_topic(&self, topic: &str, event_name: &str) -> SubscribeOutcome {
        self.inner.subscribe(topic, event_name)
    }

    /// Cancels the subscription for `topic`. Returns false if there was none.
    pub fn unsubscribe_from_topic(&self, topic: &str) -> bool {
        self.inner.unsubscribe(topic)
    }

    /// Returns the active topics, sorted.
    #[must_use]
    pub fn active_topics(&self) -> Vec<String> {
        self.inner.router.topics()
    }

    /// Returns true if `topic` is active.
    #[must_use]
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.inner.router.contains(topic)
    }

    /// Returns the number of listeners registered under `key` (an event name
    /// or a topic).
    #[must_use]
    pub fn listener_count(&self, key: &str) -> usize {
        self.inner.router.listener_count(key)
    }

    /// Registers a listener for an event name.
    pub fn on<F>(&self, event_name: &str, callback: F) -> Disposer
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.router.on(event_name, Arc::new(callback))
    }

    /// Registers a listener for every message arriving on `topic`,
    /// whatever event name the topic was subscribed with.
    pub fn on_topic<F>(&self, topic: &str, callback: F) -> Disposer
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.router.on(topic, Arc::new(callback))
    }

    /// Registers a session lifecycle listener.
    pub fn on_session<F>(&self, callback: F) -> Disposer
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.session_listeners.add(SESSION_KEY, Arc::new(callback))
    }

    /// Registers a listener called each time a session becomes ready.
    pub fn on_ready<F>(&self, callback: F) -> Disposer
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_session(move |event| {
            if matches!(event, SessionEvent::Connected { .. }) {
                callback();
            }
        })
    }

    /// Invokes the listeners registered under `key`, in registration order.
    pub fn notify_listeners(&self, key: &str, data: &Value) -> DispatchReport {
        self.inner.router.notify(key, data)
    }

    /// Sends a JSON payload to `destination`.
    ///
    /// Returns false without a live session or if the payload does not
    /// serialize.
    pub fn send<T>(&self, destination: &str, payload: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        match serde_json::to_string(payload) {
            Ok(json) => self.inner.send_json(destination, json),
            Err(e) => {
                error!("Cannot send to {}: {}", destination, e);
                false
            }
        }
    }

    /// Sends a payload for a semantic event name.
    ///
    /// `place_bid`, `subscribe_auction` and `unsubscribe_auction` map to
    /// their application destinations; other names map to `/app/<event>`.
    pub fn emit<T>(&self, event: &str, payload: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        self.send(&destination_for(event), payload)
    }

    /// Subscribes to one auction's topic.
    ///
    /// The server is told about the interest only when the topic is newly
    /// subscribed.
    pub fn subscribe_to_auction(&self, auction_id: AuctionId) -> SubscribeOutcome {
        if auction_id.is_placeholder() {
            warn!("Ignoring subscription to placeholder auction id");
            return SubscribeOutcome::Rejected;
        }

        let outcome = self.subscribe_to_topic(&auction_topic(auction_id), AUCTION_SPECIFIC_EVENT);
        if outcome == SubscribeOutcome::Subscribed {
            self.send(SUBSCRIBE_DESTINATION, &AuctionIntent { auction_id });
        }
        outcome
    }

    /// Unsubscribes from one auction's topic and tells the server.
    pub fn unsubscribe_from_auction(&self, auction_id: AuctionId) -> bool {
        if auction_id.is_placeholder() {
            warn!("Ignoring unsubscription from placeholder auction id");
            return false;
        }

        if !self.unsubscribe_from_topic(&auction_topic(auction_id)) {
            return false;
        }
        if self.is_connected() {
            self.send(UNSUBSCRIBE_DESTINATION, &AuctionIntent { auction_id });
        }
        true
    }

    /// Places a bid. Acceptance is decided by the server and announced on
    /// the bid topics.
    pub fn place_bid(&self, auction_id: AuctionId, amount: Decimal) -> bool {
        if auction_id.is_placeholder() {
            warn!("Ignoring bid on placeholder auction id");
            return false;
        }
        self.emit(
            "place_bid",
            &PlaceBid {
                auction_id,
                bid_amount: amount,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::ws::frame::Command;
    use crate::ws::transport::testing::{MemoryConnector, ServerEnd};

    fn test_config() -> WsConfig {
        WsConfig::new("ws://test.local/ws-auction/websocket")
            .with_heartbeat(Duration::ZERO, Duration::ZERO)
            .with_reconnect_delay(Duration::from_millis(20))
            .with_connect_timeout(Duration::from_secs(2))
    }

    struct Harness {
        socket: AuctionSocket,
        connector: Arc<MemoryConnector>,
        accepted: UnboundedReceiver<ServerEnd>,
        ready: UnboundedReceiver<SessionEvent>,
        _events: Disposer,
    }

    impl Harness {
        fn new(config: WsConfig) -> Self {
            let (connector, accepted) = MemoryConnector::new();
            let socket =
                AuctionSocket::with_connector(config, Arc::clone(&connector)).expect("socket");
            let (tx, ready) = mpsc::unbounded_channel();
            let events = socket.on_session(move |event| {
                let _ = tx.send(event.clone());
            });
            Self {
                socket,
                connector,
                accepted,
                ready,
                _events: events,
            }
        }

        async fn next_server(&mut self) -> ServerEnd {
            tokio::time::timeout(Duration::from_secs(2), self.accepted.recv())
                .await
                .expect("link opened")
                .expect("connector alive")
        }

        async fn next_event(&mut self) -> SessionEvent {
            tokio::time::timeout(Duration::from_secs(2), self.ready.recv())
                .await
                .expect("session event")
                .expect("listener alive")
        }

        /// Completes a handshake and waits for the Connected event.
        async fn establish(&mut self, session: &str) -> (ServerEnd, Frame, u64) {
            let mut server = self.next_server().await;
            let connect = server.expect(Command::Connect).await;
            server.accept(session);
            loop {
                if let SessionEvent::Connected { generation } = self.next_event().await {
                    return (server, connect, generation);
                }
            }
        }
    }

    fn subscribed_destinations(frames: &[Frame]) -> Vec<String> {
        frames
            .iter()
            .filter(|f| f.command == Command::Subscribe)
            .filter_map(|f| f.header("destination").map(str::to_string))
            .collect()
    }

    #[test]
    fn test_socket_new() {
        assert!(AuctionSocket::with_defaults().is_ok());
        assert!(AuctionSocket::with_url("wss://example.com/ws").is_ok());
        assert!(AuctionSocket::with_url("http://example.com").is_err());
    }

    #[test]
    fn test_connect_without_runtime_is_ignored() {
        let socket = AuctionSocket::with_defaults().expect("socket");
        socket.connect(Some("tok1"));
        assert_eq!(*socket.state().borrow(), ConnectionState::Idle);
        assert!(!socket.is_connected());
    }

    #[tokio::test]
    async fn test_initial_state() {
        let socket = AuctionSocket::with_defaults().expect("socket");
        assert!(!socket.is_connected());
        assert!(socket.active_topics().is_empty());
        assert!(socket.socket_id().is_none());
        assert_eq!(*socket.state().borrow(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_connect_subscribes_global_topics() {
        let mut h = Harness::new(test_config());
        h.socket.connect(Some("tok1"));

        let (mut server, connect, generation) = h.establish("s-1").await;
        assert_eq!(generation, 1);
        assert!(server.url.ends_with("?token=tok1"));
        assert_eq!(connect.header("Authorization"), Some("Bearer tok1"));
        assert_eq!(connect.header("heart-beat"), Some("0,0"));

        let frames = server.drain().await;
        assert_eq!(
            subscribed_destinations(&frames),
            vec![
                "/topic/auctions",
                "/topic/bids",
                "/topic/auction-started",
                "/topic/auction-ended",
                "/user/queue/notifications",
            ]
        );
        assert!(frames
            .iter()
            .all(|f| f.header("Authorization") == Some("Bearer tok1")));

        assert!(h.socket.is_connected());
        assert_eq!(h.socket.socket_id().as_deref(), Some("s-1"));
        assert_eq!(*h.socket.state().borrow(), ConnectionState::Connected);
        assert_eq!(h.socket.active_topics().len(), 5);
        assert_eq!(h.socket.metrics().sessions_established(), 1);
    }

    #[tokio::test]
    async fn test_anonymous_session_skips_notifications() {
        let mut h = Harness::new(test_config());
        h.socket.connect(None);

        let (mut server, connect, _) = h.establish("s-1").await;
        assert!(connect.header("Authorization").is_none());
        assert!(!server.url.contains("token"));

        let destinations = subscribed_destinations(&server.drain().await);
        assert_eq!(destinations.len(), 4);
        assert!(!h.socket.is_subscribed("/user/queue/notifications"));
    }

    #[tokio::test]
    async fn test_connect_twice_opens_one_transport() {
        let mut h = Harness::new(test_config());
        h.socket.connect(Some("tok1"));
        h.socket.connect(Some("tok1"));

        let (_server, _, _) = h.establish("s-1").await;
        h.socket.connect(Some("tok2"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.connector.opens(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let mut h = Harness::new(test_config());
        h.socket.connect(None);
        let (mut server, _, _) = h.establish("s-1").await;
        server.drain().await;

        assert_eq!(
            h.socket.subscribe_to_topic("/topic/lots", "lots"),
            SubscribeOutcome::Subscribed
        );
        assert_eq!(
            h.socket.subscribe_to_topic("/topic/lots", "lots"),
            SubscribeOutcome::AlreadySubscribed
        );
        assert_eq!(
            h.socket.subscribe_to_topic("/topic/bids", "new_bid"),
            SubscribeOutcome::AlreadySubscribed
        );

        let frames = server.drain().await;
        assert_eq!(subscribed_destinations(&frames), vec!["/topic/lots"]);
    }

    #[tokio::test]
    async fn test_disconnected_calls_are_rejected() {
        let socket =
            AuctionSocket::with_connector(test_config(), MemoryConnector::new().0).expect("socket");
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let _d = socket.on("new_bid", move |value| sink.lock().push(value.clone()));

        assert_eq!(
            socket.subscribe_to_topic("/topic/bids", "new_bid"),
            SubscribeOutcome::Rejected
        );
        assert!(!socket.send("/app/bid", &json!({"auctionId": 1})));
        assert!(!socket.place_bid(AuctionId::new(1), Decimal::from(10)));
        assert!(!socket.unsubscribe_from_topic("/topic/bids"));

        assert!(socket.active_topics().is_empty());
        assert!(log.lock().is_empty());
        assert_eq!(socket.metrics().messages_published(), 0);
        assert_eq!(socket.metrics().frames_sent(), 0);
    }

    #[tokio::test]
    async fn test_auction_bid_reaches_listener() {
        let mut h = Harness::new(test_config());
        let (tx, mut bids) = mpsc::unbounded_channel();
        let _d = h.socket.on(AUCTION_SPECIFIC_EVENT, move |value| {
            let _ = tx.send(value.clone());
        });

        h.socket.connect(Some("tok1"));
        let (mut server, _, _) = h.establish("s-1").await;
        server.drain().await;

        assert_eq!(
            h.socket.subscribe_to_auction(AuctionId::new(7)),
            SubscribeOutcome::Subscribed
        );
        assert_eq!(
            h.socket.subscribe_to_auction(AuctionId::new(7)),
            SubscribeOutcome::AlreadySubscribed
        );

        let subscribe = server.expect(Command::Subscribe).await;
        assert_eq!(subscribe.header("destination"), Some("/topic/auction/7"));
        let intent = server.expect(Command::Send).await;
        assert_eq!(intent.header("destination"), Some("/app/subscribe"));
        assert_eq!(intent.body, r#"{"auctionId":7}"#);
        assert!(server.drain().await.is_empty());

        let sub_id = subscribe.header("id").expect("id").to_string();
        server.publish(
            &sub_id,
            "/topic/auction/7",
            r#"{"type":"BID","auctionId":7,"amount":500}"#,
        );

        let payload = tokio::time::timeout(Duration::from_secs(2), bids.recv())
            .await
            .expect("dispatched")
            .expect("listener alive");
        assert_eq!(payload["amount"], json!(500));
        assert_eq!(h.socket.metrics().messages_dispatched(), 1);
    }

    #[tokio::test]
    async fn test_place_bid_and_emit() {
        let mut h = Harness::new(test_config());
        h.socket.connect(Some("tok1"));
        let (mut server, _, _) = h.establish("s-1").await;
        server.drain().await;

        assert!(h.socket.place_bid(AuctionId::new(7), Decimal::new(5005, 1)));
        assert!(h.socket.emit("watch", &json!({"auctionId": 7})));

        let bid = server.expect(Command::Send).await;
        assert_eq!(bid.header("destination"), Some("/app/bid"));
        assert_eq!(bid.header("content-type"), Some("application/json"));
        assert_eq!(bid.header("Authorization"), Some("Bearer tok1"));
        assert_eq!(bid.body, r#"{"auctionId":7,"bidAmount":500.5}"#);

        let other = server.expect(Command::Send).await;
        assert_eq!(other.header("destination"), Some("/app/watch"));
        assert_eq!(h.socket.metrics().messages_published(), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_from_auction() {
        let mut h = Harness::new(test_config());
        h.socket.connect(None);
        let (mut server, _, _) = h.establish("s-1").await;
        server.drain().await;

        assert!(!h.socket.unsubscribe_from_auction(AuctionId::new(0)));
        assert!(!h.socket.unsubscribe_from_auction(AuctionId::new(3)));

        h.socket.subscribe_to_auction(AuctionId::new(3));
        let subscribe = server.expect(Command::Subscribe).await;
        server.drain().await;

        assert!(h.socket.unsubscribe_from_auction(AuctionId::new(3)));
        let unsubscribe = server.expect(Command::Unsubscribe).await;
        assert_eq!(unsubscribe.header("id"), subscribe.header("id"));
        let intent = server.expect(Command::Send).await;
        assert_eq!(intent.header("destination"), Some("/app/unsubscribe"));
        assert!(!h.socket.is_subscribed("/topic/auction/3"));
    }

    #[tokio::test]
    async fn test_reconnect_cycles_resubscribe_once() {
        let mut h = Harness::new(test_config());
        h.socket.connect(None);

        let mut last_generation = 0;
        for cycle in 0..3 {
            let (mut server, _, generation) = h.establish(&format!("s-{}", cycle)).await;
            assert!(generation > last_generation);
            last_generation = generation;

            let destinations = subscribed_destinations(&server.drain().await);
            let mut counts: HashMap<String, usize> = HashMap::new();
            for destination in destinations {
                *counts.entry(destination).or_default() += 1;
            }
            assert_eq!(counts.len(), 4);
            assert!(counts.values().all(|count| *count == 1));
            assert_eq!(h.socket.active_topics().len(), 4);

            server.drop_link();
            loop {
                if let SessionEvent::Disconnected { generation: ended } = h.next_event().await {
                    assert_eq!(ended, generation);
                    break;
                }
            }
            assert!(!h.socket.is_connected());
            assert!(h.socket.active_topics().is_empty());
        }

        let (_server, _, _) = h.establish("s-final").await;
        assert_eq!(h.connector.opens(), 4);
        assert_eq!(h.socket.metrics().sessions_established(), 4);
    }

    #[tokio::test]
    async fn test_listeners_survive_reconnect() {
        let mut h = Harness::new(test_config());
        let (tx, mut bids) = mpsc::unbounded_channel();
        let _d = h.socket.on("new_bid", move |value| {
            let _ = tx.send(value.clone());
        });

        h.socket.connect(None);
        let (server, _, _) = h.establish("s-1").await;
        server.drop_link();

        let (mut server, _, _) = h.establish("s-2").await;
        let frames = server.drain().await;
        let bids_sub = frames
            .iter()
            .find(|f| f.header("destination") == Some("/topic/bids"))
            .and_then(|f| f.header("id"))
            .expect("bids subscription")
            .to_string();

        server.publish(&bids_sub, "/topic/bids", r#"{"auctionId":1,"amount":5}"#);
        let payload = tokio::time::timeout(Duration::from_secs(2), bids.recv())
            .await
            .expect("dispatched")
            .expect("listener alive");
        assert_eq!(payload["auctionId"], json!(1));
    }

    #[tokio::test]
    async fn test_disconnect_clears_everything() {
        let mut h = Harness::new(test_config());
        let _d = h.socket.on("new_bid", |_| {});
        h.socket.connect(Some("tok1"));
        let (mut server, _, _) = h.establish("s-1").await;
        server.drain().await;

        h.socket.disconnect();
        assert!(!h.socket.is_connected());
        assert!(h.socket.active_topics().is_empty());
        assert_eq!(h.socket.listener_count("new_bid"), 0);
        assert_eq!(*h.socket.state().borrow(), ConnectionState::Closed);
        assert!(h.socket.socket_id().is_none());

        server.expect(Command::Disconnect).await;
        h.socket.disconnect();

        // The Disconnected event is the last one; session listeners are gone.
        assert!(matches!(
            h.next_event().await,
            SessionEvent::Disconnected { generation: 1 }
        ));
        assert!(tokio::time::timeout(Duration::from_millis(50), h.ready.recv())
            .await
            .map_or(true, |event| event.is_none()));
    }

    #[tokio::test]
    async fn test_connect_after_disconnect() {
        let mut h = Harness::new(test_config());
        h.socket.connect(None);
        let (_server, _, _) = h.establish("s-1").await;
        h.socket.close().await;

        let (tx, ready) = mpsc::unbounded_channel();
        h.ready = ready;
        h._events = h.socket.on_session(move |event| {
            let _ = tx.send(event.clone());
        });

        h.socket.connect(Some("tok2"));
        let (server, _, generation) = h.establish("s-2").await;
        assert_eq!(generation, 2);
        assert!(server.url.ends_with("token=tok2"));
    }

    #[tokio::test]
    async fn test_server_error_frame_triggers_reconnect() {
        let mut h = Harness::new(test_config());
        h.socket.connect(Some("tok1"));
        let (server, _, _) = h.establish("s-1").await;

        server.send_frame(
            &Frame::new(Command::Error)
                .with_header("message", "Session expired")
                .with_body("please log in again"),
        );

        assert_eq!(
            h.next_event().await,
            SessionEvent::Disconnected { generation: 1 }
        );
        match h.next_event().await {
            SessionEvent::Error(WsError::Server { message, details }) => {
                assert_eq!(message, "Session expired");
                assert_eq!(details, "please log in again");
            }
            other => panic!("unexpected event {:?}", other),
        }

        let (_server, _, generation) = h.establish("s-2").await;
        assert_eq!(generation, 2);
    }

    #[tokio::test]
    async fn test_silent_server_triggers_reconnect() {
        let config = test_config().with_heartbeat(Duration::ZERO, Duration::from_millis(40));
        let mut h = Harness::new(config);
        h.socket.connect(None);

        let mut server = h.next_server().await;
        server.expect(Command::Connect).await;
        server.send_frame(
            &Frame::new(Command::Connected)
                .with_header("version", "1.2")
                .with_header("heart-beat", "40,0"),
        );

        let mut next = h.next_server().await;
        assert_eq!(h.socket.metrics().heartbeat_timeouts(), 1);
        next.expect(Command::Connect).await;
    }

    #[tokio::test]
    async fn test_outgoing_heartbeats() {
        let config = test_config().with_heartbeat(Duration::from_millis(20), Duration::ZERO);
        let mut h = Harness::new(config);
        h.socket.connect(None);

        let mut server = h.next_server().await;
        server.expect(Command::Connect).await;
        server.send_frame(
            &Frame::new(Command::Connected)
                .with_header("version", "1.2")
                .with_header("heart-beat", "0,20"),
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(h.socket.metrics().heartbeats_sent() >= 2);
        assert!(h.socket.is_connected());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mut h = Harness::new(test_config().with_max_reconnect_attempts(2));
        h.connector.set_refuse(true);
        let mut state = h.socket.state();
        h.socket.connect(Some("tok1"));

        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ConnectionState::Closed),
        )
        .await
        .expect("gave up")
        .expect("sender alive");

        assert_eq!(h.connector.opens(), 2);
        assert_eq!(h.socket.metrics().connect_failures(), 2);
        assert!(matches!(
            h.next_event().await,
            SessionEvent::Error(WsError::Connection(_))
        ));

        h.connector.set_refuse(false);
        h.socket.connect(Some("tok1"));
        let (_server, _, _) = h.establish("s-1").await;
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let config = test_config()
            .with_connect_timeout(Duration::from_millis(50))
            .with_max_reconnect_attempts(1);
        let mut h = Harness::new(config);
        h.socket.connect(None);

        let _server = h.next_server().await;
        assert_eq!(
            h.next_event().await,
            SessionEvent::Error(WsError::HandshakeTimeout)
        );
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_stop_others() {
        let mut h = Harness::new(test_config());
        let (tx, mut delivered) = mpsc::unbounded_channel();
        let _a = h.socket.on("new_bid", |_| panic!("listener failure"));
        let _b = h.socket.on("new_bid", move |_| {
            let _ = tx.send(());
        });

        h.socket.connect(None);
        let (mut server, _, _) = h.establish("s-1").await;
        let frames = server.drain().await;
        let bids_sub = frames
            .iter()
            .find(|f| f.header("destination") == Some("/topic/bids"))
            .and_then(|f| f.header("id"))
            .expect("bids subscription")
            .to_string();

        server.publish(&bids_sub, "/topic/bids", "{}");
        tokio::time::timeout(Duration::from_secs(2), delivered.recv())
            .await
            .expect("second listener ran")
            .expect("listener alive");
        assert_eq!(h.socket.metrics().listener_panics(), 1);
        assert!(h.socket.is_connected());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_dropped_and_session_survives() {
        let mut h = Harness::new(test_config());
        let (tx, mut bids) = mpsc::unbounded_channel();
        let _d = h.socket.on(AUCTION_SPECIFIC_EVENT, move |value| {
            let _ = tx.send(value.clone());
        });

        h.socket.connect(Some("tok1"));
        let (mut server, _, _) = h.establish("s-1").await;
        server.drain().await;
        h.socket.subscribe_to_auction(AuctionId::new(7));
        let subscribe = server.expect(Command::Subscribe).await;
        let sub_id = subscribe.header("id").expect("id").to_string();

        server.send_raw("MESSAGE\ncontent-length:18446744073709551615\n\n{}\0");
        server.publish(&sub_id, "/topic/auction/7", r#"{"type":"BID","amount":900}"#);

        let payload = tokio::time::timeout(Duration::from_secs(2), bids.recv())
            .await
            .expect("dispatched")
            .expect("listener alive");
        assert_eq!(payload["amount"], json!(900));
        assert_eq!(h.socket.metrics().decode_failures(), 1);
        assert!(h.socket.is_connected());
        assert_eq!(h.connector.opens(), 1);
    }

    #[tokio::test]
    async fn test_dropping_last_handle_disconnects() {
        let mut h = Harness::new(test_config());
        h.socket.connect(None);
        let (mut server, _, _) = h.establish("s-1").await;
        server.drain().await;

        let clone = h.socket.clone();
        drop(clone);
        assert!(h.socket.is_connected());

        drop(h.socket);
        server.expect(Command::Disconnect).await;
    }
}
