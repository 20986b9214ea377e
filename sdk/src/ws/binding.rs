//! Per-auction subscription binding.
//!
//! An [`AuctionBinding`] ties one consumer's interest in one auction to a
//! managed topic subscription on a shared [`AuctionSocket`]. It waits for the
//! session to become ready, re-establishes the topic after every reconnect,
//! routes bids and updates to the latest handlers, and releases everything on
//! teardown.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use super::client::{AuctionSocket, SessionEvent};
use super::listeners::Disposer;
use super::messages::{auction_topic, Envelope};
use crate::types::AuctionId;

/// Handler invoked with a classified payload.
pub type EnvelopeHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Lifecycle of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingState {
    /// No auction bound.
    Idle,
    /// Bound, waiting for a ready session.
    Waiting,
    /// Topic subscribed on the given session generation.
    Subscribed {
        /// Session generation the topic was subscribed on.
        generation: u64,
    },
    /// Unmounted; the binding ignores further calls.
    TornDown,
}

#[derive(Default)]
struct Handlers {
    on_bid: Option<EnvelopeHandler>,
    on_update: Option<EnvelopeHandler>,
}

struct Core {
    state: BindingState,
    auction: Option<AuctionId>,
    session: Disposer,
    topic: Disposer,
}

struct BindingInner {
    socket: AuctionSocket,
    handlers: Mutex<Handlers>,
    core: Mutex<Core>,
}

impl BindingInner {
    fn handle_session(self: &Arc<Self>, event: &SessionEvent) {
        match event {
            SessionEvent::Connected { generation } => {
                let mut core = self.core.lock();
                if core.state == BindingState::Waiting {
                    self.activate(&mut core, *generation);
                }
            }
            SessionEvent::Disconnected { .. } => {
                let mut core = self.core.lock();
                if matches!(core.state, BindingState::Subscribed { .. }) {
                    core.state = BindingState::Waiting;
                }
            }
            SessionEvent::Error(_) => {}
        }
    }

    /// Registers the topic listener (once) and subscribes the auction.
    fn activate(self: &Arc<Self>, core: &mut Core, generation: u64) {
        let Some(auction_id) = core.auction else {
            return;
        };

        if core.topic.is_disposed() {
            let weak = Arc::downgrade(self);
            core.topic = self
                .socket
                .on_topic(&auction_topic(auction_id), move |payload| {
                    if let Some(inner) = weak.upgrade() {
                        inner.dispatch(payload);
                    }
                });
        }

        if self.socket.subscribe_to_auction(auction_id).is_active() {
            debug!(
                "Auction {} bound on session generation {}",
                auction_id, generation
            );
            core.state = BindingState::Subscribed { generation };
        }
    }

    fn dispatch(&self, payload: &Value) {
        let envelope = Envelope::classify(payload.clone());
        let handler = {
            let handlers = self.handlers.lock();
            if envelope.is_bid() {
                handlers.on_bid.clone()
            } else {
                handlers.on_update.clone()
            }
        };
        if let Some(handler) = handler {
            handler(&envelope);
        }
    }

    /// Disposes both listeners and drops the topic if nobody else listens.
    fn release(&self, core: &mut Core) {
        core.session.dispose();
        core.topic.dispose();

        if let Some(auction_id) = core.auction.take() {
            let topic = auction_topic(auction_id);
            if self.socket.listener_count(&topic) == 0 && self.socket.is_subscribed(&topic) {
                self.socket.unsubscribe_from_auction(auction_id);
            }
            debug!("Auction {} unbound", auction_id);
        }
    }
}

/// Binds one auction to a socket for one consumer.
///
/// ```no_run
/// # use gavel_sdk::ws::{AuctionBinding, AuctionSocket};
/// # fn demo(socket: &AuctionSocket) {
/// let binding = AuctionBinding::new(socket);
/// binding.set_handlers(
///     |bid| println!("bid: {}", bid.payload),
///     |update| println!("update: {}", update.payload),
/// );
/// binding.bind(Some("7"));
/// # }
/// ```
pub struct AuctionBinding {
    inner: Arc<BindingInner>,
}

impl AuctionBinding {
    /// Creates an idle binding on `socket`.
    #[must_use]
    pub fn new(socket: &AuctionSocket) -> Self {
        Self {
            inner: Arc::new(BindingInner {
                socket: socket.clone(),
                handlers: Mutex::new(Handlers::default()),
                core: Mutex::new(Core {
                    state: BindingState::Idle,
                    auction: None,
                    session: Disposer::noop(),
                    topic: Disposer::noop(),
                }),
            }),
        }
    }

    /// Binds to an auction identifier as handed over by the consumer.
    ///
    /// Missing, empty, placeholder and non-numeric identifiers release any
    /// previous auction and leave the binding idle. Binding the same auction
    /// again does nothing unless the socket dropped the binding's listeners
    /// on disconnect, in which case they are registered again. A new auction
    /// is subscribed once the session is ready, and again after every
    /// reconnect.
    pub fn bind(&self, raw_id: Option<&str>) {
        let mut core = self.inner.core.lock();
        if core.state == BindingState::TornDown {
            warn!("Ignoring bind on an unmounted binding");
            return;
        }

        let Some(auction_id) = AuctionId::parse(raw_id) else {
            if core.auction.is_some() {
                self.inner.release(&mut core);
            }
            core.state = BindingState::Idle;
            return;
        };

        if core.auction == Some(auction_id) && !core.session.is_disposed() {
            return;
        }
        if core.auction.is_some() {
            self.inner.release(&mut core);
        }

        core.auction = Some(auction_id);
        core.state = BindingState::Waiting;

        let weak: Weak<BindingInner> = Arc::downgrade(&self.inner);
        core.session = self.inner.socket.on_session(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_session(event);
            }
        });

        if let Some(generation) = self.inner.socket.session_generation() {
            self.inner.activate(&mut core, generation);
        }
    }

    /// Replaces both handlers. Takes effect for the next message; the
    /// subscription is left alone.
    pub fn set_handlers<B, U>(&self, on_bid: B, on_update: U)
    where
        B: Fn(&Envelope) + Send + Sync + 'static,
        U: Fn(&Envelope) + Send + Sync + 'static,
    {
        let mut handlers = self.inner.handlers.lock();
        handlers.on_bid = Some(Arc::new(on_bid));
        handlers.on_update = Some(Arc::new(on_update));
    }

    /// Replaces the bid handler.
    pub fn on_bid<F>(&self, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.inner.handlers.lock().on_bid = Some(Arc::new(handler));
    }

    /// Replaces the update handler.
    pub fn on_update<F>(&self, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.inner.handlers.lock().on_update = Some(Arc::new(handler));
    }

    /// Releases the current auction. The binding can be bound again.
    pub fn unbind(&self) {
        let mut core = self.inner.core.lock();
        if core.state == BindingState::TornDown {
            return;
        }
        self.inner.release(&mut core);
        core.state = BindingState::Idle;
    }

    /// Releases the current auction and retires the binding.
    pub fn unmount(&self) {
        let mut core = self.inner.core.lock();
        if core.state == BindingState::TornDown {
            return;
        }
        self.inner.release(&mut core);
        core.state = BindingState::TornDown;
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> BindingState {
        self.inner.core.lock().state
    }

    /// Returns the bound auction.
    #[must_use]
    pub fn auction(&self) -> Option<AuctionId> {
        self.inner.core.lock().auction
    }
}

impl fmt::Debug for AuctionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("AuctionBinding")
            .field("state", &core.state)
            .field("auction", &core.auction)
            .finish()
    }
}

impl Drop for AuctionBinding {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::*;
    use crate::ws::client::ConnectionState;
    use crate::ws::config::WsConfig;
    use crate::ws::frame::{Command, Frame};
    use crate::ws::messages::MessageKind;
    use crate::ws::transport::testing::{MemoryConnector, ServerEnd};

    struct Fixture {
        socket: AuctionSocket,
        accepted: UnboundedReceiver<ServerEnd>,
    }

    impl Fixture {
        fn new() -> Self {
            let config = WsConfig::new("ws://test.local/ws-auction/websocket")
                .with_heartbeat(Duration::ZERO, Duration::ZERO)
                .with_reconnect_delay(Duration::from_millis(20));
            let (connector, accepted) = MemoryConnector::new();
            let socket = AuctionSocket::with_connector(config, connector).expect("socket");
            Self { socket, accepted }
        }

        async fn accept(&mut self) -> ServerEnd {
            let mut server = tokio::time::timeout(Duration::from_secs(2), self.accepted.recv())
                .await
                .expect("link opened")
                .expect("connector alive");
            server.expect(Command::Connect).await;
            server.accept("s-1");
            server
        }

        async fn connect(&mut self) -> ServerEnd {
            self.socket.connect(Some("tok1"));
            let server = self.accept().await;
            let mut state = self.socket.state();
            tokio::time::timeout(
                Duration::from_secs(2),
                state.wait_for(|s| *s == ConnectionState::Connected),
            )
            .await
            .expect("connected")
            .expect("sender alive");
            server
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition reached");
    }

    async fn expect_subscribe(server: &mut ServerEnd, destination: &str) -> Frame {
        loop {
            let frame = server.expect(Command::Subscribe).await;
            if frame.header("destination") == Some(destination) {
                return frame;
            }
        }
    }

    fn recorder(binding: &AuctionBinding) -> UnboundedReceiver<(&'static str, Envelope)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let bids = tx.clone();
        binding.set_handlers(
            move |envelope| {
                let _ = bids.send(("bid", envelope.clone()));
            },
            move |envelope| {
                let _ = tx.send(("update", envelope.clone()));
            },
        );
        rx
    }

    async fn next(rx: &mut UnboundedReceiver<(&'static str, Envelope)>) -> (&'static str, Envelope) {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("handler called")
            .expect("handler alive")
    }

    #[tokio::test]
    async fn test_placeholder_ids_stay_idle() {
        let mut fixture = Fixture::new();
        let _server = fixture.connect().await;
        let binding = AuctionBinding::new(&fixture.socket);

        for raw in [None, Some(""), Some("undefined"), Some("null"), Some("0"), Some("x")] {
            binding.bind(raw);
            assert_eq!(binding.state(), BindingState::Idle);
            assert!(binding.auction().is_none());
        }
        assert!(fixture
            .socket
            .active_topics()
            .iter()
            .all(|topic| !topic.starts_with("/topic/auction/")));
    }

    #[tokio::test]
    async fn test_bind_routes_bids_and_updates() {
        let mut fixture = Fixture::new();
        let mut server = fixture.connect().await;
        let binding = AuctionBinding::new(&fixture.socket);
        let mut rx = recorder(&binding);

        binding.bind(Some("7"));
        assert!(matches!(binding.state(), BindingState::Subscribed { .. }));

        let sub = expect_subscribe(&mut server, "/topic/auction/7").await;
        let sub_id = sub.header("id").expect("id").to_string();

        server.publish(&sub_id, "/topic/auction/7", r#"{"type":"BID","amount":600}"#);
        let (kind, envelope) = next(&mut rx).await;
        assert_eq!(kind, "bid");
        assert_eq!(envelope.kind, MessageKind::Bid);

        server.publish(&sub_id, "/topic/auction/7", r#"{"type":"AUCTION_ENDED"}"#);
        assert_eq!(next(&mut rx).await.0, "update");

        server.publish(&sub_id, "/topic/auction/7", r#"{"valueBid":650}"#);
        let (kind, envelope) = next(&mut rx).await;
        assert_eq!(kind, "bid");
        assert!(envelope.legacy);

        server.publish(&sub_id, "/topic/auction/7", r#"{"status":"ENCERRADO"}"#);
        assert_eq!(next(&mut rx).await.0, "update");
    }

    #[tokio::test]
    async fn test_bind_before_connect_waits_for_ready() {
        let mut fixture = Fixture::new();
        let binding = AuctionBinding::new(&fixture.socket);

        binding.bind(Some("7"));
        assert_eq!(binding.state(), BindingState::Waiting);

        fixture.socket.connect(None);
        let mut server = fixture.accept().await;
        expect_subscribe(&mut server, "/topic/auction/7").await;

        wait_until(|| matches!(binding.state(), BindingState::Subscribed { generation: 1 })).await;
        assert!(fixture.socket.is_subscribed("/topic/auction/7"));
    }

    #[tokio::test]
    async fn test_switching_auctions_releases_previous() {
        let mut fixture = Fixture::new();
        let mut server = fixture.connect().await;
        let binding = AuctionBinding::new(&fixture.socket);

        binding.bind(Some("1"));
        let first = expect_subscribe(&mut server, "/topic/auction/1").await;

        binding.bind(Some("2"));
        let unsubscribe = server.expect(Command::Unsubscribe).await;
        assert_eq!(unsubscribe.header("id"), first.header("id"));
        expect_subscribe(&mut server, "/topic/auction/2").await;

        assert_eq!(binding.auction(), Some(AuctionId::new(2)));
        assert!(!fixture.socket.is_subscribed("/topic/auction/1"));
        assert!(fixture.socket.is_subscribed("/topic/auction/2"));
        assert_eq!(fixture.socket.listener_count("/topic/auction/1"), 0);
        assert_eq!(fixture.socket.listener_count("/topic/auction/2"), 1);
    }

    #[tokio::test]
    async fn test_switched_away_auction_delivers_nothing() {
        let mut fixture = Fixture::new();
        let mut server = fixture.connect().await;
        let binding = AuctionBinding::new(&fixture.socket);
        let mut rx = recorder(&binding);

        binding.bind(Some("1"));
        let first = expect_subscribe(&mut server, "/topic/auction/1").await;
        let first_id = first.header("id").expect("id").to_string();

        binding.bind(Some("2"));
        let second = expect_subscribe(&mut server, "/topic/auction/2").await;
        let second_id = second.header("id").expect("id").to_string();

        server.publish(&first_id, "/topic/auction/1", r#"{"type":"BID","amount":11}"#);
        server.publish(&second_id, "/topic/auction/2", r#"{"type":"BID","amount":22}"#);

        let (kind, envelope) = next(&mut rx).await;
        assert_eq!(kind, "bid");
        assert_eq!(envelope.payload["amount"], 22);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rebind_after_disconnect_and_connect() {
        let mut fixture = Fixture::new();
        let mut server = fixture.connect().await;
        let binding = AuctionBinding::new(&fixture.socket);
        let mut rx = recorder(&binding);

        binding.bind(Some("7"));
        expect_subscribe(&mut server, "/topic/auction/7").await;

        fixture.socket.disconnect();
        assert_eq!(binding.state(), BindingState::Waiting);
        assert_eq!(fixture.socket.listener_count("/topic/auction/7"), 0);

        let mut server = fixture.connect().await;
        binding.bind(Some("7"));
        let sub = expect_subscribe(&mut server, "/topic/auction/7").await;
        assert!(matches!(binding.state(), BindingState::Subscribed { .. }));
        assert_eq!(fixture.socket.listener_count("/topic/auction/7"), 1);

        let sub_id = sub.header("id").expect("id").to_string();
        server.publish(&sub_id, "/topic/auction/7", r#"{"type":"BID","amount":3}"#);
        assert_eq!(next(&mut rx).await.0, "bid");
    }

    #[tokio::test]
    async fn test_resubscribes_after_reconnect() {
        let mut fixture = Fixture::new();
        let mut server = fixture.connect().await;
        let binding = AuctionBinding::new(&fixture.socket);
        let mut rx = recorder(&binding);

        binding.bind(Some("7"));
        expect_subscribe(&mut server, "/topic/auction/7").await;

        server.drop_link();
        wait_until(|| binding.state() == BindingState::Waiting).await;

        let mut server = fixture.accept().await;
        let sub = expect_subscribe(&mut server, "/topic/auction/7").await;
        wait_until(|| matches!(binding.state(), BindingState::Subscribed { generation: 2 })).await;
        assert_eq!(fixture.socket.listener_count("/topic/auction/7"), 1);

        let sub_id = sub.header("id").expect("id").to_string();
        server.publish(&sub_id, "/topic/auction/7", r#"{"type":"BID","amount":1}"#);
        assert_eq!(next(&mut rx).await.0, "bid");
    }

    #[tokio::test]
    async fn test_latest_handlers_are_used() {
        let mut fixture = Fixture::new();
        let mut server = fixture.connect().await;
        let binding = AuctionBinding::new(&fixture.socket);
        let mut old = recorder(&binding);

        binding.bind(Some("7"));
        let sub = expect_subscribe(&mut server, "/topic/auction/7").await;
        let sub_id = sub.header("id").expect("id").to_string();

        let mut new = recorder(&binding);
        assert!(server
            .drain()
            .await
            .iter()
            .all(|f| f.command != Command::Subscribe));

        server.publish(&sub_id, "/topic/auction/7", r#"{"type":"BID","amount":2}"#);
        assert_eq!(next(&mut new).await.0, "bid");
        assert!(old.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let mut fixture = Fixture::new();
        let mut server = fixture.connect().await;
        let binding = AuctionBinding::new(&fixture.socket);

        binding.bind(Some("7"));
        expect_subscribe(&mut server, "/topic/auction/7").await;

        binding.unbind();
        binding.unbind();
        assert_eq!(binding.state(), BindingState::Idle);
        assert_eq!(fixture.socket.listener_count("/topic/auction/7"), 0);
        assert!(!fixture.socket.is_subscribed("/topic/auction/7"));

        let frames = server.drain().await;
        let unsubscribes = frames
            .iter()
            .filter(|f| f.command == Command::Unsubscribe)
            .count();
        assert_eq!(unsubscribes, 1);

        binding.unmount();
        binding.unmount();
        assert_eq!(binding.state(), BindingState::TornDown);
        binding.bind(Some("8"));
        assert_eq!(binding.state(), BindingState::TornDown);
        assert!(!fixture.socket.is_subscribed("/topic/auction/8"));
    }

    #[tokio::test]
    async fn test_unmounted_binding_delivers_nothing() {
        let mut fixture = Fixture::new();
        let mut server = fixture.connect().await;
        let binding = AuctionBinding::new(&fixture.socket);
        let mut rx = recorder(&binding);
        let other = AuctionBinding::new(&fixture.socket);
        let mut other_rx = recorder(&other);

        binding.bind(Some("7"));
        let sub = expect_subscribe(&mut server, "/topic/auction/7").await;
        let sub_id = sub.header("id").expect("id").to_string();
        other.bind(Some("8"));
        let other_sub = expect_subscribe(&mut server, "/topic/auction/8").await;
        let other_id = other_sub.header("id").expect("id").to_string();

        binding.unmount();
        server.publish(&sub_id, "/topic/auction/7", r#"{"type":"BID","amount":70}"#);
        server.publish(&other_id, "/topic/auction/8", r#"{"type":"BID","amount":80}"#);

        let (_, envelope) = next(&mut other_rx).await;
        assert_eq!(envelope.payload["amount"], 80);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shared_topic_outlives_one_binding() {
        let mut fixture = Fixture::new();
        let mut server = fixture.connect().await;
        let first = AuctionBinding::new(&fixture.socket);
        let second = AuctionBinding::new(&fixture.socket);

        first.bind(Some("7"));
        second.bind(Some("7"));
        expect_subscribe(&mut server, "/topic/auction/7").await;
        assert_eq!(fixture.socket.listener_count("/topic/auction/7"), 2);

        drop(first);
        assert!(fixture.socket.is_subscribed("/topic/auction/7"));
        assert_eq!(fixture.socket.listener_count("/topic/auction/7"), 1);

        drop(second);
        assert!(!fixture.socket.is_subscribed("/topic/auction/7"));
    }
}
