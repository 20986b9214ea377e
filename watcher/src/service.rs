//! Main watcher service.
//!
//! Logs in, follows the configured auctions and the global streams, and
//! logs everything that arrives until stopped.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gavel_sdk::auth::{AuthError, AuthSession};
use gavel_sdk::client::{AuctionClient, ClientError};
use gavel_sdk::ws::{AuctionBinding, AuctionSocket, Disposer, Envelope, GlobalTopic, WsError};
use gavel_sdk::AuctionId;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::config::{ConfigError, Credentials, WatcherConfig};

/// Watcher errors.
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    /// Invalid configuration.
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    /// The socket could not be created.
    #[error("socket: {0}")]
    Socket(#[from] WsError),

    /// The REST client could not be created.
    #[error("client: {0}")]
    Client(#[from] ClientError),

    /// Login failed.
    #[error("auth: {0}")]
    Auth(#[from] AuthError),
}

/// The watcher service.
pub struct WatcherService {
    /// Configuration.
    config: WatcherConfig,

    /// Auctions named in the configuration.
    configured: Vec<AuctionId>,

    /// REST client, authenticated after login.
    client: AuctionClient,

    /// Login state driving the socket.
    auth: AuthSession,

    /// One binding per followed auction.
    bindings: Vec<AuctionBinding>,

    /// Global stream listeners.
    listeners: Vec<Disposer>,

    /// Whether the service is running.
    running: Arc<AtomicBool>,

    /// Wakes `run` when `stop` is called.
    stop: Arc<Notify>,
}

impl WatcherService {
    /// Creates a new watcher service.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: WatcherConfig) -> Result<Self, WatcherError> {
        config.validate()?;
        let socket = AuctionSocket::new(config.ws_config())?;
        Self::with_socket(config, socket)
    }

    /// Creates a watcher service on an existing socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_socket(config: WatcherConfig, socket: AuctionSocket) -> Result<Self, WatcherError> {
        config.validate()?;
        let configured = config.parse_auctions()?;
        let client = AuctionClient::new(config.client_config())?;

        Ok(Self {
            config,
            configured,
            client,
            auth: AuthSession::new(socket),
            bindings: Vec::new(),
            listeners: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(Notify::new()),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Returns the socket.
    #[must_use]
    pub fn socket(&self) -> &AuctionSocket {
        self.auth.socket()
    }

    /// Returns the followed auctions.
    #[must_use]
    pub fn bindings(&self) -> &[AuctionBinding] {
        &self.bindings
    }

    /// Returns true if the service is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stops the service.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.stop.notify_one();
        info!("Watcher stop requested");
    }

    /// Logs in, connects, and starts following auctions.
    ///
    /// # Errors
    ///
    /// Returns an error if login fails.
    pub async fn start(&mut self) -> Result<(), WatcherError> {
        self.authenticate().await?;
        self.register_global_listeners();

        let auctions = self.resolve_auctions().await;
        self.bind_auctions(&auctions);

        self.running.store(true, Ordering::Relaxed);
        info!("Watcher started with {} auctions", self.bindings.len());
        Ok(())
    }

    /// Runs the service until ctrl-c or [`stop`](Self::stop).
    ///
    /// # Errors
    ///
    /// Returns an error if login fails.
    pub async fn run(&mut self) -> Result<(), WatcherError> {
        self.start().await?;

        let stop = Arc::clone(&self.stop);
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for ctrl-c: {}", e);
                }
            }
            () = stop.notified() => {}
        }

        self.shutdown();
        Ok(())
    }

    /// Releases every auction, logs out and logs the final metrics.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);

        for binding in self.bindings.drain(..) {
            binding.unmount();
        }
        for mut listener in self.listeners.drain(..) {
            listener.dispose();
        }
        self.auth.logout();

        let metrics = self.socket().metrics().snapshot();
        info!(
            "Watcher stopped: {} sessions, {} frames in, {} frames out, {} messages dispatched, {} decode failures, {} listener panics, up {:?}",
            metrics.sessions_established,
            metrics.frames_received,
            metrics.frames_sent,
            metrics.messages_dispatched,
            metrics.decode_failures,
            metrics.listener_panics,
            metrics.uptime
        );
    }

    async fn authenticate(&mut self) -> Result<(), WatcherError> {
        let token = match self.config.credentials() {
            Credentials::Token(token) => {
                self.auth.login(&token)?;
                token
            }
            Credentials::Password { user, password } => {
                self.auth
                    .login_with_password(&self.client, &user, &password)
                    .await?;
                self.auth.credential().ok_or(AuthError::InvalidToken(
                    "credential missing after login".to_string(),
                ))?
            }
            Credentials::Anonymous => {
                info!("No credentials configured, following public topics only");
                self.socket().connect(None);
                return Ok(());
            }
        };

        self.client = self.client.with_token(token)?;
        Ok(())
    }

    fn register_global_listeners(&mut self) {
        for topic in GlobalTopic::ALL {
            let event = topic.event_name();
            let disposer = self.socket().on(event, move |payload| {
                let envelope = Envelope::classify(payload.clone());
                info!("[{}] {}", event, describe(&envelope));
            });
            self.listeners.push(disposer);
        }
    }

    /// Returns the configured auctions, plus every open auction when
    /// `watch_open` is set.
    async fn resolve_auctions(&self) -> Vec<AuctionId> {
        let mut auctions: BTreeSet<AuctionId> = self.configured.iter().copied().collect();

        if self.config.watch_open {
            match self.client.get_auctions().await {
                Ok(response) => {
                    let open = response.data.iter().filter(|auction| auction.is_open());
                    for auction in open {
                        debug!("Open auction {}: {}", auction.id_auction, auction.title);
                        auctions.insert(auction.id_auction);
                    }
                }
                Err(e) => warn!("Could not list open auctions: {}", e),
            }
        }

        auctions.into_iter().collect()
    }

    fn bind_auctions(&mut self, auctions: &[AuctionId]) {
        for &auction_id in auctions {
            if self.bindings.iter().any(|b| b.auction() == Some(auction_id)) {
                continue;
            }

            let binding = AuctionBinding::new(self.socket());
            binding.set_handlers(
                move |envelope| info!("Auction {} bid: {}", auction_id, describe(envelope)),
                move |envelope| info!("Auction {} update: {}", auction_id, describe(envelope)),
            );
            binding.bind(Some(&auction_id.to_string()));
            self.bindings.push(binding);
        }
    }
}

/// Renders a payload for the log.
#[must_use]
pub fn describe(envelope: &Envelope) -> String {
    if let Some(bid) = envelope.as_bid() {
        let amount = bid
            .amount
            .map_or_else(|| "?".to_string(), |amount| amount.to_string());
        return match bid.bidder {
            Some(bidder) => format!("{} by {}", amount, bidder),
            None => amount,
        };
    }

    let legacy = if envelope.legacy { " (untagged)" } else { "" };
    format!("{:?}{} {}", envelope.kind, legacy, envelope.payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::{BoxFuture, FutureExt};
    use gavel_sdk::ws::{BindingState, ConnectionState, Connector, TransportLink, WsConfig};
    use serde_json::json;
    use std::time::Duration;

    /// Refuses every connection, so the socket stays in its retry loop.
    struct Refuse;

    impl Connector for Refuse {
        fn open(&self, _url: String) -> BoxFuture<'static, Result<TransportLink, WsError>> {
            async { Err(WsError::Connection("refused".to_string())) }.boxed()
        }
    }

    fn create_service(config: WatcherConfig) -> WatcherService {
        let ws = config
            .ws_config()
            .with_reconnect_delay(Duration::from_millis(20));
        let socket = AuctionSocket::with_connector(ws, Refuse).expect("socket");
        WatcherService::with_socket(config, socket).expect("service")
    }

    #[test]
    fn test_service_new() {
        let service = WatcherService::new(WatcherConfig::default());
        assert!(service.is_ok());
    }

    #[test]
    fn test_service_new_invalid_config() {
        let config = WatcherConfig::default().with_auctions(vec!["abc".to_string()]);
        assert!(matches!(
            WatcherService::new(config),
            Err(WatcherError::Config(ConfigError::InvalidAuctionId(_)))
        ));
    }

    #[test]
    fn test_service_is_running() {
        let service = WatcherService::new(WatcherConfig::default()).expect("service");
        assert!(!service.is_running());
        service.stop();
        assert!(!service.is_running());
    }

    #[test]
    fn test_describe_bid() {
        let envelope = Envelope::classify(json!({
            "type": "BID",
            "auctionId": 7,
            "amount": 150,
            "bidder": "ana"
        }));
        assert_eq!(describe(&envelope), "150 by ana");

        let legacy = Envelope::classify(json!({"valueBid": 20}));
        assert_eq!(describe(&legacy), "20");
    }

    #[test]
    fn test_describe_update() {
        let envelope = Envelope::classify(json!({"status": "ENCERRADO"}));
        assert_eq!(
            describe(&envelope),
            r#"AuctionUpdate (untagged) {"status":"ENCERRADO"}"#
        );
    }

    #[tokio::test]
    async fn test_start_anonymous_binds_configured_auctions() {
        let config = WatcherConfig::default().with_auctions(vec!["9".to_string(), "7".to_string()]);
        let mut service = create_service(config);

        service.start().await.expect("start");

        assert!(service.is_running());
        let bound: Vec<_> = service
            .bindings()
            .iter()
            .map(|b| (b.auction(), b.state()))
            .collect();
        assert_eq!(
            bound,
            vec![
                (Some(AuctionId::new(7)), BindingState::Waiting),
                (Some(AuctionId::new(9)), BindingState::Waiting),
            ]
        );
        assert_eq!(
            service.socket().listener_count(GlobalTopic::Bids.event_name()),
            1
        );

        service.shutdown();
        assert!(!service.is_running());
        assert!(service.bindings().is_empty());
        assert_eq!(
            service.socket().listener_count(GlobalTopic::Bids.event_name()),
            0
        );
        assert_eq!(*service.socket().state().borrow(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_start_with_invalid_token_fails() {
        let config = WatcherConfig::default().with_token("not-a-jwt");
        let mut service = create_service(config);

        let result = service.start().await;
        assert!(matches!(result, Err(WatcherError::Auth(_))));
        assert!(!service.is_running());
        assert_eq!(*service.socket().state().borrow(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_watch_open_survives_unreachable_api() {
        let config = WatcherConfig {
            api_url: "http://127.0.0.1:9".to_string(),
            watch_open: true,
            auctions: vec!["3".to_string()],
            ..Default::default()
        };
        let mut service = create_service(config);

        service.start().await.expect("start");
        assert_eq!(service.bindings().len(), 1);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_run_returns_after_stop() {
        let mut service = create_service(WatcherConfig::default());
        let stop = Arc::clone(&service.stop);
        let running = Arc::clone(&service.running);

        tokio::spawn(async move {
            while !running.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            stop.notify_one();
        });

        tokio::time::timeout(Duration::from_secs(2), service.run())
            .await
            .expect("run returns")
            .expect("run ok");
        assert!(!service.is_running());
    }

    #[test]
    fn test_ws_config_is_used() {
        let config = WatcherConfig {
            heartbeat_ms: 0,
            ..Default::default()
        };
        let service = create_service(config);
        let ws: &WsConfig = service.socket().config();
        assert!(ws.heartbeat_outgoing.is_zero());
        assert_eq!(ws.reconnect_delay, Duration::from_millis(20));
    }
}
