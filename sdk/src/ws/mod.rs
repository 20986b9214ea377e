//! Real-time auction notifications.
//!
//! This module provides the STOMP-over-WebSocket client used to follow live
//! auctions: one shared [`AuctionSocket`] per process, a subscription router
//! that fans inbound messages out to listeners, and [`AuctionBinding`] for
//! consumers interested in a single auction.
//!
//! # Example
//!
//! ```rust,no_run
//! use gavel_sdk::ws::{AuctionBinding, AuctionSocket, GlobalTopic};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let socket = AuctionSocket::with_url("wss://gavel.example/ws-auction/websocket")?;
//!
//!     // Every bid on every auction
//!     let _bids = socket.on(GlobalTopic::Bids.event_name(), |payload| {
//!         println!("bid: {}", payload);
//!     });
//!
//!     // Connect in the background
//!     socket.connect(Some("eyJhbGciOi..."));
//!
//!     // Follow one auction, re-subscribed after every reconnect
//!     let binding = AuctionBinding::new(&socket);
//!     binding.on_bid(|bid| println!("auction 7 bid: {:?}", bid.as_bid()));
//!     binding.bind(Some("7"));
//!
//!     tokio::signal::ctrl_c().await?;
//!     socket.close().await;
//!     Ok(())
//! }
//! ```

pub mod binding;
pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod listeners;
pub mod messages;
pub mod metrics;
pub(crate) mod router;
mod session;
pub mod transport;

pub use binding::{AuctionBinding, BindingState, EnvelopeHandler};
pub use client::{AuctionSocket, ConnectionState, SessionEvent, SubscribeOutcome};
pub use config::WsConfig;
pub use error::WsError;
pub use listeners::{Callback, DispatchReport, Disposer};
pub use messages::{Envelope, GlobalTopic, MessageKind, PlaceBid};
pub use metrics::{SocketMetrics, SocketMetricsSnapshot};
pub use transport::{Connector, TransportLink, WebSocketConnector};
