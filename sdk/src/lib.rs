//! Gavel SDK - Rust client library for Gavel live auctions.
//!
//! This crate keeps a persistent STOMP-over-WebSocket session to the Gavel
//! auction server and turns it into typed, per-auction notifications.
//!
//! # Modules
//!
//! - [`ws`] — [`AuctionSocket`], the shared session with automatic
//!   reconnect, topic routing and listener dispatch, plus
//!   [`AuctionBinding`] for following a single auction
//! - [`auth`] — [`AuthSession`], which connects on login and disconnects on
//!   logout
//! - [`client`] — [`AuctionClient`], the REST client for login and auction
//!   lookup
//! - [`types`] — [`Auction`], [`BidEvent`] and [`AuctionId`]
//!
//! # Example
//!
//! ```rust,no_run
//! use gavel_sdk::{AuctionBinding, AuctionClient, AuctionSocket, AuthSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = AuctionClient::with_base_url("https://gavel.example/api")?;
//!     let auth = AuthSession::new(AuctionSocket::with_url("wss://gavel.example/ws-auction/websocket")?);
//!
//!     auth.login_with_password(&client, "ana", "secret").await?;
//!
//!     let binding = AuctionBinding::new(auth.socket());
//!     binding.on_bid(|bid| println!("{:?}", bid.as_bid()));
//!     binding.bind(Some("7"));
//!
//!     tokio::signal::ctrl_c().await?;
//!     auth.logout();
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod types;
pub mod ws;

pub use auth::{AuthError, AuthSession, Claims};
pub use client::{ApiResponse, AuctionClient, ClientConfig, ClientError};
pub use error::SdkError;
pub use types::{Auction, AuctionId, AuctionStatus, BidEvent};
pub use ws::{
    AuctionBinding, AuctionSocket, ConnectionState, Envelope, MessageKind, SessionEvent,
    SubscribeOutcome, WsConfig, WsError,
};
