//! HTTP client for the Gavel REST API.
//!
//! Login and auction lookup. Live updates go through [`crate::ws`].
//!
//! # Example
//!
//! ```rust,no_run
//! use gavel_sdk::client::AuctionClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = AuctionClient::with_base_url("https://gavel.example/api")?;
//!
//!     let token = client.login("ana", "secret").await?;
//!     let client = client.with_token(token)?;
//!
//!     let auctions = client.get_auctions().await?;
//!     println!("Found {} auctions", auctions.data.len());
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod http;

pub use config::ClientConfig;
pub use error::ClientError;
pub use http::{ApiResponse, AuctionClient};
