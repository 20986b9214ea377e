//! Core types for the Gavel SDK.
//!
//! Auction records from the HTTP API and the typed views of live payloads.

pub mod auction;
pub mod bid;
pub mod primitives;

pub use auction::{Auction, AuctionStatus};
pub use bid::BidEvent;
pub use primitives::AuctionId;
