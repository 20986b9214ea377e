//! Bid types for the Gavel SDK.
//!
//! Provides the typed view of a live bid payload.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::primitives::AuctionId;

/// A bid announced by the server.
///
/// Field names vary between the per-auction and global bid streams, so
/// the amount and bidder accept their known aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidEvent {
    /// Auction the bid belongs to.
    #[serde(default, alias = "idAuction")]
    pub auction_id: Option<AuctionId>,

    /// Accepted amount.
    #[serde(default, alias = "valueBid", alias = "bidAmount")]
    pub amount: Option<Decimal>,

    /// Display name of the bidder.
    #[serde(default, alias = "userName")]
    pub bidder: Option<String>,

    /// Server timestamp, as sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}
