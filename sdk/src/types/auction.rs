//! Auction types for the Gavel SDK.
//!
//! Provides the auction record returned by the HTTP API.

use chrono::{DateTime, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use super::bid::BidEvent;
use super::primitives::AuctionId;

/// Auction lifecycle status.
///
/// The backend has used both Portuguese and English labels over time, so
/// each status accepts the known aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuctionStatus {
    /// Not yet open for bids.
    #[serde(alias = "AGENDADO", alias = "PENDING")]
    Scheduled,
    /// Accepting bids.
    #[serde(alias = "ATIVO", alias = "ABERTO", alias = "ACTIVE")]
    Open,
    /// Closed.
    #[serde(alias = "ENCERRADO", alias = "FINALIZADO", alias = "CLOSED")]
    Finished,
    /// A status this client does not know.
    #[serde(other)]
    Unknown,
}

/// An auction as listed by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Auction {
    /// Auction identifier.
    pub id_auction: AuctionId,

    /// Title.
    #[serde(default)]
    pub title: String,

    /// Short description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Lifecycle status.
    pub status: AuctionStatus,

    /// Highest accepted bid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_bid: Option<Decimal>,

    /// Name of the current leader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_bid_user: Option<String>,

    /// Opening bid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_bid: Option<Decimal>,

    /// Smallest bid the server will accept next.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_minimum_bid: Option<Decimal>,

    /// Minimum increment between bids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_increment: Option<Decimal>,

    /// Number of accepted bids.
    #[serde(default)]
    pub total_bids: u32,

    /// Opening time.
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_time: Option<NaiveDateTime>,

    /// Closing time.
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<NaiveDateTime>,
}

impl Auction {
    /// Returns true if the auction accepts bids.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == AuctionStatus::Open
    }

    /// Mirrors a live bid into this record.
    ///
    /// Only fields the server already decided are copied; bids for other
    /// auctions and bids below the current one are ignored. Returns true if
    /// the record changed.
    pub fn apply_bid(&mut self, bid: &BidEvent) -> bool {
        if bid.auction_id.is_some_and(|id| id != self.id_auction) {
            return false;
        }
        let Some(amount) = bid.amount else {
            return false;
        };
        if self.current_bid.is_some_and(|current| amount < current) {
            return false;
        }

        self.current_bid = Some(amount);
        self.total_bids = self.total_bids.saturating_add(1);
        if bid.bidder.is_some() {
            self.current_bid_user.clone_from(&bid.bidder);
        }
        true
    }
}

/// Accepts ISO timestamps with or without an offset; anything else is
/// treated as absent.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        s.parse::<NaiveDateTime>()
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.naive_utc()))
    }))
}
