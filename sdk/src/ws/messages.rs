//! WebSocket message types.
//!
//! Topic and destination names, outbound payloads, and the classification
//! of inbound payloads.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AuctionId, BidEvent};

/// Prefix of per-auction topics.
pub const AUCTION_TOPIC_PREFIX: &str = "/topic/auction/";

/// Event name used by [`subscribe_to_auction`](super::AuctionSocket::subscribe_to_auction).
pub const AUCTION_SPECIFIC_EVENT: &str = "auction_specific";

/// Bid placement destination.
pub const BID_DESTINATION: &str = "/app/bid";

/// Subscribe-intent destination.
pub const SUBSCRIBE_DESTINATION: &str = "/app/subscribe";

/// Unsubscribe-intent destination.
pub const UNSUBSCRIBE_DESTINATION: &str = "/app/unsubscribe";

/// Topics subscribed automatically on every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalTopic {
    /// Auction list updates.
    AuctionUpdates,
    /// Every bid on every auction.
    Bids,
    /// Auction started.
    AuctionStarted,
    /// Auction ended.
    AuctionEnded,
    /// Notifications addressed to the authenticated user.
    UserNotifications,
}

impl GlobalTopic {
    /// All global topics, in subscription order.
    pub const ALL: [Self; 5] = [
        Self::AuctionUpdates,
        Self::Bids,
        Self::AuctionStarted,
        Self::AuctionEnded,
        Self::UserNotifications,
    ];

    /// Returns the STOMP destination.
    #[must_use]
    pub const fn destination(self) -> &'static str {
        match self {
            Self::AuctionUpdates => "/topic/auctions",
            Self::Bids => "/topic/bids",
            Self::AuctionStarted => "/topic/auction-started",
            Self::AuctionEnded => "/topic/auction-ended",
            Self::UserNotifications => "/user/queue/notifications",
        }
    }

    /// Returns the event name listeners register for.
    #[must_use]
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::AuctionUpdates => "auction_update",
            Self::Bids => "new_bid",
            Self::AuctionStarted => "auction_started",
            Self::AuctionEnded => "auction_ended",
            Self::UserNotifications => "user_notification",
        }
    }

    /// Returns true if the topic needs a credential.
    #[must_use]
    pub const fn requires_auth(self) -> bool {
        matches!(self, Self::UserNotifications)
    }

    /// Returns the topics for a session, given whether it is authenticated.
    pub fn for_session(authenticated: bool) -> impl Iterator<Item = Self> {
        Self::ALL
            .into_iter()
            .filter(move |topic| authenticated || !topic.requires_auth())
    }
}

/// Returns the topic for one auction.
#[must_use]
pub fn auction_topic(id: AuctionId) -> String {
    format!("{}{}", AUCTION_TOPIC_PREFIX, id)
}

/// Maps a semantic event name to a destination.
///
/// Unknown names map to `/app/<event>`.
#[must_use]
pub fn destination_for(event: &str) -> String {
    match event {
        "place_bid" => BID_DESTINATION.to_string(),
        "subscribe_auction" => SUBSCRIBE_DESTINATION.to_string(),
        "unsubscribe_auction" => UNSUBSCRIBE_DESTINATION.to_string(),
        other => format!("/app/{}", other),
    }
}

/// Bid placement payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceBid {
    /// Auction being bid on.
    pub auction_id: AuctionId,
    /// Offered amount.
    pub bid_amount: Decimal,
}

/// Subscribe or unsubscribe intent payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionIntent {
    /// Auction concerned.
    pub auction_id: AuctionId,
}

/// Kind of an inbound payload, decoded from its `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// A bid was accepted.
    #[serde(alias = "NEW_BID")]
    Bid,
    /// Auction state changed.
    #[serde(alias = "UPDATE")]
    AuctionUpdate,
    /// Auction opened.
    AuctionStarted,
    /// Auction closed.
    AuctionEnded,
    /// User notification.
    Notification,
    /// A tag this client does not know.
    #[serde(other)]
    Unknown,
}

/// Untagged payload fields that mark a legacy bid.
const LEGACY_AMOUNT_FIELDS: [&str; 3] = ["valueBid", "amount", "bidAmount"];

/// A classified inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Payload kind.
    pub kind: MessageKind,
    /// True if the kind was inferred because the payload had no `type` tag.
    pub legacy: bool,
    /// The decoded JSON object.
    pub payload: Value,
}

impl Envelope {
    /// Classifies a decoded payload.
    ///
    /// A `type` tag always decides. Untagged payloads carrying a numeric
    /// `valueBid`, `amount` or `bidAmount` are legacy bids; any other
    /// untagged payload is an auction update.
    #[must_use]
    pub fn classify(payload: Value) -> Self {
        let tag = payload
            .get("type")
            .and_then(|tag| MessageKind::deserialize(tag).ok());

        match tag {
            Some(kind) => Self {
                kind,
                legacy: false,
                payload,
            },
            None => {
                let has_amount = LEGACY_AMOUNT_FIELDS
                    .iter()
                    .any(|field| payload.get(field).is_some_and(Value::is_number));
                Self {
                    kind: if has_amount {
                        MessageKind::Bid
                    } else {
                        MessageKind::AuctionUpdate
                    },
                    legacy: true,
                    payload,
                }
            }
        }
    }

    /// Returns true if this is a bid.
    #[must_use]
    pub fn is_bid(&self) -> bool {
        self.kind == MessageKind::Bid
    }

    /// Decodes the payload as a bid event.
    #[must_use]
    pub fn as_bid(&self) -> Option<BidEvent> {
        if !self.is_bid() {
            return None;
        }
        BidEvent::deserialize(&self.payload).ok()
    }
}
