//! Primitive types for the Gavel SDK.
//!
//! Provides the auction identifier and its validation rules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SdkError;

/// Raw identifiers that mean "not resolved yet" rather than a real auction.
const PLACEHOLDERS: [&str; 3] = ["undefined", "null", "0"];

/// An auction identifier.
///
/// Identifiers are positive integers on the wire. Zero is reserved as the
/// placeholder value and never names a real auction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuctionId(u64);

impl AuctionId {
    /// Creates an identifier.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns true for the placeholder identifier.
    #[must_use]
    pub const fn is_placeholder(&self) -> bool {
        self.0 == 0
    }

    /// Parses an identifier handed over by a consumer that may not have
    /// resolved it yet.
    ///
    /// Returns `None` for absent, empty, placeholder (`"undefined"`,
    /// `"null"`, `"0"`) and non-numeric input.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        let raw = raw?.trim();
        if raw.is_empty() || PLACEHOLDERS.contains(&raw) {
            return None;
        }
        raw.parse().ok()
    }
}

impl fmt::Display for AuctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AuctionId {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u64 = s
            .trim()
            .parse()
            .map_err(|_| SdkError::InvalidAuctionId(s.to_string()))?;
        if value == 0 {
            return Err(SdkError::InvalidAuctionId(s.to_string()));
        }
        Ok(Self(value))
    }
}

impl From<u64> for AuctionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<AuctionId> for u64 {
    fn from(id: AuctionId) -> Self {
        id.0
    }
}
