//! SDK error types.
//!
//! Provides error types for SDK value parsing.

/// SDK errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SdkError {
    /// Invalid auction identifier.
    #[error("invalid auction id: {0}")]
    InvalidAuctionId(String),
}
