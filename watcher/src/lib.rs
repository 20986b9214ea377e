//! Gavel Watcher - follows live auctions and logs what happens.
//!
//! This crate wires the Gavel SDK into a long-running process: it logs in,
//! keeps the notification socket connected, follows a set of auctions and
//! logs every bid and auction event until stopped.
//!
//! # Components
//!
//! - [`config`]: Watcher configuration from `GAVEL_*` environment variables
//! - [`service`]: Main watcher service

pub mod config;
pub mod service;

pub use config::{ConfigError, Credentials, WatcherConfig};
pub use service::{describe, WatcherError, WatcherService};
