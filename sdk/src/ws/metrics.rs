//! Socket metrics tracking.
//!
//! Provides atomic counters for monitoring the notification client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics for one [`AuctionSocket`](super::AuctionSocket).
#[derive(Debug)]
pub struct SocketMetrics {
    /// STOMP frames written to the transport (heartbeats excluded).
    frames_sent: AtomicU64,

    /// STOMP frames decoded from the transport (heartbeats excluded).
    frames_received: AtomicU64,

    /// Payloads accepted by `send`/`emit`.
    messages_published: AtomicU64,

    /// MESSAGE frames handed to listeners.
    messages_dispatched: AtomicU64,

    /// Inbound frames or bodies that failed to decode.
    decode_failures: AtomicU64,

    /// Listener callbacks that panicked.
    listener_panics: AtomicU64,

    /// Transport open attempts.
    connect_attempts: AtomicU64,

    /// Attempts that ended before CONNECTED.
    connect_failures: AtomicU64,

    /// Completed STOMP handshakes.
    sessions_established: AtomicU64,

    /// Heartbeats sent.
    heartbeats_sent: AtomicU64,

    /// Heartbeats received.
    heartbeats_received: AtomicU64,

    /// Connections dropped for silence.
    heartbeat_timeouts: AtomicU64,

    /// Start time for uptime.
    start_time: Instant,
}

impl Default for SocketMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            messages_dispatched: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            listener_panics: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            sessions_established: AtomicU64::new(0),
            heartbeats_sent: AtomicU64::new(0),
            heartbeats_received: AtomicU64::new(0),
            heartbeat_timeouts: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub(crate) fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_listener_panics(&self, count: usize) {
        if count > 0 {
            self.listener_panics
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session(&self) {
        self.sessions_established.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_heartbeat_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_heartbeat_received(&self) {
        self.heartbeats_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_heartbeat_timeout(&self) {
        self.heartbeat_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns frames sent.
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Returns frames received.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Returns messages published.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    /// Returns messages dispatched.
    #[must_use]
    pub fn messages_dispatched(&self) -> u64 {
        self.messages_dispatched.load(Ordering::Relaxed)
    }

    /// Returns decode failures.
    #[must_use]
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Returns listener panics.
    #[must_use]
    pub fn listener_panics(&self) -> u64 {
        self.listener_panics.load(Ordering::Relaxed)
    }

    /// Returns connect attempts.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Returns connect failures.
    #[must_use]
    pub fn connect_failures(&self) -> u64 {
        self.connect_failures.load(Ordering::Relaxed)
    }

    /// Returns sessions established.
    #[must_use]
    pub fn sessions_established(&self) -> u64 {
        self.sessions_established.load(Ordering::Relaxed)
    }

    /// Returns heartbeats sent.
    #[must_use]
    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent.load(Ordering::Relaxed)
    }

    /// Returns heartbeats received.
    #[must_use]
    pub fn heartbeats_received(&self) -> u64 {
        self.heartbeats_received.load(Ordering::Relaxed)
    }

    /// Returns heartbeat timeouts.
    #[must_use]
    pub fn heartbeat_timeouts(&self) -> u64 {
        self.heartbeat_timeouts.load(Ordering::Relaxed)
    }

    /// Returns the uptime.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns the fraction of attempts that reached CONNECTED (0.0 to 1.0).
    #[must_use]
    pub fn connect_success_rate(&self) -> f64 {
        let attempts = self.connect_attempts();
        if attempts > 0 {
            self.sessions_established() as f64 / attempts as f64
        } else {
            0.0
        }
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> SocketMetricsSnapshot {
        SocketMetricsSnapshot {
            frames_sent: self.frames_sent(),
            frames_received: self.frames_received(),
            messages_published: self.messages_published(),
            messages_dispatched: self.messages_dispatched(),
            decode_failures: self.decode_failures(),
            listener_panics: self.listener_panics(),
            connect_attempts: self.connect_attempts(),
            connect_failures: self.connect_failures(),
            sessions_established: self.sessions_established(),
            heartbeats_sent: self.heartbeats_sent(),
            heartbeats_received: self.heartbeats_received(),
            heartbeat_timeouts: self.heartbeat_timeouts(),
            uptime: self.uptime(),
        }
    }
}

/// A point-in-time snapshot of socket metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketMetricsSnapshot {
    /// Frames sent.
    pub frames_sent: u64,
    /// Frames received.
    pub frames_received: u64,
    /// Messages published.
    pub messages_published: u64,
    /// Messages dispatched.
    pub messages_dispatched: u64,
    /// Decode failures.
    pub decode_failures: u64,
    /// Listener panics.
    pub listener_panics: u64,
    /// Connect attempts.
    pub connect_attempts: u64,
    /// Connect failures.
    pub connect_failures: u64,
    /// Sessions established.
    pub sessions_established: u64,
    /// Heartbeats sent.
    pub heartbeats_sent: u64,
    /// Heartbeats received.
    pub heartbeats_received: u64,
    /// Heartbeat timeouts.
    pub heartbeat_timeouts: u64,
    /// Uptime.
    pub uptime: Duration,
}
