//! Heartbeat state
//!
//! Tracks liveness pings for one shard connection: when the last beat was
//! sent, whether it was acknowledged, and the measured round-trip latency.

use std::time::{Duration, Instant};

/// Heartbeat bookkeeping for one shard connection
///
/// The owning session drives the timer; this struct only records state and
/// answers the zombie question.
#[derive(Debug)]
pub struct Heartbeat {
    /// Interval supplied by the server's hello payload
    interval: Duration,

    /// When the most recent beat was sent
    last_sent_at: Option<Instant>,

    /// When the most recent acknowledgement arrived
    last_ack_at: Option<Instant>,

    /// Latency of the last acknowledged round-trip
    latency: Option<Duration>,

    /// Whether the last sent beat has been acknowledged
    acked: bool,
}

impl Heartbeat {
    /// Create heartbeat state for the given interval
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent_at: None,
            last_ack_at: None,
            latency: None,
            acked: true,
        }
    }

    /// Interval between beats
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record that a beat was just sent
    pub fn record_sent(&mut self) {
        self.last_sent_at = Some(Instant::now());
        self.acked = false;
    }

    /// Record an acknowledgement, returning the measured round-trip latency
    pub fn record_ack(&mut self) -> Duration {
        let now = Instant::now();
        let latency = self
            .last_sent_at
            .map_or(Duration::ZERO, |sent| now.duration_since(sent));

        self.last_ack_at = Some(now);
        self.latency = Some(latency);
        self.acked = true;

        latency
    }

    /// Whether the connection is zombied
    ///
    /// True when a beat has been sent and the next tick arrived without an
    /// acknowledgement in between.
    #[must_use]
    pub fn is_zombied(&self) -> bool {
        !self.acked && self.last_sent_at.is_some()
    }

    /// Latency of the last acknowledged round-trip
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// When the last acknowledgement arrived
    #[must_use]
    pub fn last_ack_at(&self) -> Option<Instant> {
        self.last_ack_at
    }
}
