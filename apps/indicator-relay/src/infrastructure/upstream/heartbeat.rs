//! Heartbeat
//!
//! Connection health through periodic pings. Owned by the session task and
//! driven from its select loop, so it needs no locking:
//!
//! - every `ping_interval` the loop calls [`Heartbeat::on_tick`];
//! - every inbound frame calls [`Heartbeat::record_activity`];
//! - a ping left unanswered for longer than `pong_timeout` reports
//!   [`HeartbeatAction::TimedOut`], which ends the session.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Silence tolerated after a ping before the session is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }
}

/// What the session loop should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping frame.
    SendPing,
    /// The peer went silent; close the session.
    TimedOut,
}

/// Per-session heartbeat state.
#[derive(Debug)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    last_seen: Instant,
    ping_sent_at: Option<Instant>,
}

impl Heartbeat {
    /// Start tracking a freshly connected session.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            last_seen: Instant::now(),
            ping_sent_at: None,
        }
    }

    /// Ticker for [`Heartbeat::on_tick`]. The first tick fires after one
    /// full interval.
    #[must_use]
    pub fn interval(&self) -> Interval {
        let period = self.config.ping_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    }

    /// Any inbound frame proves the peer is alive.
    pub fn record_activity(&mut self) {
        self.last_seen = Instant::now();
        self.ping_sent_at = None;
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        self.ping_sent_at.is_some()
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_seen.elapsed()
    }

    /// Decide what to do on a tick.
    pub fn on_tick(&mut self) -> HeartbeatAction {
        if let Some(sent) = self.ping_sent_at
            && sent.elapsed() > self.config.pong_timeout
        {
            tracing::warn!(
                silence_secs = self.silence().as_secs(),
                timeout_secs = self.config.pong_timeout.as_secs(),
                "Heartbeat timeout detected"
            );
            return HeartbeatAction::TimedOut;
        }

        if self.ping_sent_at.is_none() {
            self.ping_sent_at = Some(Instant::now());
        }
        HeartbeatAction::SendPing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HeartbeatConfig {
        HeartbeatConfig::new(Duration::from_secs(10), Duration::from_secs(15))
    }

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(20));
        assert_eq!(config.pong_timeout, Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn answered_pings_never_time_out() {
        let mut heartbeat = Heartbeat::new(config());
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(10)).await;
            assert_eq!(heartbeat.on_tick(), HeartbeatAction::SendPing);
            assert!(heartbeat.is_waiting());
            heartbeat.record_activity();
            assert!(!heartbeat.is_waiting());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_ping_times_out_after_pong_timeout() {
        let mut heartbeat = Heartbeat::new(config());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(heartbeat.on_tick(), HeartbeatAction::SendPing);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(heartbeat.on_tick(), HeartbeatAction::SendPing);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(heartbeat.on_tick(), HeartbeatAction::TimedOut);
        assert!(heartbeat.silence() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn interval_waits_one_period_before_first_tick() {
        let heartbeat = Heartbeat::new(config());
        let mut interval = heartbeat.interval();
        let start = Instant::now();
        interval.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }
}
