//! Heartbeat ping/pong liveness tracking.
//!
//! Each tick either sends a ping or, if the previous ping went
//! unanswered, expires the session. A session therefore survives one silent
//! interval and is dropped after two.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// What a heartbeat tick asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping and wait for the pong.
    Ping,
    /// The last ping was not acknowledged; tear the session down.
    Expire,
}

/// Per-session heartbeat state.
#[derive(Debug)]
pub struct Heartbeat {
    timed_out: bool,
    cancel: CancellationToken,
}

impl Heartbeat {
    /// Heartbeat bound to `cancel`; stopping the heartbeat cancels it.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            timed_out: false,
            cancel,
        }
    }

    /// Advance one interval.
    pub fn tick(&mut self) -> HeartbeatAction {
        if self.timed_out {
            HeartbeatAction::Expire
        } else {
            self.timed_out = true;
            HeartbeatAction::Ping
        }
    }

    /// Record a pong.
    pub fn acknowledge(&mut self) {
        self.timed_out = false;
    }

    /// Whether a ping is outstanding.
    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    /// Cancel the heartbeat. Safe to call any number of times.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the heartbeat has been cancelled, by [`Self::stop`] or by a parent token.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Tick source for the session loop. The first tick fires one `period`
/// after creation.
pub fn interval(period: Duration) -> Interval {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
