//! Poll cadence and status-emission gating for the queued stream path

use std::time::{Duration, Instant};

/// Adaptive poll intervals for watching a queued task
///
/// Tight polling right after submission (results often come back fast),
/// backing off in two steps as the wait grows.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    /// Interval while inside the fast window
    pub fast: Duration,
    /// How long the fast window lasts
    pub fast_window: Duration,
    /// Interval while inside the medium window
    pub medium: Duration,
    /// When the medium window ends and the capped interval takes over
    pub medium_window: Duration,
    /// Capped interval for long waits
    pub slow: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            fast: Duration::from_millis(50),
            fast_window: Duration::from_secs(1),
            medium: Duration::from_millis(500),
            medium_window: Duration::from_secs(5),
            slow: Duration::from_secs(2),
        }
    }
}

impl PollSchedule {
    /// Poll interval to use after having waited `elapsed` so far
    pub fn interval_after(&self, elapsed: Duration) -> Duration {
        if elapsed < self.fast_window {
            self.fast
        } else if elapsed < self.medium_window {
            self.medium
        } else {
            self.slow
        }
    }
}

/// Gates recurring status emission to a fixed cadence
///
/// Decoupled from poll-interval tuning on purpose: however often the poll
/// loop asks, the ticker fires on the first ask and then at most once per
/// period.
#[derive(Debug)]
pub struct StatusTicker {
    period: Duration,
    last_fired: Option<Instant>,
}

impl StatusTicker {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_fired: None,
        }
    }

    /// Whether a status event is due at `now`
    pub fn should_fire(&mut self, now: Instant) -> bool {
        match self.last_fired {
            None => {
                self.last_fired = Some(now);
                true
            }
            Some(last) if now.duration_since(last) >= self.period => {
                self.last_fired = Some(now);
                true
            }
            Some(_) => false,
        }
    }
}
