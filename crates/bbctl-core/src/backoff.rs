// ── Reconnect backoff ──
//
// Exponential delay between websocket reconnect attempts. A connection
// that stayed up longer than `reset_after` counts as healthy, so the
// next failure starts over from the default delay.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub default_delay: Duration,
    pub max_delay: Duration,
    pub reset_after: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            default_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(2 * 60),
            reset_after: Duration::from_secs(5 * 60),
        }
    }
}

/// Mutable backoff state for one supervisor.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    last: Option<(Instant, Duration)>,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, last: None }
    }

    /// Delay to wait before the next attempt, given a disconnect at `now`.
    pub fn next_delay(&mut self, now: Instant) -> Duration {
        let delay = match self.last {
            Some((at, previous)) if now.saturating_duration_since(at) <= self.policy.reset_after => {
                previous.saturating_mul(2).min(self.policy.max_delay)
            }
            _ => self.policy.default_delay,
        };
        self.last = Some((now, delay));
        delay
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
