use std::time::Duration;
use tokio::time::{self, Instant};

/// Upper bound used when a budget is too large to represent as an instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A deadline plus a fixed pause between attempts.
///
/// Waits are clamped to the deadline so nothing driven by a budget can
/// outlive it, and they go through `tokio::time` so callers can race them
/// against cancellation with `select!`.
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    deadline: Instant,
    interval: Duration,
}

impl RetryBudget {
    pub fn start(budget: Duration, interval: Duration) -> Self {
        let now = Instant::now();
        let deadline = now
            .checked_add(budget)
            .unwrap_or_else(|| now + FAR_FUTURE);
        Self { deadline, interval }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Shortens `window` so it ends no later than the deadline.
    pub fn clamp(&self, window: Duration) -> Duration {
        window.min(self.remaining())
    }

    /// Sleeps one retry interval (or what is left of the budget). Returns
    /// `false` once the budget is spent.
    pub async fn pause(&self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        time::sleep(self.clamp(self.interval)).await;
        !self.is_exhausted()
    }
}
