//! Drift-compensated periodic scheduling.

use std::time::Duration;

use tokio::time::Instant;

/// Schedules ticks at `t0 + k * period` rather than `last_tick + period`, so
/// a slow tick body does not push every subsequent tick later and a single
/// late tick never triggers a catch-up burst.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    period: Duration,
    next_k: u64,
}

impl Timer {
    /// A timer that fires every `period`, counted from now.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            start: Instant::now(),
            period,
            next_k: 1,
        }
    }

    /// Sleep until the next scheduled tick, then return. If the caller is
    /// already past the scheduled time, returns immediately without
    /// queuing up the missed ticks in between.
    pub async fn tick(&mut self) {
        let target = self.start + self.period * u32::try_from(self.next_k).unwrap_or(u32::MAX);
        let now = Instant::now();
        if target > now {
            tokio::time::sleep(target - now).await;
        }
        // Catch `next_k` up to the present so a long-running tick body never
        // produces a burst of immediate ticks afterward.
        let elapsed = Instant::now().duration_since(self.start);
        let elapsed_periods = elapsed.as_secs_f64() / self.period.as_secs_f64();
        self.next_k = (elapsed_periods.floor() as u64) + 1;
    }
}
