//! Wall clock derived from the tokio timer.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// UTC timestamps that advance with tokio time, so watchdog and retry-after
/// arithmetic follow paused test clocks as well as real ones.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    wall: DateTime<Utc>,
    started: Instant,
}

impl Clock {
    pub fn start() -> Self {
        Self {
            wall: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.wall + chrono::Duration::from_std(self.started.elapsed()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn follows_tokio_time() {
        let clock = Clock::start();
        let before = clock.now();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(clock.now() - before, chrono::Duration::seconds(600));
    }
}
