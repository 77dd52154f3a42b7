use std::time::{Duration, Instant};

/// Enforces the minimum delay between consecutive translation-service
/// requests. Before each request the caller sleeps until the configured
/// interval has elapsed since the previous `restart`, then restarts the
/// timer once the request returns.
///
/// A request that itself took longer than the interval proceeds without
/// sleeping; no distinction is made between a slow live request and one
/// that was rate limited.
#[derive(Debug)]
pub struct MinIntervalTimer {
    interval: Duration,
    last_restart: Instant,
}

impl MinIntervalTimer {
    pub fn new(interval: Duration) -> Self {
        // Start expired so the first request goes out immediately.
        let last_restart = Instant::now()
            .checked_sub(interval)
            .unwrap_or_else(Instant::now);
        MinIntervalTimer {
            interval,
            last_restart,
        }
    }

    pub async fn sleep_until_expired(&self) {
        let elapsed = self.last_restart.elapsed();
        if elapsed < self.interval {
            tokio::time::sleep(self.interval - elapsed).await;
        }
    }

    pub fn restart(&mut self) {
        self.last_restart = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_call_does_not_sleep() {
        let timer = MinIntervalTimer::new(Duration::from_millis(200));
        let start = Instant::now();
        timer.sleep_until_expired().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn enforces_interval_after_restart() {
        let mut timer = MinIntervalTimer::new(Duration::from_millis(100));
        timer.restart();
        let start = Instant::now();
        timer.sleep_until_expired().await;
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
