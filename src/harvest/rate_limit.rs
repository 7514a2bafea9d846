//! Sliding-window request throttling
//!
//! Keeps the timestamps of the calls made in the last 60 seconds. When the
//! window is full, `acquire` sleeps exactly until the oldest timestamp leaves
//! it. Every granted slot is followed by a uniformly random jitter sleep so
//! that calls do not go out in bursts.

use crate::harvest::config::{calculate_backoff, HarvestConfig};
use crate::metrics;
use crate::provider::RequestGate;
use async_trait::async_trait;
use rand::Rng;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);

/// Request-based limiter over a rolling 60-second window.
#[derive(Debug)]
pub struct RateLimiter {
    window: Mutex<VecDeque<Instant>>,
    max_per_window: usize,
    min_delay: Duration,
    max_delay: Duration,
}

impl RateLimiter {
    /// Create a limiter allowing `max_per_minute` acquisitions per 60 s
    ///
    /// # Arguments
    /// * `max_per_minute` - Window capacity (clamped to at least 1)
    /// * `min_delay` / `max_delay` - Jitter bounds slept after each slot
    pub fn new(max_per_minute: u32, min_delay: Duration, max_delay: Duration) -> Self {
        let (min_delay, max_delay) = if min_delay <= max_delay {
            (min_delay, max_delay)
        } else {
            (max_delay, min_delay)
        };
        Self {
            window: Mutex::new(VecDeque::new()),
            max_per_window: max_per_minute.max(1) as usize,
            min_delay,
            max_delay,
        }
    }

    /// Build a limiter from harvest settings
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self::new(
            config.max_requests_per_minute,
            config.min_delay,
            config.max_delay,
        )
    }

    /// Wait for a slot in the window, then sleep the jitter.
    ///
    /// Window updates are serialized across concurrent callers; the lock is
    /// released while sleeping.
    pub async fn acquire(&self) {
        let started = Instant::now();
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                while window
                    .front()
                    .is_some_and(|&oldest| now.duration_since(oldest) >= WINDOW)
                {
                    window.pop_front();
                }

                if window.len() < self.max_per_window {
                    window.push_back(now);
                    None
                } else {
                    window
                        .front()
                        .map(|&oldest| (oldest + WINDOW).saturating_duration_since(now))
                }
            };

            match wait {
                None => break,
                Some(wait) => {
                    debug!(wait_ms = wait.as_millis(), "Rate limit window full, waiting");
                    sleep(wait).await;
                }
            }
        }
        metrics::record_rate_limit_wait(started.elapsed());

        let jitter = self.jitter();
        if !jitter.is_zero() {
            sleep(jitter).await;
        }
    }

    /// Calls currently counted in the window
    pub async fn in_window(&self) -> usize {
        let window = self.window.lock().await;
        let now = Instant::now();
        window
            .iter()
            .filter(|&&t| now.duration_since(t) < WINDOW)
            .count()
    }

    fn jitter(&self) -> Duration {
        if self.max_delay.is_zero() {
            return Duration::ZERO;
        }
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

#[async_trait]
impl RequestGate for RateLimiter {
    async fn admit(&self) {
        self.acquire().await;
    }
}

/// Delay before retry `attempt` (0-based) of a quota or transient failure.
///
/// Exponential backoff, unless the provider asked for a longer pause.
pub fn backoff_delay(attempt: u32, retry_after: Option<Duration>) -> Duration {
    let backoff = calculate_backoff(attempt);
    match retry_after {
        Some(requested) if requested > backoff => requested,
        _ => backoff,
    }
}
