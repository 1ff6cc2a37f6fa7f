//! Reconnect scheduling.
//!
//! [`Backoff`] produces the delay before each retry: exponential growth from
//! the initial delay, capped at the maximum, with a deterministic jitter
//! derived from the attempt number. Waiting goes through a [`Clock`] so the
//! retry loop can be driven in tests without real sleeps.

use crate::domain::config::ReconnectConfig;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Time source for retry timers
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that returns immediately and records every requested delay
#[derive(Debug, Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|sleeps| sleeps.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

/// Retry delay state machine
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt; advances the attempt counter.
    ///
    /// `delay = min(initial * multiplier^attempt, max) * (1 + jitter * sin(attempt * 7.3))`,
    /// never above the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let delay = delay_for(&self.config, self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Start over after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

fn delay_for(config: &ReconnectConfig, attempt: u32) -> Duration {
    let initial = config.initial_delay_ms as f64 / 1000.0;
    let max = config.max_delay_ms as f64 / 1000.0;
    let multiplier = if config.multiplier.is_finite() {
        config.multiplier.max(1.0)
    } else {
        1.0
    };

    let exponent = attempt.min(64) as i32;
    let base = initial * multiplier.powi(exponent);
    let capped = base.min(max);

    let jitter = if config.jitter.is_finite() {
        config.jitter.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let factor = 1.0 + jitter * (attempt as f64 * 7.3).sin();
    let with_jitter = (capped * factor).clamp(0.0, max);
    if !with_jitter.is_finite() {
        return Duration::from_secs_f64(max);
    }

    Duration::from_secs_f64(with_jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter: 0.25,
        }
    }

    #[test]
    fn test_first_delay_is_initial() {
        // sin(0) = 0, no jitter on the first attempt
        let mut backoff = Backoff::new(config());
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.attempt(), 1);
    }

    #[test]
    fn test_delays_grow_then_cap() {
        let mut backoff = Backoff::new(config());
        let delays: Vec<f64> = (0..12).map(|_| backoff.next_delay().as_secs_f64()).collect();

        for (attempt, delay) in delays.iter().enumerate() {
            let base = (1.0 * 2f64.powi(attempt as i32)).min(10.0);
            assert!(*delay >= base * 0.75 - 1e-9, "attempt {}: {}", attempt, delay);
            assert!(*delay <= base * 1.25 + 1e-9, "attempt {}: {}", attempt, delay);
            assert!(*delay <= 10.0 + 1e-9);
        }
    }

    #[test]
    fn test_reset_starts_over() {
        let mut backoff = Backoff::new(config());
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let mut backoff = Backoff::new(ReconnectConfig {
            jitter: 0.0,
            ..config()
        });
        let delays: Vec<Duration> = (0..6).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(10),
                Duration::from_secs(10),
            ]
        );
    }

    #[test]
    fn test_non_finite_settings_fall_back() {
        let mut backoff = Backoff::new(ReconnectConfig {
            jitter: f64::NAN,
            multiplier: f64::NAN,
            ..config()
        });
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));

        let mut backoff = Backoff::new(ReconnectConfig {
            jitter: f64::INFINITY,
            multiplier: f64::INFINITY,
            ..config()
        });
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_recording_clock() {
        let clock = RecordingClock::new();
        clock.sleep(Duration::from_millis(5)).await;
        clock.sleep(Duration::from_millis(7)).await;
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(5), Duration::from_millis(7)]
        );
    }
}
