//! Reconnect delay calculation

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// How the delay between reconnection attempts is chosen
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectStrategy {
    /// Same delay before every attempt
    Fixed { delay: Duration },
    /// Delay grows by `multiplier` per attempt, capped at `max_delay`
    Exponential {
        initial: Duration,
        multiplier: f64,
        max_delay: Duration,
        /// Jitter factor (0.0 to 1.0)
        jitter_factor: f64,
    },
}

/// Bounded reconnection policy, fixed for a channel's lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Retries allowed after a failure before the channel pauses
    pub max_attempts: u32,
    pub strategy: ReconnectStrategy,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(5, Duration::from_millis(3000))
    }
}

impl ReconnectPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            strategy: ReconnectStrategy::Fixed { delay },
        }
    }

    pub fn exponential(max_attempts: u32, initial: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            strategy: ReconnectStrategy::Exponential {
                initial,
                multiplier: 2.0,
                max_delay,
                jitter_factor: 0.0,
            },
        }
    }

    /// Delay to wait before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match &self.strategy {
            ReconnectStrategy::Fixed { delay } => *delay,
            ReconnectStrategy::Exponential {
                initial,
                multiplier,
                max_delay,
                jitter_factor,
            } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let base_delay = initial.as_millis() as f64 * multiplier.powi(exponent);
                let capped_delay = base_delay.min(max_delay.as_millis() as f64);

                let final_delay = if *jitter_factor > 0.0 && capped_delay > 0.0 {
                    let jitter_range = capped_delay * jitter_factor.min(1.0);
                    let jitter = rand::rng().random_range(-jitter_range..jitter_range);
                    (capped_delay + jitter).max(1.0)
                } else {
                    capped_delay.max(1.0)
                };

                Duration::from_millis(final_delay as u64)
            }
        }
    }

    /// Whether another retry is allowed after `attempts` retries were made
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        let strategy = match config.strategy.as_str() {
            "exponential" => ReconnectStrategy::Exponential {
                initial: Duration::from_millis(config.delay_ms),
                multiplier: config.multiplier,
                max_delay: Duration::from_millis(config.max_delay_ms),
                jitter_factor: config.jitter_factor,
            },
            _ => ReconnectStrategy::Fixed {
                delay: Duration::from_millis(config.delay_ms),
            },
        };

        Self {
            max_attempts: config.max_attempts,
            strategy,
        }
    }
}
