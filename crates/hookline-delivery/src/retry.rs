//! Exponential backoff retry policy with jitter.
//!
//! The policy is pure: given the attempt number just completed and its
//! outcome, [`RetryPolicy::next_delay`] says whether to try again and how
//! long to wait. No I/O, no clock, so every branch is unit-testable without
//! a network.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    client::AttemptOutcome,
    error::{DeliveryError, Result},
};

/// Retry policy configuration for webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts (including initial attempt).
    pub max_attempts: u32,

    /// Base delay for backoff calculation.
    pub base_delay: Duration,

    /// Maximum delay between retry attempts, jitter included.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) applied as ±randomization.
    pub jitter_factor: f64,

    /// Strategy for calculating backoff delays.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.2,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles each attempt: `base × 2^(attempt-1)`.
    Exponential,
    /// Delay grows by `base` each attempt: `base × attempt`.
    Linear,
}

/// What to do after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make the next attempt.
    Retry {
        /// Backoff before the next attempt
        delay: Duration,
    },
    /// Finalize the sequence.
    Stop {
        /// Why the sequence ends
        reason: StopReason,
    },
}

/// Why a delivery sequence stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The attempt succeeded.
    Delivered,
    /// The endpoint rejected the request permanently.
    NonRetryable,
    /// `max_attempts` retryable failures in a row.
    Exhausted,
}

impl RetryPolicy {
    /// Decides whether to retry after attempt `attempt_number` (1-based)
    /// produced `outcome`.
    pub fn next_delay(&self, attempt_number: u32, outcome: &AttemptOutcome) -> RetryDecision {
        let retry_after = match outcome {
            AttemptOutcome::Success { .. } => {
                return RetryDecision::Stop { reason: StopReason::Delivered };
            },
            AttemptOutcome::NonRetryableFailure { .. } => {
                return RetryDecision::Stop { reason: StopReason::NonRetryable };
            },
            AttemptOutcome::RetryableFailure { retry_after, .. } => *retry_after,
        };

        if attempt_number >= self.max_attempts {
            return RetryDecision::Stop { reason: StopReason::Exhausted };
        }

        let delay = match retry_after {
            Some(hint) => hint.min(self.max_delay),
            None => self.backoff_delay(attempt_number),
        };

        RetryDecision::Retry { delay }
    }

    /// Computes the jittered backoff after attempt `attempt_number`.
    ///
    /// The result never exceeds `max_delay`.
    pub fn backoff_delay(&self, attempt_number: u32) -> Duration {
        let attempt = attempt_number.max(1);

        let base_delay = match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let exponent = (attempt - 1).min(20);
                self.base_delay.saturating_mul(2_u32.saturating_pow(exponent))
            },
        };

        let capped_delay = base_delay.min(self.max_delay);
        apply_jitter(capped_delay, self.jitter_factor).min(self.max_delay)
    }

    /// Sets the attempt limit.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Disables jitter, making delays exact.
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Checks that the policy allows at least one attempt, that
    /// `base_delay <= max_delay`, and that the jitter factor is a finite
    /// fraction.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` naming the first invalid
    /// field.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(DeliveryError::configuration("max_attempts must be at least 1"));
        }

        if self.base_delay > self.max_delay {
            return Err(DeliveryError::configuration("base_delay cannot exceed max_delay"));
        }

        if !self.jitter_factor.is_finite() || !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(DeliveryError::configuration(
                "jitter_factor must be a finite value between 0.0 and 1.0",
            ));
        }

        Ok(())
    }
}

/// Randomizes `duration` by ±`jitter_factor`.
///
/// With `jitter_factor = 0.2`, a 10s delay becomes anything from 8s to 12s.
pub fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if !jitter_factor.is_finite() || jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rand::rng().random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::try_from_secs_f64(jittered_secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Policy for endpoints that answer quickly: more attempts, short waits.
pub fn fast_api_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(250),
        max_delay: Duration::from_secs(10),
        jitter_factor: 0.1,
        backoff_strategy: BackoffStrategy::Exponential,
    }
}

/// Policy for slow or flaky endpoints: long waits up to ten minutes.
pub fn patient_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 8,
        base_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(600),
        jitter_factor: 0.3,
        backoff_strategy: BackoffStrategy::Exponential,
    }
}
