//! Retry delay schedules
//!
//! Attempt numbering is 1-based over retries: the first re-execution of a
//! protected block is attempt 1. `limit.attempt.count` bounds the number of
//! retries; `limit.duration` bounds the wall clock across all of them.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration as StdDuration;

use crate::duration;
use crate::model::{BackoffSpec, RetryLimit, RetryPolicy};

pub type Result<T> = std::result::Result<T, duration::Error>;

/// Delay before the given retry attempt.
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Result<StdDuration> {
    let base = match &policy.delay {
        Some(spec) => spec.to_std()?,
        None => StdDuration::ZERO,
    };
    let scale = attempt.saturating_sub(1);

    let mut delay = match &policy.backoff {
        None | Some(BackoffSpec::Constant(_)) => base,
        Some(BackoffSpec::Linear(linear)) => {
            let increment = match &linear.increment {
                Some(spec) => spec.to_std()?,
                None => base,
            };
            base + increment * scale
        }
        Some(BackoffSpec::Exponential(exponential)) => {
            let multiplier = exponential.multiplier.unwrap_or(2.0);
            base.mul_f64(multiplier.powi(i32::try_from(scale).unwrap_or(i32::MAX)))
        }
    };

    if let Some(jitter) = &policy.jitter {
        let from = match &jitter.from {
            Some(spec) => spec.to_std()?,
            None => StdDuration::ZERO,
        };
        let to = jitter.to.to_std()?;
        if to > from {
            let span = (to - from).as_millis() as u64;
            let extra = rand::thread_rng().gen_range(0..=span);
            delay += from + StdDuration::from_millis(extra);
        } else {
            delay += from;
        }
    }

    // Per-attempt cap.
    if let Some(cap) = policy
        .limit
        .as_ref()
        .and_then(|limit| limit.attempt.as_ref())
        .and_then(|attempt_limit| attempt_limit.duration.as_ref())
    {
        delay = delay.min(cap.to_std()?);
    }

    Ok(delay)
}

/// Whether another retry attempt is allowed under the policy limits.
/// `attempts_so_far` counts completed retries; `first_attempt_at` is when
/// the first failure was recorded.
pub fn attempt_allowed(
    limit: Option<&RetryLimit>,
    attempts_so_far: u32,
    first_attempt_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let Some(limit) = limit else {
        return Ok(true);
    };

    if let Some(count) = limit.attempt.as_ref().and_then(|a| a.count) {
        if attempts_so_far >= count {
            return Ok(false);
        }
    }

    if let Some(budget) = &limit.duration {
        let budget = budget.to_std()?;
        let elapsed = (now - first_attempt_at).to_std().unwrap_or(StdDuration::ZERO);
        if elapsed >= budget {
            return Ok(false);
        }
    }

    Ok(true)
}
