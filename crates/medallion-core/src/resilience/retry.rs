//! Retry policy (spec §4.1). Grounded on
//! `core/platform/resilience/config.py::parse_retry_config` for the
//! defaults and on `pipelines/lib/resilience.py::retry_operation` for the
//! backoff/jitter algorithm, generalized to the exponential-with-cap
//! formula spec.md spells out precisely.

use crate::error::PipelineError;
use rand::Rng as _;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_SECS: f64 = 1.0;
pub const DEFAULT_MAX_DELAY_SECS: f64 = 30.0;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_JITTER: f64 = 0.1;

/// `retry_if`/`delay_from_exception` are plain function pointers rather
/// than trait objects: every call site in this codebase composes a small,
/// fixed predicate (spec §4.1 "the policy predicate is composed so that
/// domain-specific retryable-error tests ... can extend a default").
pub type RetryIf = Box<dyn Fn(&PipelineError) -> bool + Send + Sync>;
pub type DelayFromException = Box<dyn Fn(&PipelineError, u32, Duration) -> Option<Duration> + Send + Sync>;

pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: f64,
    pub retry_if: RetryIf,
    pub delay_from_exception: Option<DelayFromException>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs_f64(DEFAULT_BASE_DELAY_SECS),
            max_delay: Duration::from_secs_f64(DEFAULT_MAX_DELAY_SECS),
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: DEFAULT_JITTER,
            retry_if: Box::new(|_| true),
            delay_from_exception: None,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_retry_if(mut self, f: RetryIf) -> Self {
        self.retry_if = f;
        self
    }

    pub fn with_delay_from_exception(mut self, f: DelayFromException) -> Self {
        self.delay_from_exception = Some(f);
        self
    }

    /// Computes the delay for a given 1-based attempt number, per spec
    /// §4.1: `min(max_delay, base_delay * multiplier^(attempt-1))`, then
    /// jittered by `(1 + random * jitter)`.
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt as i32 - 1);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter_factor = 1.0 + rand::rng().random_range(0.0..=1.0) * self.jitter;
        Duration::from_secs_f64((capped * jitter_factor).max(0.0))
    }

    /// Decide whether attempt `attempt` (1-based, the one that just
    /// failed) should be retried.
    pub fn should_retry(&self, error: &PipelineError, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        (self.retry_if)(error)
    }

    pub fn delay_for(&self, error: &PipelineError, attempt: u32) -> Duration {
        let computed = self.compute_delay(attempt);
        if let Some(f) = &self.delay_from_exception {
            if let Some(d) = f(error, attempt, computed) {
                return d;
            }
        }
        computed
    }
}

/// Synchronous retry loop used by the file and db extractors. The async
/// HTTP path uses [`retry_async`] instead; both share the same
/// [`RetryPolicy`] semantics.
pub fn retry_sync<T>(
    policy: &RetryPolicy,
    mut op: impl FnMut(u32) -> Result<T, PipelineError>,
) -> Result<T, PipelineError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !policy.should_retry(&e, attempt) {
                    if attempt >= policy.max_attempts {
                        return Err(PipelineError::retry_exhausted(
                            attempt,
                            crate::error::ErrorContext::new(),
                            e,
                        ));
                    }
                    return Err(e);
                }
                let delay = policy.delay_for(&e, attempt);
                std::thread::sleep(delay);
            }
        }
    }
}

/// Async counterpart, used by the cooperative API extractor path.
pub async fn retry_async<T, Fut>(
    policy: &RetryPolicy,
    mut op: impl FnMut(u32) -> Fut,
) -> Result<T, PipelineError>
where
    Fut: std::future::Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !policy.should_retry(&e, attempt) {
                    if attempt >= policy.max_attempts {
                        return Err(PipelineError::retry_exhausted(
                            attempt,
                            crate::error::ErrorContext::new(),
                            e,
                        ));
                    }
                    return Err(e);
                }
                let delay = policy.delay_for(&e, attempt);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.compute_delay(1).as_secs_f64(), 1.0);
        assert_eq!(policy.compute_delay(2).as_secs_f64(), 2.0);
        assert_eq!(policy.compute_delay(3).as_secs_f64(), 4.0);
        // attempt 10 would be 512s, capped to max_delay (30s default)
        assert_eq!(policy.compute_delay(10).as_secs_f64(), DEFAULT_MAX_DELAY_SECS);
    }

    #[test]
    fn retry_sync_gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
            ..Default::default()
        };
        let mut calls = 0;
        let result: Result<(), PipelineError> = retry_sync(&policy, |_attempt| {
            calls += 1;
            Err(PipelineError::config("boom"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_sync_stops_when_retry_if_false() {
        let policy = RetryPolicy::default().with_retry_if(Box::new(|_| false));
        let mut calls = 0;
        let result: Result<(), PipelineError> = retry_sync(&policy, |_| {
            calls += 1;
            Err(PipelineError::config("boom"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
