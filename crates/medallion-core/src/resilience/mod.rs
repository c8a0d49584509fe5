//! Resilience primitives: retry policy, circuit breaker, token-bucket rate
//! limiter, and the `execute_with_resilience` wrapper that composes them
//! (spec §4.1). Grounded on `core/platform/resilience/mixins.py`'s
//! `ResilienceMixin._execute_with_resilience`.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use rate_limiter::RateLimiter;
pub use retry::RetryPolicy;

use crate::error::PipelineError;
use std::collections::HashMap;
use std::sync::Mutex;

/// Named registry of circuit breakers for a single component (spec §4.1:
/// "Multiple named circuit breakers for different operations"). A
/// component with one operation just uses a single entry keyed by its own
/// name.
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, std::sync::Arc<CircuitBreaker>>>,
    failure_threshold: u32,
    cooldown: std::time::Duration,
    half_open_max_calls: u32,
}

impl BreakerRegistry {
    pub fn new(failure_threshold: u32, cooldown: std::time::Duration, half_open_max_calls: u32) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            failure_threshold,
            cooldown,
            half_open_max_calls,
        }
    }

    pub fn get_or_create(&self, key: &str) -> std::sync::Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        breakers
            .entry(key.to_string())
            .or_insert_with(|| {
                std::sync::Arc::new(CircuitBreaker::new(
                    self.failure_threshold,
                    self.cooldown,
                    self.half_open_max_calls,
                ))
            })
            .clone()
    }
}

/// Synchronous execution wrapper (spec §4.1 `execute_with_resilience`):
/// consult the breaker, run `op` under the retry policy, record the
/// outcome.
pub fn execute_with_resilience<T>(
    breaker: &CircuitBreaker,
    component: &str,
    breaker_key: Option<&str>,
    policy: &RetryPolicy,
    mut op: impl FnMut() -> Result<T, PipelineError>,
) -> Result<T, PipelineError> {
    if !breaker.allow() {
        return Err(PipelineError::circuit_open(component, breaker_key));
    }
    match retry::retry_sync(policy, |_attempt| op()) {
        Ok(v) => {
            breaker.record_success();
            Ok(v)
        }
        Err(e) => {
            if !e.is_circuit_open() {
                breaker.record_failure();
            }
            Err(e)
        }
    }
}

/// Async counterpart used by the cooperative HTTP extraction path.
pub async fn execute_with_resilience_async<T, Fut>(
    breaker: &CircuitBreaker,
    component: &str,
    breaker_key: Option<&str>,
    policy: &RetryPolicy,
    mut op: impl FnMut() -> Fut,
) -> Result<T, PipelineError>
where
    Fut: std::future::Future<Output = Result<T, PipelineError>>,
{
    if !breaker.allow() {
        return Err(PipelineError::circuit_open(component, breaker_key));
    }
    match retry::retry_async(policy, |_attempt| op()).await {
        Ok(v) => {
            breaker.record_success();
            Ok(v)
        }
        Err(e) => {
            if !e.is_circuit_open() {
                breaker.record_failure();
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rejects_without_calling_op_when_open() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60), 1);
        breaker.record_failure();
        let mut calls = 0;
        let result: Result<(), PipelineError> = execute_with_resilience(
            &breaker,
            "test",
            None,
            &RetryPolicy::none(),
            || {
                calls += 1;
                Ok(())
            },
        );
        assert!(matches!(result, Err(PipelineError::CircuitOpen { .. })));
        assert_eq!(calls, 0);
    }
}
