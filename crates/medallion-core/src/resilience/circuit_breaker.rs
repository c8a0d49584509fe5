//! Circuit breaker (spec §4.1). Grounded on
//! `core/platform/resilience/circuit_breaker.py`'s `CircuitBreaker`: the
//! same three-state machine, the same `allow`/`record_success`/
//! `record_failure` call shape, translated from a mutable dataclass into a
//! `Mutex`-guarded struct so it can be shared across the tasks described in
//! spec §5 ("the circuit breaker ... must be safe under concurrent
//! probes").

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        write!(f, "{s}")
    }
}

pub type StateChangeHook = Box<dyn Fn(CircuitState) + Send + Sync>;

struct Inner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    half_open_calls: u32,
}

/// A single breaker for one logical operation. Components with several
/// distinct operations (e.g. a storage backend with upload/download/list)
/// keep one `CircuitBreaker` per operation name, the way
/// `ResilienceMixin._init_resilience_multi` keeps a `Dict[str,
/// CircuitBreaker]` keyed by operation.
pub struct CircuitBreaker {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub half_open_max_calls: u32,
    inner: Mutex<Inner>,
    on_state_change: Option<StateChangeHook>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration, half_open_max_calls: u32) -> Self {
        Self {
            failure_threshold,
            cooldown,
            half_open_max_calls,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                half_open_calls: 0,
            }),
            on_state_change: None,
        }
    }

    pub fn with_hook(mut self, hook: StateChangeHook) -> Self {
        self.on_state_change = Some(hook);
        self
    }

    fn notify(&self, state: CircuitState) {
        if let Some(hook) = &self.on_state_change {
            hook(state);
        }
    }

    /// Consult the breaker before issuing a call. Returns `false` when the
    /// call should be rejected immediately with `CircuitOpenError`.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::MAX);
            if elapsed >= self.cooldown {
                inner.state = CircuitState::HalfOpen;
                inner.half_open_calls = 0;
                drop(inner);
                self.notify(CircuitState::HalfOpen);
                return self.allow();
            }
            return false;
        }
        if inner.state == CircuitState::HalfOpen {
            if inner.half_open_calls >= self.half_open_max_calls {
                return false;
            }
            inner.half_open_calls += 1;
        }
        true
    }

    pub fn record_success(&self) {
        let prev = {
            let mut inner = self.inner.lock().unwrap();
            let prev = inner.state;
            inner.state = CircuitState::Closed;
            inner.failures = 0;
            inner.half_open_calls = 0;
            prev
        };
        if prev != CircuitState::Closed {
            self.notify(CircuitState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures += 1;
        if matches!(inner.state, CircuitState::Closed | CircuitState::HalfOpen)
            && inner.failures >= self.failure_threshold
        {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.half_open_calls = 0;
            drop(inner);
            self.notify(CircuitState::Open);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().unwrap().failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60), 1);
        assert!(breaker.allow());
        breaker.record_failure();
        assert!(breaker.allow());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn half_open_probe_success_closes_and_failure_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0), 1);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert!(breaker.allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_limits_concurrent_probes() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0), 1);
        breaker.record_failure();
        assert!(breaker.allow());
        assert!(!breaker.allow());
    }
}
