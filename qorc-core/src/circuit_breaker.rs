//! Per-service circuit breaker state machine (§4.3) plus a process-wide
//! registry keyed by service name.

use crate::{CircuitOpenError, CircuitState};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Snapshot of a breaker's counters, safe to read without holding the
/// transition lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

struct Inner {
    state: Mutex<(CircuitState, Instant)>,
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    rejected_calls: AtomicU64,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    last_success_ms: AtomicI64,
    last_failure_ms: AtomicI64,
}

/// One service's breaker. All state transitions are serialized by the
/// `state` mutex; counters are plain atomics for lock-free reads.
pub struct CircuitBreaker {
    service: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,
    inner: Inner,
}

impl CircuitBreaker {
    pub fn new(
        service: impl Into<String>,
        failure_threshold: u32,
        recovery_timeout: Duration,
        success_threshold: u32,
    ) -> Self {
        Self {
            service: service.into(),
            failure_threshold,
            recovery_timeout,
            success_threshold,
            inner: Inner {
                state: Mutex::new((CircuitState::Closed, Instant::now())),
                total_calls: AtomicU64::new(0),
                successful_calls: AtomicU64::new(0),
                failed_calls: AtomicU64::new(0),
                rejected_calls: AtomicU64::new(0),
                consecutive_failures: AtomicU32::new(0),
                consecutive_successes: AtomicU32::new(0),
                last_success_ms: AtomicI64::new(0),
                last_failure_ms: AtomicI64::new(0),
            },
        }
    }

    /// Current observable state, applying the `open -> half_open` wall-clock
    /// transition on read without requiring a call.
    pub fn state(&self) -> CircuitState {
        let mut guard = self.inner.state.lock().unwrap();
        let (state, opened_at) = *guard;
        if state == CircuitState::Open && opened_at.elapsed() >= self.recovery_timeout {
            guard.0 = CircuitState::HalfOpen;
            return CircuitState::HalfOpen;
        }
        state
    }

    /// Call this before invoking the protected service. Returns an error
    /// without incrementing any success/failure counter if the circuit is
    /// open; callers should try a fallback instead.
    pub fn before_call(&self) -> Result<(), CircuitOpenError> {
        if self.state() == CircuitState::Open {
            self.inner.rejected_calls.fetch_add(1, Ordering::Relaxed);
            let opened_at = self.inner.state.lock().unwrap().1;
            let retry_after_secs =
                (self.recovery_timeout.as_secs() as i64 - opened_at.elapsed().as_secs() as i64).max(0);
            return Err(CircuitOpenError {
                service: self.service.clone(),
                retry_after_secs,
            });
        }
        self.inner.total_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Record a successful call. Resets `consecutive_failures`; in
    /// `half_open`, closes the breaker once `success_threshold` is reached.
    pub fn record_success(&self) {
        self.inner.successful_calls.fetch_add(1, Ordering::Relaxed);
        self.inner.consecutive_failures.store(0, Ordering::Relaxed);
        self.inner.last_success_ms.store(now_ms(), Ordering::Relaxed);
        let successes = self.inner.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;

        let mut guard = self.inner.state.lock().unwrap();
        if guard.0 == CircuitState::HalfOpen && successes >= self.success_threshold {
            guard.0 = CircuitState::Closed;
            self.inner.consecutive_failures.store(0, Ordering::Relaxed);
            self.inner.consecutive_successes.store(0, Ordering::Relaxed);
        }
    }

    /// Record a failure against one of the configured `expected_exceptions`.
    /// Opens the circuit from `closed` at `failure_threshold`; any failure
    /// in `half_open` reopens it immediately.
    pub fn record_failure(&self) {
        self.inner.failed_calls.fetch_add(1, Ordering::Relaxed);
        self.inner.consecutive_successes.store(0, Ordering::Relaxed);
        self.inner.last_failure_ms.store(now_ms(), Ordering::Relaxed);
        let failures = self.inner.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;

        let mut guard = self.inner.state.lock().unwrap();
        match guard.0 {
            CircuitState::Closed if failures >= self.failure_threshold => {
                *guard = (CircuitState::Open, Instant::now());
            }
            CircuitState::HalfOpen => {
                *guard = (CircuitState::Open, Instant::now());
            }
            _ => {}
        }
    }

    pub fn stats(&self) -> BreakerStats {
        BreakerStats {
            total_calls: self.inner.total_calls.load(Ordering::Relaxed),
            successful_calls: self.inner.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.inner.failed_calls.load(Ordering::Relaxed),
            rejected_calls: self.inner.rejected_calls.load(Ordering::Relaxed),
            consecutive_failures: self.inner.consecutive_failures.load(Ordering::Relaxed),
            consecutive_successes: self.inner.consecutive_successes.load(Ordering::Relaxed),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Process-wide get-or-create registry of breakers, keyed by service name.
pub struct CircuitBreakerRegistry {
    failure_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,
    breakers: DashMap<String, std::sync::Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration, success_threshold: u32) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            success_threshold,
            breakers: DashMap::new(),
        }
    }

    pub fn get_or_create(&self, service: &str) -> std::sync::Arc<CircuitBreaker> {
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                std::sync::Arc::new(CircuitBreaker::new(
                    service,
                    self.failure_threshold,
                    self.recovery_timeout,
                    self.success_threshold,
                ))
            })
            .clone()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30), 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_failure_threshold() {
        let cb = CircuitBreaker::new("svc", 3, Duration::from_secs(30), 2);
        assert_eq!(cb.state(), CircuitState::Closed);
        for _ in 0..3 {
            cb.before_call().unwrap();
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.before_call().is_err());
    }

    #[test]
    fn test_half_open_reopens_on_single_failure() {
        let cb = CircuitBreaker::new("svc", 1, Duration::from_millis(1), 2);
        cb.before_call().unwrap();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.before_call().unwrap();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let cb = CircuitBreaker::new("svc", 1, Duration::from_millis(1), 2);
        cb.before_call().unwrap();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.before_call().unwrap();
        cb.record_success();
        cb.before_call().unwrap();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_get_or_create_is_canonical() {
        let registry = CircuitBreakerRegistry::default();
        let a = registry.get_or_create("llm-agent-a");
        let b = registry.get_or_create("llm-agent-a");
        a.record_failure();
        assert_eq!(b.stats().consecutive_failures, 1);
    }

    proptest::proptest! {
        /// P4: from `closed`, the breaker opens after exactly
        /// `failure_threshold` consecutive counted failures, never sooner.
        #[test]
        fn prop_opens_after_exactly_threshold_failures(threshold in 1u32..20) {
            let cb = CircuitBreaker::new("svc", threshold, Duration::from_secs(3600), 2);
            for _ in 0..(threshold - 1) {
                cb.before_call().unwrap();
                cb.record_failure();
                prop_assert_eq!(cb.state(), CircuitState::Closed);
            }
            cb.before_call().unwrap();
            cb.record_failure();
            prop_assert_eq!(cb.state(), CircuitState::Open);
        }
    }
}
