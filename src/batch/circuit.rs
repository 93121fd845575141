//! Consecutive-failure circuit breaker.
//!
//! One atomic counter plus a flag. Consecutive document failures across
//! workers open the breaker; a success anywhere resets the count. An open
//! breaker stays open until explicitly reset.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Halts batch dispatch after sustained failure.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    failures: AtomicU32,
    open: AtomicBool,
}

impl CircuitBreaker {
    /// Creates a breaker that opens at `threshold` consecutive failures.
    ///
    /// A zero threshold is clamped to 1.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: AtomicU32::new(0),
            open: AtomicBool::new(false),
        }
    }

    /// Records a document failure; opens the breaker at the threshold.
    pub fn record_failure(&self) {
        let count = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.threshold && !self.open.swap(true, Ordering::SeqCst) {
            tracing::error!(
                consecutive_failures = count,
                "circuit breaker opened; halting dispatch"
            );
        }
    }

    /// Records a document success, resetting the consecutive count.
    ///
    /// Does not close an already-open breaker; only [`Self::reset`] does.
    pub fn record_success(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    /// Whether the breaker is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Current consecutive failure count.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Closes the breaker and clears the count.
    pub fn reset(&self) {
        self.failures.store(0, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_lifecycle() {
        let breaker = CircuitBreaker::new(3);
        assert!(!breaker.is_open());

        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());

        // Success resets the consecutive count.
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.is_open());

        // Further failures keep it open.
        breaker.record_failure();
        assert!(breaker.is_open());

        breaker.reset();
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_success_does_not_close_open_breaker() {
        let breaker = CircuitBreaker::new(1);
        breaker.record_failure();
        assert!(breaker.is_open());
        breaker.record_success();
        assert!(breaker.is_open());
    }

    #[test]
    fn test_zero_threshold_clamped() {
        let breaker = CircuitBreaker::new(0);
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn test_concurrent_failures_open_once() {
        let breaker = std::sync::Arc::new(CircuitBreaker::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let breaker = std::sync::Arc::clone(&breaker);
                std::thread::spawn(move || breaker.record_failure())
            })
            .collect();
        for handle in handles {
            let _ = handle.join();
        }
        assert!(breaker.is_open());
        assert_eq!(breaker.failure_count(), 8);
    }
}
