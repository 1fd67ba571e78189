// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-item exponential failure backoff for controller requeues.
//!
//! Every failed reconcile of an item doubles that item's next delay, starting at the base
//! delay and capped at the maximum. A successful reconcile forgets the item so its next
//! failure starts from the base delay again. Items back off independently of each other.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::constants::{MOVER_BACKOFF_BASE, MOVER_BACKOFF_MAX};

/// Backoff multiplier (exponential growth factor)
const BACKOFF_MULTIPLIER: u32 = 2;

/// Failure counts above this no longer change the delay for any sane base/max pair, and
/// keeping the exponent small keeps the arithmetic from overflowing.
const MAX_EXPONENT: u32 = 30;

/// Exponential failure rate limiter keyed by item name.
///
/// The delay for an item that has failed `n` times before is `base * 2^n`, capped at
/// `max`. The limiter is shared between the controller's error policy (which calls
/// [`when`](Self::when)) and the reconciler (which calls [`forget`](Self::forget) on
/// success), so the failure map sits behind a mutex.
#[derive(Debug)]
pub struct ItemExponentialFailureRateLimiter {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound on any delay
    pub max_delay: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl Default for ItemExponentialFailureRateLimiter {
    fn default() -> Self {
        Self::new(MOVER_BACKOFF_BASE, MOVER_BACKOFF_MAX)
    }
}

impl ItemExponentialFailureRateLimiter {
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure of `item` and return how long to wait before retrying it.
    ///
    /// # Retry Schedule
    ///
    /// With the mover defaults (500 ms base, 10 s cap):
    ///
    /// 1. 500ms
    /// 2. 1s
    /// 3. 2s
    /// 4. 4s
    /// 5. 8s
    /// 6. 10s (capped at max delay)
    pub fn when(&self, item: &str) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(item.to_string()).or_insert(0);
        let exponent = (*count).min(MAX_EXPONENT);
        *count = count.saturating_add(1);

        self.base_delay
            .checked_mul(BACKOFF_MULTIPLIER.pow(exponent))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Clear the failure history of `item`.
    pub fn forget(&self, item: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(item);
    }

    /// Number of failures recorded for `item` since it was last forgotten.
    pub fn num_requeues(&self, item: &str) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(item)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "rate_limiter_tests.rs"]
mod rate_limiter_tests;
