// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `rate_limiter.rs`

#[cfg(test)]
mod tests {
    use super::super::ItemExponentialFailureRateLimiter;
    use std::time::Duration;

    /// Test that the default limiter uses the mover's base and cap
    #[test]
    fn test_default_configuration() {
        let limiter = ItemExponentialFailureRateLimiter::default();
        assert_eq!(limiter.base_delay, Duration::from_millis(500));
        assert_eq!(limiter.max_delay, Duration::from_secs(10));
    }

    /// Test the doubling schedule up to the cap
    #[test]
    fn test_delays_double_until_capped() {
        let limiter = ItemExponentialFailureRateLimiter::default();
        let delays: Vec<Duration> = (0..8).map(|_| limiter.when("holder-a")).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(10),
                Duration::from_secs(10),
                Duration::from_secs(10),
            ]
        );
        assert_eq!(limiter.num_requeues("holder-a"), 8);
    }

    /// Test that items back off independently
    #[test]
    fn test_items_are_independent() {
        let limiter = ItemExponentialFailureRateLimiter::default();
        limiter.when("holder-a");
        limiter.when("holder-a");

        assert_eq!(limiter.when("holder-b"), Duration::from_millis(500));
        assert_eq!(limiter.when("holder-a"), Duration::from_secs(2));
    }

    /// Test that forgetting an item resets its schedule
    #[test]
    fn test_forget_resets_item() {
        let limiter = ItemExponentialFailureRateLimiter::default();
        for _ in 0..4 {
            limiter.when("holder-a");
        }
        limiter.forget("holder-a");

        assert_eq!(limiter.num_requeues("holder-a"), 0);
        assert_eq!(limiter.when("holder-a"), Duration::from_millis(500));
    }

    /// Test that very long failure streaks never overflow
    #[test]
    fn test_many_failures_stay_capped() {
        let limiter =
            ItemExponentialFailureRateLimiter::new(Duration::from_secs(3600), Duration::from_secs(7200));
        for _ in 0..100 {
            assert!(limiter.when("holder-a") <= Duration::from_secs(7200));
        }
    }
}
