//! Retry delay calculation
//!
//! `delay = min(max, base * multiplier^attempt)`, optionally spread by a
//! symmetric jitter of `± delay * jitter_ratio`. The random source is passed
//! in so that schedules are reproducible under a seeded generator.

use crate::types::RetryPolicy;
use rand::Rng;
use std::time::Duration;

/// Exponents above this already saturate any sane `max_delay_ms`.
const MAX_EXPONENT: u32 = 64;

/// Compute the delay in milliseconds before the retry following `attempt`.
///
/// Returns 0 when `base_delay_ms` is 0. Never negative.
pub fn calculate_delay<R: Rng + ?Sized>(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
    jitter_ratio: f64,
    rng: &mut R,
) -> u64 {
    if base_delay_ms == 0 {
        return 0;
    }

    let exponent = attempt.min(MAX_EXPONENT) as i32;
    let exponential = base_delay_ms as f64 * multiplier.powi(exponent);
    let capped = exponential.min(max_delay_ms as f64);

    if jitter_ratio.is_nan() || jitter_ratio <= 0.0 {
        return capped.floor() as u64;
    }

    let spread: f64 = rng.random_range(-1.0..=1.0);
    (capped + spread * capped * jitter_ratio).floor().max(0.0) as u64
}

/// Delays for every retry a policy allows, in order.
pub fn schedule<R: Rng + ?Sized>(policy: &RetryPolicy, rng: &mut R) -> Vec<Duration> {
    (0..policy.max_retries)
        .map(|attempt| policy.delay_for_attempt(attempt, rng))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_zero_base_never_waits() {
        let mut rng = rng();
        for attempt in 0..6 {
            assert_eq!(calculate_delay(attempt, 0, 30_000, 2.0, 0.5, &mut rng), 0);
        }
    }

    #[test]
    fn test_exponential_growth_without_jitter() {
        let mut rng = rng();
        assert_eq!(calculate_delay(0, 100, 10_000, 2.0, 0.0, &mut rng), 100);
        assert_eq!(calculate_delay(1, 100, 10_000, 2.0, 0.0, &mut rng), 200);
        assert_eq!(calculate_delay(2, 100, 10_000, 2.0, 0.0, &mut rng), 400);
        assert_eq!(calculate_delay(3, 150, 10_000, 1.5, 0.0, &mut rng), 506);
    }

    #[test]
    fn test_cap_applies() {
        let mut rng = rng();
        assert_eq!(calculate_delay(10, 500, 5_000, 2.0, 0.0, &mut rng), 5_000);
        // absurd attempt indices saturate instead of overflowing
        assert_eq!(calculate_delay(u32::MAX, 500, 5_000, 4.0, 0.0, &mut rng), 5_000);
    }

    #[test]
    fn test_nan_or_negative_jitter_means_none() {
        let mut rng = rng();
        assert_eq!(calculate_delay(2, 500, 30_000, 2.0, f64::NAN, &mut rng), 2_000);
        assert_eq!(calculate_delay(2, 500, 30_000, 2.0, -0.5, &mut rng), 2_000);
    }

    #[test]
    fn test_no_jitter_is_pure() {
        let mut a = StdRng::seed_from_u64(1);
        let mut b = StdRng::seed_from_u64(99);
        for attempt in 0..5 {
            assert_eq!(
                calculate_delay(attempt, 250, 8_000, 3.0, 0.0, &mut a),
                calculate_delay(attempt, 250, 8_000, 3.0, 0.0, &mut b),
            );
        }
    }

    #[test]
    fn test_jitter_stays_within_ratio() {
        let mut rng = rng();
        for _ in 0..256 {
            let delay = calculate_delay(1, 1_000, 30_000, 2.0, 0.25, &mut rng);
            assert!((1_500..=2_500).contains(&delay), "delay {delay} out of bounds");
        }
    }

    #[test]
    fn test_full_jitter_never_negative() {
        let mut rng = rng();
        for _ in 0..256 {
            let delay = calculate_delay(0, 10, 100, 1.0, 1.0, &mut rng);
            assert!(delay <= 20);
        }
    }

    #[test]
    fn test_seeded_jitter_is_reproducible() {
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        let first: Vec<u64> = (0..5)
            .map(|n| calculate_delay(n, 300, 30_000, 2.0, 0.5, &mut a))
            .collect();
        let second: Vec<u64> = (0..5)
            .map(|n| calculate_delay(n, 300, 30_000, 2.0, 0.5, &mut b))
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_schedule_len_matches_retries() {
        let policy = RetryPolicy::default().with_max_retries(3).with_jitter(0.0);
        let delays = schedule(&policy, &mut rng());
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1_000),
                Duration::from_millis(2_000),
            ]
        );
    }
}
