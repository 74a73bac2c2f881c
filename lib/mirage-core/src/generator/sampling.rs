//! Weighted sampling primitives.
//!
//! Every random decision the generators make goes through these functions, over an injected RNG, so that seeded jobs
//! replay identically.

use std::ops::RangeInclusive;

use rand::Rng;

use crate::config::LatencyConfig;

const NANOS_PER_MILLI: u64 = 1_000_000;

/// Baseline latency range, in milliseconds, used when no latency configuration applies or its probability misses.
pub const BASELINE_LATENCY_MS: RangeInclusive<u64> = 1..=5;

/// Flips a weighted coin, returning `true` with probability `p`.
///
/// Probabilities at or below zero never succeed and probabilities at or above one always succeed, without consuming
/// randomness.
pub fn coin<R: Rng + ?Sized>(rng: &mut R, p: f64) -> bool {
    if p <= 0.0 {
        false
    } else if p >= 1.0 {
        true
    } else {
        rng.random::<f64>() < p
    }
}

/// Combines two independent probabilities: the chance that at least one of the events happens.
pub fn union_probability(a: f64, b: f64) -> f64 {
    1.0 - (1.0 - a) * (1.0 - b)
}

/// Draws a duration, in nanoseconds, uniformly from `[min_ms, max_ms]`.
pub fn uniform_ms<R: Rng + ?Sized>(rng: &mut R, min_ms: u64, max_ms: u64) -> u64 {
    let min_ns = min_ms.saturating_mul(NANOS_PER_MILLI);
    let max_ns = max_ms.saturating_mul(NANOS_PER_MILLI).max(min_ns);
    rng.random_range(min_ns..=max_ns)
}

/// Samples a latency, in nanoseconds.
///
/// With the configuration's probability, the latency is uniform in its `[min_ms, max_ms]`; otherwise, or when there is
/// no configuration, it is drawn from the fast baseline.
pub fn sample_latency_ns<R: Rng + ?Sized>(rng: &mut R, latency: Option<&LatencyConfig>) -> u64 {
    match latency {
        Some(latency) if coin(rng, latency.probability) => uniform_ms(rng, latency.min_ms, latency.max_ms),
        _ => uniform_ms(rng, *BASELINE_LATENCY_MS.start(), *BASELINE_LATENCY_MS.end()),
    }
}

/// Picks an element uniformly, or `None` if the slice is empty.
pub fn choose<'a, R: Rng + ?Sized, T>(rng: &mut R, items: &'a [T]) -> Option<&'a T> {
    if items.is_empty() {
        None
    } else {
        Some(&items[rng.random_range(0..items.len())])
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng as _};

    use super::*;

    const SAMPLES: usize = 10_000;

    fn in_range_fraction(latency: &LatencyConfig, seed: u64) -> f64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let range = (latency.min_ms * NANOS_PER_MILLI)..=(latency.max_ms * NANOS_PER_MILLI);
        let hits = (0..SAMPLES)
            .filter(|_| range.contains(&sample_latency_ns(&mut rng, Some(latency))))
            .count();
        hits as f64 / SAMPLES as f64
    }

    #[test]
    fn always_draws_from_configured_range() {
        assert_eq!(in_range_fraction(&LatencyConfig::new(50, 200, 1.0), 1), 1.0);
    }

    #[test]
    fn never_draws_from_configured_range() {
        assert_eq!(in_range_fraction(&LatencyConfig::new(50, 200, 0.0), 2), 0.0);
    }

    #[test]
    fn half_probability_splits_roughly_evenly() {
        let fraction = in_range_fraction(&LatencyConfig::new(50, 200, 0.5), 3);
        assert!((0.45..=0.55).contains(&fraction), "fraction was {}", fraction);
    }

    #[test]
    fn missing_config_uses_baseline() {
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..1_000 {
            let ns = sample_latency_ns(&mut rng, None);
            assert!((NANOS_PER_MILLI..=5 * NANOS_PER_MILLI).contains(&ns));
        }
    }

    #[test]
    fn error_rates_compose_by_union() {
        assert_eq!(union_probability(0.0, 0.0), 0.0);
        assert_eq!(union_probability(1.0, 0.3), 1.0);
        assert!((union_probability(0.1, 0.2) - 0.28).abs() < 1e-12);
    }

    #[test]
    fn choose_handles_empty() {
        let mut rng = StdRng::seed_from_u64(5);
        assert_eq!(choose::<_, u8>(&mut rng, &[]), None);
        assert_eq!(choose(&mut rng, &[9]), Some(&9));
    }

    proptest! {
        #[test]
        fn property_test_union_is_a_probability(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
            let p = union_probability(a, b);
            prop_assert!((0.0..=1.0).contains(&p));
            prop_assert!(p + 1e-12 >= a.max(b));
        }

        #[test]
        fn property_test_uniform_stays_in_bounds(min in 0u64..10_000, width in 0u64..10_000, seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let ns = uniform_ms(&mut rng, min, min + width);
            prop_assert!(ns >= min * NANOS_PER_MILLI);
            prop_assert!(ns <= (min + width) * NANOS_PER_MILLI);
        }
    }
}
