//! Utilities for adding a bit of jitter to reduce stampeding

use std::time::Duration;

/// A type that perturbs retry delays
pub trait JitterSource: Send + Sync {
    /// Jitters a given delay
    fn jitter(&self, delay: Duration) -> Duration;
}

/// A jitter source that does not do any jittering
#[derive(Clone, Copy, Debug)]
pub struct NullJitter;

impl JitterSource for NullJitter {
    #[inline]
    fn jitter(&self, delay: Duration) -> Duration {
        delay
    }
}

/// Shortens delays by a random amount
///
/// Delays jittered by this type have a uniform distribution in the interval
/// `[delay * (1 - max_fraction), delay]`, so many processes that failed at the
/// same moment do not all retry at the same moment.
#[derive(Clone, Copy, Debug)]
pub struct RandomJitter {
    max_fraction: f64,
}

impl RandomJitter {
    /// Constructs a jitter source that may shorten delays by up to `max_fraction`
    ///
    /// `max_fraction` is clamped to `[0, 1]`; NaN disables jitter.
    pub fn new(max_fraction: f64) -> Self {
        let max_fraction = if max_fraction.is_nan() {
            0.0
        } else {
            max_fraction.clamp(0.0, 1.0)
        };
        Self { max_fraction }
    }
}

impl JitterSource for RandomJitter {
    fn jitter(&self, delay: Duration) -> Duration {
        use rand::Rng;

        if self.max_fraction == 0.0 {
            return delay;
        }
        let cut = rand::thread_rng().gen_range(0.0..=self.max_fraction);
        delay.mul_f64(1.0 - cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_jitter_stays_within_bounds() {
        let jitter = RandomJitter::new(0.5);
        let delay = Duration::from_millis(1_000);

        for _ in 0..1_000 {
            let jittered = jitter.jitter(delay);
            assert!(jittered <= delay);
            assert!(jittered >= Duration::from_millis(500));
        }
    }

    #[test]
    fn fraction_is_clamped() {
        let jitter = RandomJitter::new(7.0);
        let jittered = jitter.jitter(Duration::from_secs(1));
        assert!(jittered <= Duration::from_secs(1));
    }

    #[test]
    fn nan_fraction_disables_jitter() {
        let delay = Duration::from_millis(750);
        assert_eq!(RandomJitter::new(f64::NAN).jitter(delay), delay);
    }

    #[test]
    fn null_jitter_is_identity() {
        assert_eq!(NullJitter.jitter(Duration::from_millis(3)), Duration::from_millis(3));
    }
}
