//! Delays between retry attempts

use std::time::Duration;

/// How long to wait before each retry of a failed attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay before every retry
    Fixed(Duration),
    /// A delay growing by `step` with each retry
    Linear {
        /// Delay before the first retry and increment for each one after
        step: Duration,
    },
    /// A delay multiplied with each retry, up to a cap
    Exponential(ExponentialBackoff),
}

/// Configuration for exponential backoff
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: u32,
}

impl Default for ExponentialBackoff {
    /// Default backoff configuration
    ///
    /// Uses an initial delay of 200 ms with a multiplier of 2. Maximum delay is
    /// capped at 5 seconds.
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2,
        }
    }
}

impl ExponentialBackoff {
    /// Constructs a new backoff configuration
    ///
    /// The first retry waits `initial_delay`. Each subsequent retry waits
    /// `multiplier` times longer than the previous one, with a cap of `max_delay`.
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
        }
    }

    /// Replaces the initial delay
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }
}

impl Backoff {
    /// Starts tracking delays for one wrapped call
    pub fn handler(&self) -> BackoffHandler<'_> {
        BackoffHandler {
            backoff: self,
            last_delay: None,
            retries: 0,
        }
    }

    /// The same strategy with its base delay replaced
    pub fn with_base_delay(self, delay: Duration) -> Self {
        match self {
            Backoff::Fixed(_) => Backoff::Fixed(delay),
            Backoff::Linear { .. } => Backoff::Linear { step: delay },
            Backoff::Exponential(exp) => Backoff::Exponential(exp.with_initial_delay(delay)),
        }
    }
}

/// A stateful handler that hands out successive backoff delays
#[derive(Debug)]
pub struct BackoffHandler<'a> {
    backoff: &'a Backoff,
    last_delay: Option<Duration>,
    retries: u32,
}

impl BackoffHandler<'_> {
    /// Reports a failure and returns the delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        self.retries += 1;
        let delay = match self.backoff {
            Backoff::Fixed(delay) => *delay,
            Backoff::Linear { step } => step.saturating_mul(self.retries),
            Backoff::Exponential(cfg) => self
                .last_delay
                .map(|d| d.saturating_mul(cfg.multiplier).min(cfg.max_delay))
                .unwrap_or(cfg.initial_delay),
        };
        self.last_delay = Some(delay);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays(backoff: &Backoff, n: usize) -> Vec<Duration> {
        let mut handler = backoff.handler();
        (0..n).map(|_| handler.next_delay()).collect()
    }

    #[test]
    fn fixed_never_changes() {
        let backoff = Backoff::Fixed(Duration::from_millis(250));
        assert_eq!(delays(&backoff, 3), vec![Duration::from_millis(250); 3]);
    }

    #[test]
    fn linear_grows_by_step() {
        let backoff = Backoff::Linear {
            step: Duration::from_millis(100),
        };
        assert_eq!(
            delays(&backoff, 3),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300)
            ]
        );
    }

    #[test]
    fn exponential_doubles_up_to_the_cap() {
        let backoff = Backoff::Exponential(ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_millis(500),
            2,
        ));
        assert_eq!(
            delays(&backoff, 5),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
                Duration::from_millis(500)
            ]
        );
    }

    #[test]
    fn each_handler_starts_over() {
        let backoff = Backoff::Exponential(ExponentialBackoff::default());
        assert_eq!(delays(&backoff, 2), delays(&backoff, 2));
    }

    #[test]
    fn base_delay_override_keeps_the_shape() {
        let backoff = Backoff::Exponential(ExponentialBackoff::default())
            .with_base_delay(Duration::from_millis(50));
        assert_eq!(
            delays(&backoff, 2),
            vec![Duration::from_millis(50), Duration::from_millis(100)]
        );
    }
}
