//! Redial backoff state.
//!
//! Tracks the delay between reconnection attempts. Each failed attempt grows
//! the delay by a uniform random factor in [1.1, 1.5] — roughly 1.3x on
//! average, so one bad connection is not penalized too hard — capped at the
//! configured maximum. A successful connection resets the state.

use crate::options::DialerOptions;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectState {
    min_interval: Duration,
    max_interval: Duration,
    current: Duration,
    attempt: u32,
}

const MIN_GROWTH: f64 = 1.1;
const MAX_GROWTH: f64 = 1.5;

impl ReconnectState {
    #[must_use]
    pub const fn new(opts: &DialerOptions) -> Self {
        Self {
            min_interval: opts.min_reconnect_interval,
            max_interval: opts.max_reconnect_interval,
            current: opts.min_reconnect_interval,
            attempt: 0,
        }
    }

    /// Delay to apply before the next attempt, without recording a failure.
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }

    /// Record a failed attempt: returns the delay to sleep now and grows the
    /// delay for the attempt after it.
    pub fn advance(&mut self) -> Duration {
        let delay = self.current;
        self.attempt += 1;

        let factor = MIN_GROWTH + rand::random::<f64>() * (MAX_GROWTH - MIN_GROWTH);
        let mut grown = self.current.mul_f64(factor);
        if !self.max_interval.is_zero() && grown > self.max_interval {
            grown = self.max_interval;
        }
        self.current = grown;

        delay
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.min_interval;
        self.attempt = 0;
    }

    /// Failed attempts since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(min_ms: u64, max_ms: u64) -> DialerOptions {
        DialerOptions::default()
            .with_min_reconnect_interval(Duration::from_millis(min_ms))
            .with_max_reconnect_interval(Duration::from_millis(max_ms))
    }

    #[test]
    fn first_delay_is_the_minimum() {
        let mut state = ReconnectState::new(&opts(100, 10_000));
        assert_eq!(state.advance(), Duration::from_millis(100));
        assert_eq!(state.attempt(), 1);
    }

    #[test]
    fn delays_grow_within_jitter_bounds() {
        let mut state = ReconnectState::new(&opts(100, 1_000_000));
        let mut previous = state.advance();
        for _ in 0..16 {
            let next = state.advance();
            assert!(next >= previous, "{next:?} < {previous:?}");
            let ratio = next.as_secs_f64() / previous.as_secs_f64();
            assert!(
                (MIN_GROWTH - 1e-9..=MAX_GROWTH + 1e-9).contains(&ratio),
                "growth factor {ratio} out of range"
            );
            previous = next;
        }
    }

    #[test]
    fn delay_is_capped() {
        let mut state = ReconnectState::new(&opts(100, 300));
        for _ in 0..32 {
            state.advance();
        }
        assert_eq!(state.advance(), Duration::from_millis(300));
        assert_eq!(state.current(), Duration::from_millis(300));
    }

    #[test]
    fn reset_restores_the_minimum() {
        let mut state = ReconnectState::new(&opts(100, 10_000));
        state.advance();
        state.advance();
        assert!(state.attempt() > 0);
        state.reset();
        assert_eq!(state.attempt(), 0);
        assert_eq!(state.current(), Duration::from_millis(100));
    }

    #[test]
    fn zero_max_means_uncapped() {
        let mut state = ReconnectState::new(&opts(100, 0));
        for _ in 0..64 {
            state.advance();
        }
        assert!(state.current() > Duration::from_secs(10));
    }
}
