use rand::Rng;
use std::time::Duration;

/// Exponential backoff with randomized jitter and an attempt budget.
///
/// Each draw returns the current nominal delay spread by ±25%, then
/// grows the nominal delay by the configured factor up to the cap.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
    attempts: u32,
    max_attempts: u32,
}

impl ExponentialBackoff {
    /// Creates a backoff starting at `initial`, multiplying by `factor`
    /// up to `max`, allowing `max_attempts` draws before exhaustion.
    #[must_use]
    pub const fn new(initial: Duration, max: Duration, factor: f64, max_attempts: u32) -> Self {
        Self {
            initial,
            max,
            factor,
            current: initial,
            attempts: 0,
            max_attempts,
        }
    }

    /// Draws the next delay and advances the nominal value.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);

        let nominal = self.current;
        let grown = nominal.as_secs_f64() * self.factor;
        self.current = if grown >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(grown)
        };

        let spread = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_secs_f64(nominal.as_secs_f64() * spread)
    }

    /// Number of delays drawn since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// True once the attempt budget is spent.
    #[must_use]
    pub const fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Resets the nominal delay and the attempt count.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff_ms(initial: u64, max: u64, factor: f64, attempts: u32) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(initial),
            Duration::from_millis(max),
            factor,
            attempts,
        )
    }

    #[test]
    fn first_delay_stays_within_the_jitter_band_of_initial() {
        let mut backoff = backoff_ms(200, 10_000, 2.0, 5);
        let drawn = backoff.next_delay().as_millis();
        assert!(
            (150..=250).contains(&drawn),
            "first draw {drawn}ms outside 200ms ± 25%"
        );
    }

    #[test]
    fn no_draw_exceeds_the_jittered_cap() {
        let mut backoff = backoff_ms(100, 450, 2.0, 50);
        // Nominal growth is 100 → 200 → 400 → 450 (capped); with jitter
        // no draw may pass 450 * 1.25.
        for _ in 0..8 {
            let drawn = backoff.next_delay().as_millis();
            assert!(drawn <= 563, "draw {drawn}ms exceeds the jittered cap");
        }
    }

    #[test]
    fn nominal_delay_reaches_the_cap_band() {
        let mut backoff = backoff_ms(100, 800, 2.0, 50);
        for _ in 0..5 {
            backoff.next_delay();
        }
        // Nominal is pinned at 800ms by now.
        let drawn = backoff.next_delay().as_millis();
        assert!(
            (600..=1001).contains(&drawn),
            "capped draw {drawn}ms outside 800ms ± 25%"
        );
    }

    #[test]
    fn factor_one_keeps_the_nominal_delay_flat() {
        let mut backoff = backoff_ms(100, 1000, 1.0, 50);
        for _ in 0..8 {
            let drawn = backoff.next_delay().as_millis();
            assert!(
                (75..=125).contains(&drawn),
                "flat-factor draw {drawn}ms left the initial band"
            );
        }
    }

    #[test]
    fn budget_exhausts_after_configured_attempts() {
        let mut backoff = backoff_ms(100, 5000, 2.0, 3);
        assert!(!backoff.exhausted());
        for _ in 0..3 {
            backoff.next_delay();
        }
        assert_eq!(backoff.attempts(), 3);
        assert!(backoff.exhausted());
    }

    #[test]
    fn reset_restores_initial_band_and_budget() {
        let mut backoff = backoff_ms(100, 5000, 2.0, 4);
        for _ in 0..4 {
            backoff.next_delay();
        }
        assert!(backoff.exhausted());

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(!backoff.exhausted());
        let drawn = backoff.next_delay().as_millis();
        assert!(
            (75..=125).contains(&drawn),
            "post-reset draw {drawn}ms outside the initial band"
        );
    }
}
