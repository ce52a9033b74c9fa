use std::time::Duration;

/// Observed loop frequency over a rolling interval.
///
/// Only feeds status reporting; the loop timing itself comes from
/// [`crate::timer::LoopTimer`].
#[derive(Debug, Clone)]
pub struct RateMonitor {
    interval: Duration,
    last_update: Duration,
    ticks: u64,
    rate: f64,
}

impl RateMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_update: Duration::ZERO,
            ticks: 0,
            rate: 0.0,
        }
    }

    pub fn tick(&mut self) {
        self.ticks += 1;
    }

    /// Recomputes the rate once `interval` has passed since the last update.
    pub fn update(&mut self, now: Duration) {
        let span = now.saturating_sub(self.last_update);
        if span >= self.interval && !span.is_zero() {
            self.rate = self.ticks as f64 / span.as_secs_f64();
            self.ticks = 0;
            self.last_update = now;
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl Default for RateMonitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_to_the_tick_cadence() {
        let mut monitor = RateMonitor::default();
        for i in 1..=3500u64 {
            monitor.tick();
            monitor.update(Duration::from_micros(i * 1000));
        }
        assert!((monitor.rate() - 1000.0).abs() <= 20.0, "rate {}", monitor.rate());
    }

    #[test]
    fn holds_value_between_updates() {
        let mut monitor = RateMonitor::new(Duration::from_millis(100));
        for i in 1..=100u64 {
            monitor.tick();
            monitor.update(Duration::from_millis(i));
        }
        let first = monitor.rate();
        assert!((first - 1000.0).abs() < 1e-6);
        for i in 101..=150u64 {
            monitor.tick();
            monitor.tick();
            monitor.update(Duration::from_millis(i));
        }
        assert_eq!(monitor.rate(), first);
    }

    #[test]
    fn reports_zero_before_first_interval() {
        let mut monitor = RateMonitor::default();
        monitor.tick();
        monitor.update(Duration::from_millis(10));
        assert_eq!(monitor.rate(), 0.0);
    }
}
