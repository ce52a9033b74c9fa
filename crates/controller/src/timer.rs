use std::thread;
use std::time::{Duration, Instant};

/// Remaining time below which `wait` spins instead of sleeping.
const SPIN_MARGIN: Duration = Duration::from_micros(100);

/// Fixed-rate tick scheduler for the control thread.
///
/// Deadlines lie on a fixed grid `start + k * period`, so a late tick does not
/// shift the ticks after it. A tick that reaches `wait` after its deadline is
/// counted as a miss and the loop carries on immediately.
#[derive(Debug)]
pub struct LoopTimer {
    period: Duration,
    start: Instant,
    next_deadline: Instant,
    ticks: u64,
    misses: u64,
    waited: Duration,
}

impl LoopTimer {
    pub fn new(period: Duration) -> Self {
        let start = Instant::now();
        Self {
            period,
            start,
            next_deadline: start + period,
            ticks: 0,
            misses: 0,
            waited: Duration::ZERO,
        }
    }

    pub fn from_frequency(hz: f64) -> Self {
        Self::new(Duration::from_nanos((1e9 / hz).round() as u64))
    }

    /// Blocks until the next tick boundary and returns the actual time since start.
    pub fn wait(&mut self) -> Duration {
        let now = Instant::now();
        if now > self.next_deadline {
            self.misses += 1;
        } else {
            let remaining = self.next_deadline - now;
            if remaining > SPIN_MARGIN {
                thread::sleep(remaining - SPIN_MARGIN);
            }
            while Instant::now() < self.next_deadline {
                std::hint::spin_loop();
            }
            self.waited += self.next_deadline - now;
        }
        self.ticks += 1;
        self.next_deadline += self.period;
        self.start.elapsed()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn elapsed_ticks(&self) -> u64 {
        self.ticks
    }

    pub fn elapsed_time(&self) -> Duration {
        self.start.elapsed()
    }

    /// Drift-free reference time, `ticks * period`.
    pub fn elapsed_time_ideal(&self) -> Duration {
        let nanos = self.period.as_nanos() * u128::from(self.ticks);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Share of elapsed wall time spent waiting rather than computing.
    pub fn wait_ratio(&self) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (self.waited.as_secs_f64() / elapsed).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_follow_the_ideal_grid() {
        let mut timer = LoopTimer::new(Duration::from_millis(2));
        for _ in 0..10 {
            timer.wait();
        }
        assert_eq!(timer.elapsed_ticks(), 10);
        assert_eq!(timer.elapsed_time_ideal(), Duration::from_millis(20));
        assert!(timer.elapsed_time() >= Duration::from_millis(20));
        assert!(timer.wait_ratio() > 0.3);
    }

    #[test]
    fn overrun_counts_a_miss_without_stopping() {
        let mut timer = LoopTimer::new(Duration::from_millis(1));
        timer.wait();
        let before = timer.misses();
        thread::sleep(Duration::from_millis(5));
        let returned = timer.wait();
        assert!(timer.misses() > before);
        assert_eq!(timer.elapsed_ticks(), 2);
        assert!(returned >= Duration::from_millis(5));
    }

    #[test]
    fn misses_never_decrease() {
        let mut timer = LoopTimer::from_frequency(2000.0);
        let mut last = 0;
        for i in 0..20 {
            if i % 5 == 0 {
                thread::sleep(Duration::from_millis(1));
            }
            timer.wait();
            assert!(timer.misses() >= last);
            last = timer.misses();
        }
    }
}
