use std::time::{Duration, Instant};

/// Monotonic stopwatch. `ticks()` only advances while the clock runs, so
/// any span measured across a `stop()`/`start()` pair excludes the gap.
#[derive(Debug, Clone)]
pub struct PrecisionClock {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl Default for PrecisionClock {
    fn default() -> Self {
        PrecisionClock {
            accumulated: Duration::ZERO,
            running_since: None,
        }
    }
}

impl PrecisionClock {
    pub fn started() -> Self {
        let mut c = PrecisionClock::default();
        c.start();
        c
    }

    pub fn start(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    /// Running time in nanoseconds.
    pub fn ticks(&self) -> u64 {
        let live = self.running_since.map_or(Duration::ZERO, |s| s.elapsed());
        (self.accumulated + live).as_nanos() as u64
    }

    pub fn seconds_since(&self, start_ticks: u64) -> f64 {
        self.ticks().saturating_sub(start_ticks) as f64 / 1e9
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn stopped_clock_does_not_advance() {
        let mut c = PrecisionClock::started();
        thread::sleep(Duration::from_millis(10));
        c.stop();
        let frozen = c.ticks();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(c.ticks(), frozen);
        assert!(frozen >= 10_000_000);
    }

    #[test]
    fn gap_is_excluded_after_restart() {
        let mut c = PrecisionClock::started();
        let t0 = c.ticks();
        c.stop();
        thread::sleep(Duration::from_millis(50));
        c.start();
        thread::sleep(Duration::from_millis(5));
        let secs = c.seconds_since(t0);
        assert!(secs >= 0.005);
        assert!(secs < 0.045);
    }

    #[test]
    fn double_start_keeps_origin() {
        let mut c = PrecisionClock::started();
        thread::sleep(Duration::from_millis(5));
        c.start();
        assert!(c.ticks() >= 5_000_000);
    }
}
