use std::time::{Duration, Instant};

use caldera::timestamp::Clock;

/// A [`Clock`] counting the seconds elapsed since the process started,
/// optionally accelerated to speed up simulations.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
    speed: u32,
}

impl SystemClock {
    /// Creates a [`SystemClock`] starting now, running `speed` times faster
    /// than real time.
    #[must_use]
    pub fn new(speed: u32) -> Self {
        Self {
            start: Instant::now(),
            speed: speed.max(1),
        }
    }

    /// Returns the acceleration factor.
    #[must_use]
    pub const fn speed(&self) -> u32 {
        self.speed
    }

    /// Converts a simulated duration into real time.
    #[must_use]
    pub fn real(&self, simulated: Duration) -> Duration {
        simulated / self.speed
    }

    fn simulated(&self) -> Duration {
        self.start
            .elapsed()
            .checked_mul(self.speed)
            .unwrap_or(Duration::MAX)
    }
}

impl Clock for SystemClock {
    fn elapsed_secs(&self) -> u32 {
        u32::try_from(self.simulated().as_secs()).unwrap_or(u32::MAX)
    }

    // Sleeps the calling thread for at most one simulated second, which
    // also stalls every other task of a current-thread runtime.
    fn wait_for_next_second(&mut self, current: u32) {
        let next = Duration::from_secs(u64::from(current) + 1);
        while self.elapsed_secs() <= current {
            let left = next.saturating_sub(self.simulated());
            std::thread::sleep(self.real(left).max(Duration::from_millis(1)));
        }
    }
}
