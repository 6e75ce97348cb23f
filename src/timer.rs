use std::time::{Duration, Instant};

use log::debug;

/// Logs how long the enclosing scope took when dropped.
pub struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    pub fn new(name: &'static str) -> Timer {
        Timer {
            start: Instant::now(),
            name,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let elapsed = self.elapsed();
        debug!(
            "{} took {}s {}ms",
            self.name,
            elapsed.as_secs(),
            elapsed.subsec_millis()
        );
    }
}
