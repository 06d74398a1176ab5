//! Console progress bar for interactive runs.
use std::fmt;

const BAR_WIDTH: usize = 30;

/// Fixed-width progress bar over a run's configured duration, rendered once
/// per second alongside the live counters.
#[derive(Debug)]
pub struct ProgressBar {
    duration: u64,
    elapsed: u64,
}

impl ProgressBar {
    pub fn new(duration: u64) -> Self {
        Self {
            duration,
            elapsed: 0,
        }
    }

    pub fn update_time(&mut self, elapsed: u64) {
        self.elapsed = elapsed.min(self.duration);
    }
}

impl fmt::Display for ProgressBar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fraction = if self.duration == 0 {
            1.0
        } else {
            self.elapsed as f64 / self.duration as f64
        };
        let filled = ((fraction * BAR_WIDTH as f64) as usize).min(BAR_WIDTH);
        write!(
            f,
            "[{}{}] {:>3}%  {}s/{}s",
            "=".repeat(filled),
            " ".repeat(BAR_WIDTH - filled),
            (fraction * 100.0) as u32,
            self.elapsed,
            self.duration,
        )
    }
}
