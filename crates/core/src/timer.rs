//! Frame timing.

use std::time::{Duration, Instant};

/// Reports an averaged frame time at a fixed cadence.
#[derive(Debug)]
pub struct Timer {
    window_start: Instant,
    window_frames: u32,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            window_frames: 0,
        }
    }

    /// Count one finished frame.
    ///
    /// Returns the average frame time once `window` has elapsed since the last
    /// report, and starts a new averaging window.
    pub fn frame_finished(&mut self, window: Duration) -> Option<Duration> {
        self.window_frames += 1;
        let span = self.window_start.elapsed();
        if span < window {
            return None;
        }
        let average = span / self.window_frames;
        self.window_start = Instant::now();
        self.window_frames = 0;
        Some(average)
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        self.window_start = Instant::now();
        self.window_frames = 0;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
