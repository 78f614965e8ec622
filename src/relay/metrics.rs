//! Rolling frame-rate estimate of the relay path

use std::time::{Duration, Instant};

use crate::assets::RATE_WINDOW;

/// Counts frames over a wall-clock window and yields `frames / elapsed` when the
/// window closes. Observability only: nothing on the data path depends on it.
#[derive(Debug, Clone)]
pub struct RateMeter {
    window: Duration,
    frames: u64,
    window_start: Instant,
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateMeter {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self::with_window(RATE_WINDOW, start)
    }

    pub fn with_window(window: Duration, start: Instant) -> Self {
        Self {
            window,
            frames: 0,
            window_start: start,
        }
    }

    /// Count one frame seen at `now`
    ///
    /// Returns the rate once at least one window has elapsed since the last
    /// sample, then starts a new window at `now`.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }

        let rate = self.frames as f64 / elapsed.as_secs_f64();
        self.frames = 0;
        self.window_start = now;
        Some(rate)
    }

    /// Frames counted in the current, still open window
    pub fn pending_frames(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_feed_converges_to_n_over_t() {
        let start = Instant::now();
        let mut meter = RateMeter::starting_at(start);
        let total = Duration::from_secs(3);
        let frames = 90u32;

        let mut rates = Vec::new();
        for i in 1..=frames {
            if let Some(rate) = meter.tick(start + total * i / frames) {
                rates.push(rate);
            }
        }

        assert_eq!(rates.len(), 3);
        let expected = frames as f64 / total.as_secs_f64();
        for rate in rates {
            assert!((rate - expected).abs() < 0.01, "rate {rate} vs {expected}");
        }
        assert_eq!(meter.pending_frames(), 0);
    }

    #[test]
    fn test_counter_resets_after_each_window() {
        let start = Instant::now();
        let mut meter = RateMeter::starting_at(start);

        for i in 1..=4u32 {
            assert!(meter.tick(start + Duration::from_millis(100) * i).is_none());
        }
        assert_eq!(meter.pending_frames(), 4);

        let rate = meter.tick(start + Duration::from_secs(1)).unwrap();
        assert!((rate - 5.0).abs() < 1e-9);
        assert_eq!(meter.pending_frames(), 0);

        // New window measured from the last sample
        assert!(meter.tick(start + Duration::from_millis(1500)).is_none());
        assert_eq!(meter.pending_frames(), 1);
    }

    #[test]
    fn test_irregular_feed_uses_real_elapsed_time() {
        let start = Instant::now();
        let mut meter = RateMeter::starting_at(start);
        meter.tick(start + Duration::from_millis(10));
        let rate = meter.tick(start + Duration::from_secs(2)).unwrap();
        assert!((rate - 1.0).abs() < 1e-9);
    }
}
