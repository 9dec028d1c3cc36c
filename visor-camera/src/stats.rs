//! Fixed-window moving averages for frame timing.

use std::collections::VecDeque;

/// A moving average over the last `window` samples.
///
/// Used for inter-frame interval, processing duration, and total frame
/// time; FPS is derived as `1 / mean interval`.
pub struct MovingStats {
    window: usize,
    samples: VecDeque<f64>,
    sum: f64,
}

impl MovingStats {
    pub fn new(window: usize) -> Self {
        assert!(window > 0, "window must be nonzero");
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            sum: 0.0,
        }
    }

    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.window {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old;
            }
        }
        self.samples.push_back(sample);
        self.sum += sample;
    }

    /// Mean of the samples currently in the window, or 0 when empty.
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.sum = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_mean_is_zero() {
        assert_eq!(MovingStats::new(30).mean(), 0.0);
    }

    #[test]
    fn test_fps_converges_at_fixed_interval() {
        // 30 frames at a synthetic 33ms interval: FPS = 1000/33 = 30.30...
        let mut stats = MovingStats::new(30);
        for _ in 0..30 {
            stats.push(33.0);
        }
        let fps = 1000.0 / stats.mean();
        assert!((fps - 30.3).abs() < 0.1, "fps was {fps}");
    }

    #[test]
    fn test_window_slides() {
        let mut stats = MovingStats::new(3);
        for s in [10.0, 20.0, 30.0, 40.0] {
            stats.push(s);
        }
        assert_eq!(stats.count(), 3);
        assert_eq!(stats.mean(), 30.0);
    }

    #[test]
    fn test_clear() {
        let mut stats = MovingStats::new(3);
        stats.push(5.0);
        stats.clear();
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.mean(), 0.0);
    }
}
