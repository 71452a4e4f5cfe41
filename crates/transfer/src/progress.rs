use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Percentage of chunks the server holds for one file.
///
/// Chunks the server already had before this upload count toward the
/// total, so a resumed upload starts above zero. The reported value never
/// decreases and never exceeds 100.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_count: u32,
    present: u32,
    last_percent: u8,
}

impl ProgressTracker {
    pub fn new(total_count: u32, already_present: u32) -> Self {
        let mut tracker = Self {
            total_count,
            present: already_present.min(total_count),
            last_percent: 0,
        };
        tracker.last_percent = tracker.compute();
        tracker
    }

    fn compute(&self) -> u8 {
        if self.total_count == 0 {
            return 100;
        }
        let pct = (self.present as u64 * 100) / self.total_count as u64;
        pct.min(100) as u8
    }

    /// Records one more stored chunk and returns the new percentage.
    pub fn advance(&mut self) -> u8 {
        self.present = (self.present + 1).min(self.total_count);
        self.last_percent = self.last_percent.max(self.compute());
        self.last_percent
    }

    pub fn percent(&self) -> u8 {
        self.last_percent
    }

    pub fn present(&self) -> u32 {
        self.present
    }

    pub fn total_count(&self) -> u32 {
        self.total_count
    }

    pub fn is_done(&self) -> bool {
        self.present >= self.total_count
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SpeedInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `bytes` sent at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.lock();
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window.
    ///
    /// Returns 0.0 if fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.lock();
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        if s.samples.len() < 2 {
            return 0.0;
        }

        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total_bytes: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn tracker_starts_from_present_chunks() {
        let tracker = ProgressTracker::new(4, 2);
        assert_eq!(tracker.percent(), 50);
        assert!(!tracker.is_done());
    }

    #[test]
    fn tracker_advances_to_hundred() {
        let mut tracker = ProgressTracker::new(3, 0);
        assert_eq!(tracker.percent(), 0);
        assert_eq!(tracker.advance(), 33);
        assert_eq!(tracker.advance(), 66);
        assert_eq!(tracker.advance(), 100);
        assert!(tracker.is_done());
    }

    #[test]
    fn tracker_saturates() {
        let mut tracker = ProgressTracker::new(2, 5);
        assert_eq!(tracker.present(), 2);
        assert_eq!(tracker.percent(), 100);
        assert_eq!(tracker.advance(), 100);
        assert_eq!(tracker.present(), 2);
    }

    #[test]
    fn tracker_never_decreases() {
        let mut tracker = ProgressTracker::new(7, 1);
        let mut last = tracker.percent();
        for _ in 0..10 {
            let next = tracker.advance();
            assert!(next >= last);
            last = next;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn tracker_empty_file_is_complete() {
        let tracker = ProgressTracker::new(0, 0);
        assert_eq!(tracker.percent(), 100);
        assert!(tracker.is_done());
    }

    #[test]
    fn speed_calculator_no_samples() {
        let calc = SpeedCalculator::default();
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_calculator_measures_window() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(10)), None);
        calc.add_sample(500);
        std::thread::sleep(Duration::from_millis(50));
        calc.add_sample(500);
        assert!(calc.bytes_per_second() > 0.0);
    }

    #[test]
    fn speed_calculator_single_sample() {
        let calc = SpeedCalculator::default();
        calc.add_sample(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }


    #[test]
    fn speed_calculator_max_samples() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), Some(5));
        for i in 0..20 {
            calc.add_sample(i * 10);
        }
        assert!(calc.lock().samples.len() <= 5);
    }

    #[test]
    fn speed_calculator_concurrent_access() {
        use std::thread;

        let calc = Arc::new(SpeedCalculator::default());
        let mut handles = vec![];
        for _ in 0..10 {
            let c = Arc::clone(&calc);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    c.add_sample(1);
                    let _ = c.bytes_per_second();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let _ = calc.bytes_per_second();
    }
}
