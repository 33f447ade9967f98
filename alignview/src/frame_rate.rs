use std::collections::VecDeque;
use std::time::Instant;

/// Rolling frame rate over the last `capacity` frame arrivals
#[derive(Debug, Clone)]
pub struct FrameRateMeter {
    arrivals: VecDeque<Instant>,
    capacity: usize,
}

impl FrameRateMeter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            arrivals: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a frame arriving at `now`, returning frames per second once two
    /// arrivals are known.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        if self.arrivals.len() >= self.capacity {
            self.arrivals.pop_front();
        }
        self.arrivals.push_back(now);
        self.rate()
    }

    pub fn rate(&self) -> Option<f64> {
        let first = self.arrivals.front()?;
        let last = self.arrivals.back()?;
        let elapsed = last.duration_since(*first).as_secs_f64();
        if self.arrivals.len() < 2 || elapsed <= 0.0 {
            return None;
        }
        Some((self.arrivals.len() - 1) as f64 / elapsed)
    }

    pub fn reset(&mut self) {
        self.arrivals.clear();
    }
}
