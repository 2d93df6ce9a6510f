//! Presentation timestamp clocks
//!
//! `PTSClock` is the single timebase shared by the video drain and the audio
//! sidecar of one segment. `MonotonicPts` clamps samples read from it so a
//! track's timestamps never go backwards.

use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PTSClock {
    start: Arc<Instant>,
}

impl PTSClock {
    pub fn new() -> Self {
        Self::from_instant(Instant::now())
    }

    /// Share an existing timebase
    pub fn from_instant(start: Instant) -> Self {
        Self {
            start: Arc::new(start),
        }
    }

    /// Seconds since the clock started
    #[inline]
    pub fn pts(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    #[inline]
    pub fn pts_at(&self, instant: Instant) -> f64 {
        instant.saturating_duration_since(*self.start).as_secs_f64()
    }

    pub fn start_instant(&self) -> Instant {
        *self.start
    }
}

impl Default for PTSClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Wall-clock timestamps for one track, clamped to be non-decreasing
#[derive(Debug, Clone)]
pub struct MonotonicPts {
    clock: PTSClock,
    previous: f64,
}

impl MonotonicPts {
    pub fn new(clock: PTSClock) -> Self {
        Self {
            clock,
            previous: 0.0,
        }
    }

    /// Timestamp for a sample drained now
    pub fn next(&mut self) -> f64 {
        self.clamp(self.clock.pts())
    }

    pub fn clamp(&mut self, pts: f64) -> f64 {
        if pts > self.previous {
            self.previous = pts;
        }
        self.previous
    }

    pub fn previous(&self) -> f64 {
        self.previous
    }
}
