//! Frame-rate accounting.

use std::time::Duration;

use tokio::time::Instant;

/// Shortest window a rate is computed over.
const MIN_WINDOW: Duration = Duration::from_millis(900);

/// A finished measurement window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsReport {
    /// Frames counted during the window.
    pub frames: u32,
    pub window: Duration,
}

/// Counts frames over a rolling window.
///
/// The first poll only records the baseline.
#[derive(Debug)]
pub struct MetricsWindow {
    interval: Duration,
    started: Option<Instant>,
    frames: u32,
    last_fps: u32,
}

impl MetricsWindow {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            started: None,
            frames: 0,
            last_fps: 0,
        }
    }

    pub fn record_frame(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    /// Frames counted in the current window so far.
    pub fn pending_frames(&self) -> u32 {
        self.frames
    }

    /// Frame count of the last finished window.
    pub fn last_fps(&self) -> u32 {
        self.last_fps
    }

    /// Close the window if it is due and return its totals.
    pub fn poll(&mut self, now: Instant) -> Option<MetricsReport> {
        let Some(started) = self.started else {
            self.started = Some(now);
            return None;
        };
        let window = now.saturating_duration_since(started);
        if window < MIN_WINDOW || window < self.interval {
            return None;
        }

        let report = MetricsReport {
            frames: self.frames,
            window,
        };
        self.last_fps = self.frames;
        self.frames = 0;
        self.started = Some(now);
        Some(report)
    }
}

// ── Tests ────────────────────────────────────────────────────────
