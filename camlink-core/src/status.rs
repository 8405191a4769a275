//! Single-LED status signaling.
//!
//! | State                    | Pattern                                      |
//! |--------------------------|----------------------------------------------|
//! | Streaming                | steady on                                    |
//! | Connecting               | toggle every 500 ms                          |
//! | Idle                     | toggle every 1000 ms                         |
//! | Error                    | toggle every 100 ms                          |
//! | Awaiting recovery        | 5 blinks at 200 ms, then 2000 ms dark        |

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::controller::ConnectionState;

const CONNECTING_PERIOD: Duration = Duration::from_millis(500);
const IDLE_PERIOD: Duration = Duration::from_millis(1000);
const ERROR_PERIOD: Duration = Duration::from_millis(100);
const RECOVERY_PERIOD: Duration = Duration::from_millis(200);
const RECOVERY_PAUSE: Duration = Duration::from_millis(2000);
const RECOVERY_BLINKS: u32 = 5;

/// Where the indicator level goes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IndicatorOutput {
    /// Track the level without driving anything.
    #[default]
    Disabled,
    /// Write `1`/`0` to an LED brightness file, e.g.
    /// `/sys/class/leds/status/brightness`.
    Sysfs(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    Steady,
    Blink(Duration),
    Recovery,
}

impl Pattern {
    fn for_state(state: ConnectionState, awaiting_recovery: bool) -> Self {
        if awaiting_recovery {
            return Self::Recovery;
        }
        match state {
            ConnectionState::Streaming => Self::Steady,
            ConnectionState::Connecting => Self::Blink(CONNECTING_PERIOD),
            ConnectionState::Idle => Self::Blink(IDLE_PERIOD),
            ConnectionState::Error => Self::Blink(ERROR_PERIOD),
        }
    }
}

/// Drives the status LED from the connection state.
#[derive(Debug)]
pub struct StatusIndicator {
    output: IndicatorOutput,
    level: bool,
    pattern: Option<Pattern>,
    last_toggle: Option<Instant>,
    /// Toggles done in the current recovery cycle.
    phase: u32,
    write_failed: bool,
}

impl StatusIndicator {
    pub fn new(output: IndicatorOutput) -> Self {
        Self {
            output,
            level: false,
            pattern: None,
            last_toggle: None,
            phase: 0,
            write_failed: false,
        }
    }

    pub fn is_on(&self) -> bool {
        self.level
    }

    /// Advance the pattern to `now`. Returns `true` if the level changed.
    pub fn update(&mut self, state: ConnectionState, awaiting_recovery: bool, now: Instant) -> bool {
        let pattern = Pattern::for_state(state, awaiting_recovery);
        if self.pattern != Some(pattern) {
            self.pattern = Some(pattern);
            self.phase = 0;
            self.last_toggle = Some(now);
            return self.set(pattern == Pattern::Steady);
        }

        let elapsed = self
            .last_toggle
            .map_or(Duration::MAX, |t| now.saturating_duration_since(t));
        match pattern {
            Pattern::Steady => self.set(true),
            Pattern::Blink(period) => {
                if elapsed < period {
                    return false;
                }
                self.last_toggle = Some(now);
                self.set(!self.level)
            }
            Pattern::Recovery => {
                let cycle_done = self.phase >= RECOVERY_BLINKS * 2;
                let wait = if cycle_done {
                    RECOVERY_PAUSE
                } else {
                    RECOVERY_PERIOD
                };
                if elapsed < wait {
                    return false;
                }
                if cycle_done {
                    self.phase = 0;
                }
                self.phase += 1;
                self.last_toggle = Some(now);
                self.set(!self.level)
            }
        }
    }

    /// Switch the LED off, e.g. on shutdown.
    pub fn off(&mut self) {
        self.pattern = None;
        self.set(false);
    }

    fn set(&mut self, level: bool) -> bool {
        if level == self.level {
            return false;
        }
        self.level = level;
        if let IndicatorOutput::Sysfs(path) = &self.output {
            let value = if level { "1" } else { "0" };
            if let Err(e) = std::fs::write(path, value) {
                if !self.write_failed {
                    warn!("cannot drive status LED at {}: {e}", path.display());
                    self.write_failed = true;
                }
            }
        }
        true
    }
}

// ── Tests ────────────────────────────────────────────────────────
