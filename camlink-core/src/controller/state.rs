//! Connection state machine and reconnect backoff.
//!
//! Provides a `ConnectionState` enum with validated transitions that return
//! `Result` instead of panicking, and the `Backoff` schedule that spaces
//! reconnect attempts.

use std::fmt;
use std::time::Duration;

use crate::config::StreamConfig;
use crate::error::UplinkError;

// ── ConnectionState ──────────────────────────────────────────────

/// Where the uplink stands.
///
/// ```text
///        ┌──────────────► Connecting ─────────────┐
///        │                  │    ▲                 ▼
///      Idle ◄───────────────┼────┼─────────── Streaming
///        ▲                  ▼    │                 │
///        └──────────────── Error ◄─────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection; a connect attempt is due once the retry interval
    /// has elapsed.
    #[default]
    Idle,

    /// A connect attempt is in progress.
    Connecting,

    /// Connected; frames are flowing.
    Streaming,

    /// The last connect or send failed.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Error => write!(f, "Error"),
        }
    }
}

impl ConnectionState {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    /// Idle or Error: a connect attempt may be started.
    pub fn can_connect(&self) -> bool {
        matches!(self, Self::Idle | Self::Error)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`, `Error`.
    pub fn begin_connect(&mut self) -> Result<(), UplinkError> {
        match self {
            Self::Idle | Self::Error => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(UplinkError::InvalidTransition(
                "cannot connect: not in Idle or Error state",
            )),
        }
    }

    /// Valid from: `Connecting`.
    pub fn connected(&mut self) -> Result<(), UplinkError> {
        match self {
            Self::Connecting => {
                *self = Self::Streaming;
                Ok(())
            }
            _ => Err(UplinkError::InvalidTransition(
                "cannot stream: not in Connecting state",
            )),
        }
    }

    /// Valid from: `Connecting`, `Streaming`.
    pub fn fail(&mut self) -> Result<(), UplinkError> {
        match self {
            Self::Connecting | Self::Streaming => {
                *self = Self::Error;
                Ok(())
            }
            _ => Err(UplinkError::InvalidTransition(
                "cannot fail: not in Connecting or Streaming state",
            )),
        }
    }

    /// The link went away while streaming, or the connection is being
    /// rotated.
    ///
    /// Valid from: `Streaming`.
    pub fn link_down(&mut self) -> Result<(), UplinkError> {
        match self {
            Self::Streaming => {
                *self = Self::Idle;
                Ok(())
            }
            _ => Err(UplinkError::InvalidTransition(
                "cannot go idle: not in Streaming state",
            )),
        }
    }

    /// Force-reset to `Idle` regardless of current state.
    pub fn reset(&mut self) {
        *self = Self::Idle;
    }
}

// ── Backoff ──────────────────────────────────────────────────────

/// Reconnect spacing: `base` after the first failure, then multiplied on
/// each consecutive failure up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            base,
            max,
            multiplier,
            current: base,
            failures: 0,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(
            config.reconnect_interval(),
            config.max_reconnect_interval(),
            f64::from(config.reconnect_multiplier),
        )
    }

    /// Interval to wait before the next attempt.
    pub fn interval(&self) -> Duration {
        self.current
    }

    /// Register a failed attempt and return the new interval.
    pub fn record_failure(&mut self) -> Duration {
        self.current = if self.failures == 0 {
            self.base
        } else {
            Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
                .map_or(self.max, |next| next.min(self.max))
        };
        self.failures = self.failures.saturating_add(1);
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.base;
        self.failures = 0;
    }
}

// ── Tests ────────────────────────────────────────────────────────
