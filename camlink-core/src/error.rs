//! Domain-specific error types for the camlink pipeline.
//!
//! All fallible operations return `Result<T, UplinkError>`. Nothing in the
//! pipeline panics on a network or capture failure; every error is typed and
//! carries a human-readable message that can be surfaced to an event sink.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the streaming pipeline.
#[derive(Debug, Error)]
pub enum UplinkError {
    // ── Capture Errors ───────────────────────────────────────────
    /// The frame source could not produce a frame this cycle.
    #[error("capture failed: {0}")]
    Capture(String),

    /// Every buffer of the frame pool is currently checked out.
    #[error("frame buffer pool exhausted ({capacity} buffers in use)")]
    PoolExhausted { capacity: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// Opening the stream (TCP connect or request head) failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The stream endpoint is not a usable `http://` URL.
    #[error("invalid stream url: {0}")]
    InvalidUrl(String),

    /// A write delivered fewer bytes than requested. The connection has
    /// been torn down.
    #[error("Write incomplete: {written}/{expected} bytes")]
    WriteIncomplete { written: usize, expected: usize },

    /// A send was attempted without an open connection.
    #[error("client not connected")]
    NotConnected,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The TCP/IO layer reported an error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // ── Queue Errors ─────────────────────────────────────────────
    /// A multipart header exceeded the fixed chunk header capacity.
    #[error("header too large: {len} bytes (max {max})")]
    HeaderTooLarge { len: usize, max: usize },

    /// The sender queue stayed full for the whole enqueue timeout.
    #[error("sender queue full")]
    QueueFull,

    /// The sender worker is not running.
    #[error("sender stopped")]
    SenderStopped,

    // ── State Errors ─────────────────────────────────────────────
    /// A connection state transition was requested from the wrong state.
    #[error("invalid state transition: {0}")]
    InvalidTransition(&'static str),

    // ── Configuration Errors ─────────────────────────────────────
    /// A configuration value is out of range or malformed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl UplinkError {
    /// Transient errors are retried by the controller without any state
    /// change.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Capture(_) | Self::PoolExhausted { .. } | Self::QueueFull
        )
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for UplinkError {
    fn from(s: String) -> Self {
        UplinkError::Other(s)
    }
}

impl From<&str> for UplinkError {
    fn from(s: &str) -> Self {
        UplinkError::Other(s.to_string())
    }
}

// ── Tests ────────────────────────────────────────────────────────
