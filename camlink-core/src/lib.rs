//! # camlink-core
//!
//! Streaming pipeline for the camlink device uplink.
//!
//! This crate contains:
//! - **Frame**: `FramePool` buffers and `FrameSource` variants producing `FrameHandle`s
//! - **Transport**: `Transport` with the HTTP multipart and loopback variants, plus the wire format
//! - **Sender**: bounded queue and background worker writing `FrameChunk`s
//! - **Controller**: connection state machine, backoff, escalation, pacing and metrics
//! - **Status**: single-LED `StatusIndicator`
//! - **Events**: `EventSink` observer trait and stock sinks
//! - **Error**: `UplinkError`, typed, `thiserror`-based error hierarchy

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod frame;
pub mod sender;
pub mod status;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use config::{CaptureParams, FrameSize, StreamConfig};
pub use controller::{
    Backoff, ConnectionState, Controller, MemoryRecoveryStore, RecoveryStore, RunOutcome, Tick,
};
pub use error::UplinkError;
pub use events::{Event, EventSink, NullSink, RecordingSink, TracingSink};
pub use frame::{
    CaptureTime, DirectorySource, FrameFormat, FrameHandle, FramePool, FrameSource,
    PatternSource, PoolStats,
};
pub use sender::{FrameChunk, MAX_HEADER_LEN, Rejected, Sender, SenderEvent, SenderStats};
pub use status::{IndicatorOutput, StatusIndicator};
pub use transport::{HttpMultipartTransport, LoopbackTransport, Transport};
