//! Captured frames and the buffer pool they are drawn from.
//!
//! A [`FrameHandle`] is the only way to hold a pool buffer. It is moved,
//! never cloned, through the pipeline:
//!
//! ```text
//! FramePool ──acquire──► Controller ──enqueue──► queue slot ──► Sender
//!     ▲                                                          │
//!     └────────────────────── drop / release ◄───────────────────┘
//! ```
//!
//! Releasing consumes the handle, so a frame cannot be released twice, and
//! dropping a handle on any path hands its buffer back to the pool.

pub mod pool;
pub mod source;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub use pool::{FramePool, PoolStats};
pub use source::{DirectorySource, FrameSource, PatternSource, pattern_sequence};

// ── FrameFormat ──────────────────────────────────────────────────

/// Encoding of a captured frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameFormat {
    /// Baseline JPEG, the only format the multipart stream carries.
    Jpeg,
    /// 16 bits per pixel, RGB 5-6-5.
    Rgb565,
    /// 16 bits per pixel, YUV 4:2:2.
    Yuv422,
    /// 8 bits per pixel luminance.
    Grayscale,
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jpeg => write!(f, "jpeg"),
            Self::Rgb565 => write!(f, "rgb565"),
            Self::Yuv422 => write!(f, "yuv422"),
            Self::Grayscale => write!(f, "grayscale"),
        }
    }
}

// ── CaptureTime ──────────────────────────────────────────────────

/// Wall-clock capture timestamp, split the way the sensor driver reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct CaptureTime {
    pub secs: u64,
    /// Always below 1 000 000.
    pub micros: u32,
}

impl CaptureTime {
    pub fn new(secs: u64, micros: u32) -> Self {
        Self {
            secs: secs + u64::from(micros / 1_000_000),
            micros: micros % 1_000_000,
        }
    }

    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            secs: since_epoch.as_secs(),
            micros: since_epoch.subsec_micros(),
        }
    }
}

impl fmt::Display for CaptureTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

// ── FrameHandle ──────────────────────────────────────────────────

/// Exclusive ownership of one pool buffer holding a captured frame.
pub struct FrameHandle {
    data: Vec<u8>,
    format: FrameFormat,
    timestamp: CaptureTime,
    pool: FramePool,
}

impl FrameHandle {
    pub(crate) fn new(
        data: Vec<u8>,
        format: FrameFormat,
        timestamp: CaptureTime,
        pool: FramePool,
    ) -> Self {
        Self {
            data,
            format,
            timestamp,
            pool,
        }
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn timestamp(&self) -> CaptureTime {
        self.timestamp
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: CaptureTime) {
        self.timestamp = timestamp;
    }

    /// Return the buffer to its pool.
    pub fn release(self) {
        tracing::trace!(len = self.data.len(), "frame released");
    }
}

impl Drop for FrameHandle {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.data));
    }
}

impl fmt::Debug for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameHandle")
            .field("format", &self.format)
            .field("len", &self.data.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────
