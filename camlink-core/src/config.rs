//! Stream and capture configuration.
//!
//! [`StreamConfig`] is fixed for the lifetime of a pipeline and shared
//! read-only by the controller, the sender worker and the transport. It is
//! serde-friendly so the device agent can embed it as the `[stream]` table
//! of its TOML file.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::UplinkError;

/// RFC 2046 limit for a multipart boundary token.
const MAX_BOUNDARY_LEN: usize = 70;

// ── StreamConfig ─────────────────────────────────────────────────

/// Tuning knobs for the streaming pipeline. Times are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Multipart boundary token.
    pub boundary: String,
    /// Media type announced for the request body.
    pub content_type: String,
    /// Value of the `X-Framerate` request header.
    pub frame_rate: String,

    /// Socket receive buffer size hint.
    pub buffer_size: usize,
    /// Socket send buffer size hint.
    pub tx_buffer_size: usize,

    /// Body size announced per connection; the stream is rotated before
    /// it would be exceeded.
    pub max_data_size: u64,

    /// First reconnect delay after a failed connect.
    pub reconnect_interval_ms: u32,
    /// Upper bound for the reconnect delay.
    pub max_reconnect_interval_ms: u32,
    /// Growth factor applied to the delay on each consecutive failure.
    pub reconnect_multiplier: f32,

    /// Minimum spacing between metrics updates.
    pub metrics_interval_ms: u32,
    /// Writes slower than this are logged as warnings.
    pub slow_chunk_threshold_ms: u32,

    /// Capture rate cap. Zero disables throttling.
    pub max_fps: u32,
    /// Capacity of the sender queue, in frames.
    pub queue_capacity: usize,
    /// Worker pause after a successful frame.
    pub task_delay_ms: u32,
    /// Worker pause after a failed frame.
    pub send_error_delay_ms: u32,
    /// Consecutive connect failures before escalating to recovery mode.
    pub max_send_failures: u32,

    /// TCP connect + request head deadline.
    pub connect_timeout_ms: u32,
    /// Deadline for each individual socket write.
    pub write_timeout_ms: u32,
    /// How long the producer waits for queue space.
    pub enqueue_timeout_ms: u32,
    /// How long the worker waits for a queued frame before re-checking stop.
    pub dequeue_timeout_ms: u32,
    /// Pause between signalling the worker to stop and polling for its end.
    pub shutdown_grace_ms: u32,
    /// Upper bound on waiting for the worker before aborting it.
    pub shutdown_timeout_ms: u32,
    /// Time the indicator keeps signalling before a requested restart.
    pub restart_delay_ms: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            boundary: "wheelbot".into(),
            content_type: "multipart/x-mixed-replace".into(),
            frame_rate: "60".into(),
            buffer_size: 32 * 1024,
            tx_buffer_size: 32 * 1024,
            max_data_size: 100_000_000,
            reconnect_interval_ms: 5_000,
            max_reconnect_interval_ms: 60_000,
            reconnect_multiplier: 2.0,
            metrics_interval_ms: 1_000,
            slow_chunk_threshold_ms: 50,
            max_fps: 30,
            queue_capacity: 16,
            task_delay_ms: 1,
            send_error_delay_ms: 100,
            max_send_failures: 3,
            connect_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            enqueue_timeout_ms: 10,
            dequeue_timeout_ms: 100,
            shutdown_grace_ms: 200,
            shutdown_timeout_ms: 5_000,
            restart_delay_ms: 1_000,
        }
    }
}

impl StreamConfig {
    /// `Content-Type` request header value, boundary included.
    pub fn content_type_header(&self) -> String {
        format!("{}; boundary={}", self.content_type, self.boundary)
    }

    /// Minimum spacing between captured frames, or `None` when unthrottled.
    pub fn frame_interval(&self) -> Option<Duration> {
        (self.max_fps > 0).then(|| Duration::from_millis(u64::from(1000 / self.max_fps)))
    }

    pub fn reconnect_interval(&self) -> Duration {
        ms(self.reconnect_interval_ms)
    }

    pub fn max_reconnect_interval(&self) -> Duration {
        ms(self.max_reconnect_interval_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        ms(self.metrics_interval_ms)
    }

    pub fn slow_chunk_threshold(&self) -> Duration {
        ms(self.slow_chunk_threshold_ms)
    }

    pub fn task_delay(&self) -> Duration {
        ms(self.task_delay_ms)
    }

    pub fn send_error_delay(&self) -> Duration {
        ms(self.send_error_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        ms(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        ms(self.write_timeout_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        ms(self.enqueue_timeout_ms)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        ms(self.dequeue_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        ms(self.shutdown_grace_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        ms(self.shutdown_timeout_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        ms(self.restart_delay_ms)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), UplinkError> {
        if self.boundary.is_empty() || self.boundary.len() > MAX_BOUNDARY_LEN {
            return Err(UplinkError::Config(format!(
                "boundary must be 1..={MAX_BOUNDARY_LEN} characters"
            )));
        }
        if self.boundary.chars().any(|c| c.is_ascii_control() || c == '\r' || c == '\n') {
            return Err(UplinkError::Config("boundary contains control characters".into()));
        }
        if self.queue_capacity == 0 {
            return Err(UplinkError::Config("queue_capacity must be at least 1".into()));
        }
        if self.max_send_failures == 0 {
            return Err(UplinkError::Config("max_send_failures must be at least 1".into()));
        }
        if !self.reconnect_multiplier.is_finite() || self.reconnect_multiplier < 1.0 {
            return Err(UplinkError::Config(
                "reconnect_multiplier must be a finite value >= 1.0".into(),
            ));
        }
        if self.reconnect_interval_ms > self.max_reconnect_interval_ms {
            return Err(UplinkError::Config(
                "reconnect_interval_ms exceeds max_reconnect_interval_ms".into(),
            ));
        }
        if self.max_data_size == 0 {
            return Err(UplinkError::Config("max_data_size must be non-zero".into()));
        }
        Ok(())
    }
}

fn ms(v: u32) -> Duration {
    Duration::from_millis(u64::from(v))
}

// ── FrameSize ────────────────────────────────────────────────────

/// Sensor resolution presets understood by the capture peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FrameSize {
    R96x96,
    Qqvga,
    Qcif,
    Hqvga,
    R240x240,
    Qvga,
    Cif,
    Hvga,
    #[default]
    Vga,
    Svga,
    Xga,
    Hd,
    Sxga,
    Uxga,
}

impl FrameSize {
    /// Width and height in pixels.
    pub const fn dimensions(self) -> (u32, u32) {
        match self {
            Self::R96x96 => (96, 96),
            Self::Qqvga => (160, 120),
            Self::Qcif => (176, 144),
            Self::Hqvga => (240, 176),
            Self::R240x240 => (240, 240),
            Self::Qvga => (320, 240),
            Self::Cif => (400, 296),
            Self::Hvga => (480, 320),
            Self::Vga => (640, 480),
            Self::Svga => (800, 600),
            Self::Xga => (1024, 768),
            Self::Hd => (1280, 720),
            Self::Sxga => (1280, 1024),
            Self::Uxga => (1600, 1200),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::R96x96 => "96X96",
            Self::Qqvga => "QQVGA",
            Self::Qcif => "QCIF",
            Self::Hqvga => "HQVGA",
            Self::R240x240 => "240X240",
            Self::Qvga => "QVGA",
            Self::Cif => "CIF",
            Self::Hvga => "HVGA",
            Self::Vga => "VGA",
            Self::Svga => "SVGA",
            Self::Xga => "XGA",
            Self::Hd => "HD",
            Self::Sxga => "SXGA",
            Self::Uxga => "UXGA",
        }
    }

    const ALL: [FrameSize; 14] = [
        Self::R96x96,
        Self::Qqvga,
        Self::Qcif,
        Self::Hqvga,
        Self::R240x240,
        Self::Qvga,
        Self::Cif,
        Self::Hvga,
        Self::Vga,
        Self::Svga,
        Self::Xga,
        Self::Hd,
        Self::Sxga,
        Self::Uxga,
    ];
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FrameSize {
    type Err = UplinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|size| size.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UplinkError::Config(format!("unknown frame size: {s}")))
    }
}

impl TryFrom<String> for FrameSize {
    type Error = UplinkError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<FrameSize> for String {
    fn from(size: FrameSize) -> Self {
        size.name().to_string()
    }
}

// ── CaptureParams ────────────────────────────────────────────────

/// Peripheral capture parameters read from the configuration store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureParams {
    pub frame_size: FrameSize,
    /// JPEG quality, 1 (best) ..= 31 (worst).
    pub jpeg_quality: u8,
    /// Number of frame buffers in the pool.
    pub buffer_count: usize,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            frame_size: FrameSize::Vga,
            jpeg_quality: 10,
            buffer_count: 8,
        }
    }
}

impl CaptureParams {
    pub fn validate(&self) -> Result<(), UplinkError> {
        if !(1..=31).contains(&self.jpeg_quality) {
            return Err(UplinkError::Config(format!(
                "jpeg quality {} outside 1..=31",
                self.jpeg_quality
            )));
        }
        if self.buffer_count == 0 {
            return Err(UplinkError::Config("buffer_count must be at least 1".into()));
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
