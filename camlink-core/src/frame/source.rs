//! Frame sources.
//!
//! The capture peripheral is reached through [`FrameSource`], a closed set
//! of variants chosen when the pipeline is assembled. Every variant draws
//! its buffers from a [`FramePool`] so the pipeline sees the same ownership
//! rules whichever source is in use.

use std::path::{Path, PathBuf};

use crate::config::CaptureParams;
use crate::error::UplinkError;
use crate::frame::{CaptureTime, FrameFormat, FrameHandle, FramePool};

/// JPEG start-of-image marker.
const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker.
const EOI: [u8; 2] = [0xFF, 0xD9];
/// JPEG comment segment marker.
const COM: [u8; 2] = [0xFF, 0xFE];

// ── FrameSource ──────────────────────────────────────────────────

/// Where frames come from.
pub enum FrameSource {
    /// Synthesized JPEG frames; used without a sensor attached.
    Pattern(PatternSource),
    /// JPEG files from a directory, replayed in name order.
    Directory(DirectorySource),
}

impl FrameSource {
    /// Capture the next frame.
    ///
    /// Errors are transient: the caller skips this cycle.
    pub fn acquire(&mut self) -> Result<FrameHandle, UplinkError> {
        match self {
            Self::Pattern(src) => src.acquire(),
            Self::Directory(src) => src.acquire(),
        }
    }

    /// Hand a frame back to the pool.
    pub fn release(&self, frame: FrameHandle) {
        frame.release();
    }

    pub fn pool(&self) -> &FramePool {
        match self {
            Self::Pattern(src) => &src.pool,
            Self::Directory(src) => &src.pool,
        }
    }

    pub fn params(&self) -> CaptureParams {
        match self {
            Self::Pattern(src) => src.params,
            Self::Directory(src) => src.params,
        }
    }
}

// ── PatternSource ────────────────────────────────────────────────

/// Produces small, structurally valid JPEG frames.
///
/// Each frame is `SOI`, a comment segment naming the frame sequence number,
/// filler bytes and `EOI`, padded to a fixed length derived from the
/// configured resolution.
pub struct PatternSource {
    pool: FramePool,
    params: CaptureParams,
    frame_len: usize,
    format: FrameFormat,
    sequence: u64,
}

impl PatternSource {
    pub fn new(params: CaptureParams) -> Self {
        let (w, h) = params.frame_size.dimensions();
        // Roughly the size a mid-quality JPEG of this resolution compresses to.
        let frame_len = (w as usize * h as usize) / (4 + usize::from(params.jpeg_quality));
        Self::with_frame_len(params, frame_len)
    }

    pub fn with_frame_len(params: CaptureParams, frame_len: usize) -> Self {
        Self {
            pool: FramePool::new(params.buffer_count),
            params,
            frame_len: frame_len.max(64),
            format: FrameFormat::Jpeg,
            sequence: 0,
        }
    }

    /// Tag frames with `format`, as a sensor switched to a raw pixel
    /// format would.
    pub fn with_format(mut self, format: FrameFormat) -> Self {
        self.format = format;
        self
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    fn acquire(&mut self) -> Result<FrameHandle, UplinkError> {
        let mut frame = self.pool.checkout(self.format)?;
        let comment = format!("camlink frame {}", self.sequence);
        let segment_len = (comment.len() + 2) as u16;

        let buf = frame.buffer_mut();
        buf.reserve(self.frame_len);
        buf.extend_from_slice(&SOI);
        buf.extend_from_slice(&COM);
        buf.extend_from_slice(&segment_len.to_be_bytes());
        buf.extend_from_slice(comment.as_bytes());
        let fill = self.frame_len.saturating_sub(buf.len() + EOI.len());
        buf.extend(std::iter::repeat_n((self.sequence & 0x7F) as u8, fill));
        buf.extend_from_slice(&EOI);

        frame.set_timestamp(CaptureTime::now());
        self.sequence += 1;
        Ok(frame)
    }
}

/// Extract the sequence number a [`PatternSource`] frame was stamped with.
pub fn pattern_sequence(jpeg: &[u8]) -> Option<u64> {
    if jpeg.len() < 6 || jpeg[..2] != SOI || jpeg[2..4] != COM {
        return None;
    }
    let seg_len = u16::from_be_bytes([jpeg[4], jpeg[5]]) as usize;
    let comment = jpeg.get(6..4 + seg_len)?;
    std::str::from_utf8(comment)
        .ok()?
        .strip_prefix("camlink frame ")?
        .parse()
        .ok()
}

// ── DirectorySource ──────────────────────────────────────────────

/// Replays `*.jpg` / `*.jpeg` files from a directory in a loop.
pub struct DirectorySource {
    pool: FramePool,
    params: CaptureParams,
    files: Vec<PathBuf>,
    next: usize,
}

impl DirectorySource {
    /// Scan `dir` for JPEG files. An empty directory is a configuration
    /// error.
    pub fn open(dir: &Path, params: CaptureParams) -> Result<Self, UplinkError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| UplinkError::Config(format!("cannot read {}: {e}", dir.display())))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
            })
            .collect();
        if files.is_empty() {
            return Err(UplinkError::Config(format!(
                "no jpeg files in {}",
                dir.display()
            )));
        }
        files.sort();

        Ok(Self {
            pool: FramePool::new(params.buffer_count),
            params,
            files,
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn acquire(&mut self) -> Result<FrameHandle, UplinkError> {
        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();

        let mut frame = self.pool.checkout(FrameFormat::Jpeg)?;
        let bytes = std::fs::read(path)
            .map_err(|e| UplinkError::Capture(format!("{}: {e}", path.display())))?;
        if bytes.len() < 4 || bytes[..2] != SOI {
            return Err(UplinkError::Capture(format!(
                "{} is not a jpeg image",
                path.display()
            )));
        }
        frame.buffer_mut().extend_from_slice(&bytes);
        frame.set_timestamp(CaptureTime::now());
        Ok(frame)
    }
}

// ── Tests ────────────────────────────────────────────────────────
