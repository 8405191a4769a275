//! Fixed-size pool of frame buffers.
//!
//! Mirrors the peripheral driver's frame-buffer ring: a handful of buffers
//! that are checked out by the capture path and must come back before they
//! can be reused. Buffers keep their allocation across reuse.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::UplinkError;
use crate::frame::{CaptureTime, FrameFormat, FrameHandle};

/// Snapshot of pool accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    /// Buffers currently held by a [`FrameHandle`].
    pub outstanding: usize,
    /// Total checkouts since construction.
    pub acquired: u64,
    /// Total returns since construction.
    pub released: u64,
}

struct PoolShared {
    capacity: usize,
    free: Mutex<Vec<Vec<u8>>>,
    outstanding: AtomicUsize,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Cheaply cloneable handle to a shared buffer pool.
#[derive(Clone)]
pub struct FramePool {
    shared: Arc<PoolShared>,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                capacity,
                free: Mutex::new(Vec::with_capacity(capacity)),
                outstanding: AtomicUsize::new(0),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Check out an empty buffer wrapped in a handle.
    ///
    /// Fails with [`UplinkError::PoolExhausted`] when every buffer is in use.
    pub fn checkout(&self, format: FrameFormat) -> Result<FrameHandle, UplinkError> {
        let shared = &self.shared;
        shared
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < shared.capacity).then_some(n + 1)
            })
            .map_err(|_| UplinkError::PoolExhausted {
                capacity: shared.capacity,
            })?;
        shared.acquired.fetch_add(1, Ordering::Relaxed);

        let mut buf = match shared.free.lock() {
            Ok(mut free) => free.pop().unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        buf.clear();

        Ok(FrameHandle::new(buf, format, CaptureTime::default(), self.clone()))
    }

    pub(crate) fn give_back(&self, buf: Vec<u8>) {
        let shared = &self.shared;
        if let Ok(mut free) = shared.free.lock() {
            if free.len() < shared.capacity {
                free.push(buf);
            }
        }
        shared.released.fetch_add(1, Ordering::Relaxed);
        shared.outstanding.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.shared.capacity,
            outstanding: self.shared.outstanding.load(Ordering::Acquire),
            acquired: self.shared.acquired.load(Ordering::Relaxed),
            released: self.shared.released.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePool").field("stats", &self.stats()).finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_at_capacity() {
        let pool = FramePool::new(2);
        let a = pool.checkout(FrameFormat::Jpeg).unwrap();
        let _b = pool.checkout(FrameFormat::Jpeg).unwrap();
        assert!(matches!(
            pool.checkout(FrameFormat::Jpeg),
            Err(UplinkError::PoolExhausted { capacity: 2 })
        ));

        a.release();
        assert!(pool.checkout(FrameFormat::Jpeg).is_ok());
    }

    #[test]
    fn buffers_are_reused_and_cleared() {
        let pool = FramePool::new(1);
        let mut frame = pool.checkout(FrameFormat::Jpeg).unwrap();
        frame.buffer_mut().extend_from_slice(&[1u8; 4096]);
        drop(frame);

        let frame = pool.checkout(FrameFormat::Jpeg).unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn accounting_balances() {
        let pool = FramePool::new(4);
        let frames: Vec<_> = (0..4)
            .map(|_| pool.checkout(FrameFormat::Jpeg).unwrap())
            .collect();
        assert_eq!(pool.stats().outstanding, 4);
        for f in frames {
            f.release();
        }
        let stats = pool.stats();
        assert_eq!(stats.acquired, 4);
        assert_eq!(stats.released, 4);
        assert_eq!(stats.outstanding, 0);
    }
}
