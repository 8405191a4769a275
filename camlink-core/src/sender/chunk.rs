//! The unit of work handed to the sender worker.

use bytes::Bytes;

use crate::error::UplinkError;
use crate::frame::FrameHandle;

/// Largest multipart header a chunk carries.
pub const MAX_HEADER_LEN: usize = 255;

/// An item handed back to the caller together with the reason it was
/// refused. The caller stays responsible for it.
#[derive(Debug)]
pub struct Rejected<T> {
    pub item: T,
    pub reason: UplinkError,
}

/// A frame plus the part header that precedes it on the wire.
///
/// The chunk owns the frame; whoever holds the chunk must either transmit
/// it or release the frame.
#[derive(Debug)]
pub struct FrameChunk {
    header: Bytes,
    frame: FrameHandle,
}

impl FrameChunk {
    /// Pair `frame` with `header`. An oversized header gives the frame back.
    pub fn new(frame: FrameHandle, header: Bytes) -> Result<Self, Rejected<FrameHandle>> {
        if header.len() > MAX_HEADER_LEN {
            let len = header.len();
            return Err(Rejected {
                item: frame,
                reason: UplinkError::HeaderTooLarge {
                    len,
                    max: MAX_HEADER_LEN,
                },
            });
        }
        Ok(Self { header, frame })
    }

    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        self.frame.data()
    }

    /// Header plus payload bytes.
    pub fn wire_len(&self) -> usize {
        self.header.len() + self.frame.len()
    }

    /// Give up the chunk and keep the frame.
    pub fn into_frame(self) -> FrameHandle {
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameFormat, FramePool};

    #[test]
    fn oversized_header_returns_the_frame() {
        let pool = FramePool::new(1);
        let frame = pool.checkout(FrameFormat::Jpeg).unwrap();
        let header = Bytes::from(vec![b'h'; MAX_HEADER_LEN + 1]);

        let rejected = FrameChunk::new(frame, header).unwrap_err();
        assert!(matches!(
            rejected.reason,
            UplinkError::HeaderTooLarge { len: 256, max: 255 }
        ));
        assert_eq!(pool.stats().outstanding, 1);
        rejected.item.release();
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn chunk_reports_wire_length() {
        let pool = FramePool::new(1);
        let mut frame = pool.checkout(FrameFormat::Jpeg).unwrap();
        frame.buffer_mut().extend_from_slice(&[1, 2, 3, 4]);
        let chunk = FrameChunk::new(frame, Bytes::from_static(b"hdr")).unwrap();
        assert_eq!(chunk.wire_len(), 7);
        assert_eq!(chunk.header(), b"hdr");
        assert_eq!(chunk.payload(), &[1, 2, 3, 4]);

        drop(chunk);
        assert_eq!(pool.stats().outstanding, 0);
    }
}
