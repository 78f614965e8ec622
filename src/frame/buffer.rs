//! Frame ownership model
//!
//! A frame pulled from a capture graph travels through three handle types:
//! - [`Sample`]: the owned frame. Dropping it releases the frame memory.
//! - [`MappedFrame`]: a read-only view borrowing the sample. It cannot outlive
//!   the sample and unmaps itself when dropped.
//! - [`FrameCopy`]: a mutable duplicate backed by its own memory. Pushing it into
//!   a display graph consumes it, so the same copy can never be pushed twice.
//!
//! Every buffer reports to a [`BufferLedger`], which makes leaked or doubly
//! released frames and views visible to the health checks and tests.

use bytes::{Bytes, BytesMut};
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::types::{Timestamp, VideoInfo};

/// Allocation and mapping accounting shared by the buffers of one allocator
#[derive(Debug, Default)]
pub struct BufferLedger {
    allocated: AtomicU64,
    released: AtomicU64,
    mapped: AtomicU64,
    unmapped: AtomicU64,
}

impl BufferLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Acquire)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }

    pub fn mapped(&self) -> u64 {
        self.mapped.load(Ordering::Acquire)
    }

    pub fn unmapped(&self) -> u64 {
        self.unmapped.load(Ordering::Acquire)
    }

    /// Buffers allocated but not yet released
    pub fn outstanding(&self) -> u64 {
        self.allocated().saturating_sub(self.released())
    }

    /// Views mapped but not yet unmapped
    pub fn outstanding_maps(&self) -> u64 {
        self.mapped().saturating_sub(self.unmapped())
    }
}

/// Memory of one frame plus its timing metadata
pub struct FrameBuffer {
    data: Bytes,
    pts: Timestamp,
    duration: Option<Duration>,
    sequence: u64,
    ledger: Arc<BufferLedger>,
}

impl FrameBuffer {
    pub fn new(data: impl Into<Bytes>, ledger: &Arc<BufferLedger>) -> Self {
        ledger.allocated.fetch_add(1, Ordering::AcqRel);
        Self {
            data: data.into(),
            pts: Timestamp::ZERO,
            duration: None,
            sequence: 0,
            ledger: Arc::clone(ledger),
        }
    }

    pub fn with_pts(mut self, pts: Timestamp) -> Self {
        self.pts = pts;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Sequence marker assigned by the producer, monotonically increasing per stream
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        self.ledger.released.fetch_add(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("size", &self.data.len())
            .field("pts", &self.pts)
            .field("duration", &self.duration)
            .field("sequence", &self.sequence)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("buffer holds {actual} bytes but the negotiated layout needs {expected}")]
    Truncated { expected: usize, actual: usize },
}

/// One frame pulled from a capture sink
#[derive(Debug)]
pub struct Sample {
    info: VideoInfo,
    buffer: FrameBuffer,
}

impl Sample {
    pub fn new(info: VideoInfo, buffer: FrameBuffer) -> Self {
        Self { info, buffer }
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    pub fn pts(&self) -> Timestamp {
        self.buffer.pts
    }

    pub fn duration(&self) -> Option<Duration> {
        self.buffer.duration
    }

    pub fn sequence(&self) -> u64 {
        self.buffer.sequence
    }

    pub fn size(&self) -> usize {
        self.buffer.size()
    }

    /// Map the frame memory for reading
    ///
    /// Fails if the buffer is smaller than the negotiated layout, so that no view
    /// ever exposes less memory than its width, height and strides promise.
    pub fn map_readable(&self) -> Result<MappedFrame<'_>, MapError> {
        let expected = self.info.size();
        let actual = self.buffer.data.len();
        if actual < expected {
            return Err(MapError::Truncated { expected, actual });
        }
        self.buffer.ledger.mapped.fetch_add(1, Ordering::AcqRel);
        Ok(MappedFrame { sample: self })
    }
}

/// Read-only view of a [`Sample`]'s pixels
pub struct MappedFrame<'a> {
    sample: &'a Sample,
}

impl<'a> MappedFrame<'a> {
    pub fn info(&self) -> &VideoInfo {
        &self.sample.info
    }

    /// Bytes of one plane
    pub fn plane(&self, plane: usize) -> &[u8] {
        let info = &self.sample.info;
        let offset = info.plane_offset(plane);
        &self[offset..offset + info.plane_size(plane)]
    }

    /// Duplicate the frame into freshly allocated, writable memory
    pub fn to_frame_copy(&self) -> FrameCopy {
        FrameCopy {
            info: self.sample.info,
            data: BytesMut::from(&self[..]),
            pts: self.sample.pts(),
            duration: self.sample.duration(),
            sequence: self.sample.sequence(),
        }
    }
}

impl Deref for MappedFrame<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.sample.buffer.data[..self.sample.info.size()]
    }
}

impl Drop for MappedFrame<'_> {
    fn drop(&mut self) {
        self.sample
            .buffer
            .ledger
            .unmapped
            .fetch_add(1, Ordering::AcqRel);
    }
}

/// Writable duplicate of a frame, handed by value to a display source
#[derive(Debug)]
pub struct FrameCopy {
    info: VideoInfo,
    data: BytesMut,
    pts: Timestamp,
    duration: Option<Duration>,
    sequence: u64,
}

impl FrameCopy {
    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    pub fn pts(&self) -> Timestamp {
        self.pts
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Mutable bytes of one plane
    pub fn plane_mut(&mut self, plane: usize) -> &mut [u8] {
        let offset = self.info.plane_offset(plane);
        let size = self.info.plane_size(plane);
        &mut self.data[offset..offset + size]
    }

    /// Hand the memory over to a consumer's allocator
    pub fn into_sample(self, ledger: &Arc<BufferLedger>) -> Sample {
        let mut buffer = FrameBuffer::new(self.data.freeze(), ledger)
            .with_pts(self.pts)
            .with_sequence(self.sequence);
        buffer.duration = self.duration;
        Sample::new(self.info, buffer)
    }
}
