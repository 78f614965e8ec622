use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::frame::{MappedFrame, Timestamp, VideoInfo};

use super::present_buffer::PresentBuffer;
use super::{DisplayTarget, FramePresenter, SurfaceError, SurfaceHandle};

/// A frame as last shown on a surface
#[derive(Debug, Clone, Default)]
pub struct PresentedFrame {
    pub info: Option<VideoInfo>,
    pub sequence: u64,
    pub pts: Timestamp,
    pub data: Vec<u8>,
}

/// Presenter keeping the latest frame in memory instead of drawing it
pub struct HeadlessPresenter {
    buffer: PresentBuffer<PresentedFrame>,
    presented: AtomicU64,
    /// One past the highest sequence presented so far
    next_sequence: AtomicU64,
    reordered: AtomicU64,
}

impl HeadlessPresenter {
    fn new() -> Self {
        Self {
            buffer: PresentBuffer::new(PresentedFrame::default),
            presented: AtomicU64::new(0),
            next_sequence: AtomicU64::new(0),
            reordered: AtomicU64::new(0),
        }
    }

    pub fn frames_presented(&self) -> u64 {
        self.presented.load(Ordering::Acquire)
    }

    /// Frames that arrived with a lower sequence than one already presented
    pub fn frames_reordered(&self) -> u64 {
        self.reordered.load(Ordering::Acquire)
    }

    pub fn latest(&self) -> Option<PresentedFrame> {
        let frame = self.buffer.read();
        frame.info.map(|_| frame.clone())
    }
}

impl FramePresenter for HeadlessPresenter {
    fn present(&self, frame: &MappedFrame<'_>, sequence: u64, pts: Timestamp) {
        {
            let mut slot = self.buffer.write();
            slot.info = Some(*frame.info());
            slot.sequence = sequence;
            slot.pts = pts;
            slot.data.clear();
            slot.data.extend_from_slice(frame);
        }

        if self.next_sequence.fetch_max(sequence + 1, Ordering::AcqRel) > sequence {
            self.reordered.fetch_add(1, Ordering::AcqRel);
        }
        self.presented.fetch_add(1, Ordering::AcqRel);
    }
}

/// Display target with no window behind it
///
/// Used by the command line binary and the tests. Only one session may hold the
/// surface at a time.
pub struct HeadlessSurface {
    id: u64,
    presenter: Arc<HeadlessPresenter>,
    acquired: AtomicBool,
}

impl HeadlessSurface {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            presenter: Arc::new(HeadlessPresenter::new()),
            acquired: AtomicBool::new(false),
        }
    }

    pub fn presenter(&self) -> Arc<HeadlessPresenter> {
        Arc::clone(&self.presenter)
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired.load(Ordering::Acquire)
    }
}

impl DisplayTarget for HeadlessSurface {
    fn acquire(&mut self) -> Result<SurfaceHandle, SurfaceError> {
        if self.acquired.swap(true, Ordering::AcqRel) {
            return Err(SurfaceError::Busy(self.id));
        }
        log::debug!("Headless surface {} acquired", self.id);
        let presenter: Arc<dyn FramePresenter> = self.presenter.clone();
        Ok(SurfaceHandle::new(self.id, presenter))
    }

    fn release(&mut self, surface: SurfaceHandle) {
        if surface.id() != self.id {
            log::warn!(
                "Surface {} released on target {}, ignoring",
                surface.id(),
                self.id
            );
            return;
        }
        self.acquired.store(false, Ordering::Release);
        log::debug!("Headless surface {} released", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{BufferLedger, FrameBuffer, PixelFormat, Sample};

    fn sample(sequence: u64, fill: u8) -> Sample {
        let ledger = BufferLedger::new();
        let info = VideoInfo::new(PixelFormat::Rgba, 2, 2);
        Sample::new(
            info,
            FrameBuffer::new(vec![fill; info.size()], &ledger).with_sequence(sequence),
        )
    }

    fn present(presenter: &HeadlessPresenter, sample: &Sample) {
        let view = sample.map_readable().unwrap();
        presenter.present(&view, sample.sequence(), sample.pts());
    }

    #[test]
    fn test_acquire_is_exclusive() {
        let mut surface = HeadlessSurface::new(7);
        let handle = surface.acquire().unwrap();
        assert_eq!(handle.id(), 7);
        assert!(surface.is_acquired());
        assert!(matches!(surface.acquire(), Err(SurfaceError::Busy(7))));

        surface.release(handle);
        assert!(!surface.is_acquired());
        assert!(surface.acquire().is_ok());
    }

    #[test]
    fn test_presenter_keeps_latest_frame() {
        let surface = HeadlessSurface::new(1);
        let presenter = surface.presenter();
        assert!(presenter.latest().is_none());

        present(&presenter, &sample(0, 1));
        present(&presenter, &sample(1, 2));

        let latest = presenter.latest().unwrap();
        assert_eq!(latest.sequence, 1);
        assert!(latest.data.iter().all(|&b| b == 2));
        assert_eq!(presenter.frames_presented(), 2);
        assert_eq!(presenter.frames_reordered(), 0);
    }

    #[test]
    fn test_presenter_detects_reordering() {
        let presenter = HeadlessPresenter::new();
        present(&presenter, &sample(5, 0));
        present(&presenter, &sample(3, 0));
        assert_eq!(presenter.frames_reordered(), 1);
    }
}
