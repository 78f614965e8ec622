//! Debug box drawn on relayed frames to show the relay path is live

use crate::config::OverlayConfig;
use crate::frame::{Color, FrameCopy, PixelFormat};

/// Solid box painted at the top-left corner of a frame
///
/// The box is clamped to the frame, so a box larger than the frame simply fills it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugOverlay {
    pub width: u32,
    pub height: u32,
    pub color: Color,
}

impl DebugOverlay {
    pub fn new(width: u32, height: u32, color: Color) -> Self {
        Self {
            width,
            height,
            color,
        }
    }

    /// `None` when the overlay is disabled
    pub fn from_config(config: &OverlayConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.width, config.height, config.color))
    }

    pub fn apply(&self, frame: &mut FrameCopy) {
        let info = *frame.info();
        let width = self.width.min(info.width) as usize;
        let height = self.height.min(info.height) as usize;
        if width == 0 || height == 0 {
            return;
        }

        match info.format {
            PixelFormat::Nv12 => {
                let (y, u, v) = self.color.to_yuv();
                fill_rect(frame.plane_mut(0), info.plane_stride(0), &[y], width, height);
                let stride = info.plane_stride(1);
                fill_rect(
                    frame.plane_mut(1),
                    stride,
                    &[u, v],
                    width.div_ceil(2),
                    height.div_ceil(2),
                );
            }
            PixelFormat::I420 => {
                let (y, u, v) = self.color.to_yuv();
                fill_rect(frame.plane_mut(0), info.plane_stride(0), &[y], width, height);
                let (chroma_width, chroma_height) = (width.div_ceil(2), height.div_ceil(2));
                let stride = info.plane_stride(1);
                fill_rect(frame.plane_mut(1), stride, &[u], chroma_width, chroma_height);
                fill_rect(frame.plane_mut(2), stride, &[v], chroma_width, chroma_height);
            }
            format => {
                if let Some(pixel) = self.color.packed(format) {
                    fill_rect(frame.plane_mut(0), info.plane_stride(0), &pixel, width, height);
                }
            }
        }
    }
}

/// Fill `width x height` pixels of `pixel.len()` bytes each, starting at the plane origin
fn fill_rect(plane: &mut [u8], stride: usize, pixel: &[u8], width: usize, height: usize) {
    let row_bytes = (width * pixel.len()).min(stride);
    for row in plane.chunks_exact_mut(stride).take(height) {
        row[..row_bytes]
            .chunks_exact_mut(pixel.len())
            .for_each(|px| px.copy_from_slice(pixel));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{BufferLedger, FrameBuffer, Sample, VideoInfo};

    fn blank_copy(info: VideoInfo) -> FrameCopy {
        let ledger = BufferLedger::new();
        let sample = Sample::new(info, FrameBuffer::new(vec![0u8; info.size()], &ledger));
        let view = sample.map_readable().unwrap();
        view.to_frame_copy()
    }

    const RED: Color = Color::rgb(255, 0, 0);

    #[test]
    fn test_box_larger_than_frame_is_clamped() {
        let info = VideoInfo::new(PixelFormat::Rgba, 4, 2);
        let mut frame = blank_copy(info);
        DebugOverlay::new(100, 100, RED).apply(&mut frame);

        assert_eq!(frame.data().len(), info.size());
        for px in frame.data().chunks_exact(4) {
            assert_eq!(px, &[255, 0, 0, 255]);
        }
    }

    #[test]
    fn test_box_stays_in_top_left_corner() {
        let info = VideoInfo::new(PixelFormat::Bgra, 4, 2);
        let mut frame = blank_copy(info);
        DebugOverlay::new(2, 1, RED).apply(&mut frame);

        let data = frame.data();
        assert_eq!(&data[0..8], &[0, 0, 255, 255, 0, 0, 255, 255]);
        assert!(data[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_nv12_writes_luma_and_interleaved_chroma() {
        let info = VideoInfo::new(PixelFormat::Nv12, 3, 3);
        let mut frame = blank_copy(info);
        DebugOverlay::new(100, 100, RED).apply(&mut frame);

        let (y, u, v) = RED.to_yuv();
        let data = frame.data();
        assert_eq!(data.len(), 9 + 8);
        assert!(data[..9].iter().all(|&b| b == y));
        for pair in data[9..].chunks_exact(2) {
            assert_eq!(pair, &[u, v]);
        }
    }

    #[test]
    fn test_i420_partial_box() {
        let info = VideoInfo::new(PixelFormat::I420, 4, 4);
        let mut frame = blank_copy(info);
        DebugOverlay::new(1, 1, RED).apply(&mut frame);

        let (y, u, v) = RED.to_yuv();
        let data = frame.data();
        // luma: one pixel
        assert_eq!(data[0], y);
        assert!(data[1..16].iter().all(|&b| b == 0));
        // chroma: one sample per plane
        assert_eq!(&data[16..20], &[u, 0, 0, 0]);
        assert_eq!(&data[20..24], &[v, 0, 0, 0]);
    }

    #[test]
    fn test_disabled_overlay_is_skipped() {
        let config = OverlayConfig {
            enabled: false,
            ..OverlayConfig::default()
        };
        assert!(DebugOverlay::from_config(&config).is_none());
        assert!(DebugOverlay::from_config(&OverlayConfig::default()).is_some());
    }
}
