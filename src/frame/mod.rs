//! Strongly typed video frames exchanged across the relay boundary

pub mod buffer;
pub mod types;

pub use buffer::{BufferLedger, FrameBuffer, FrameCopy, MapError, MappedFrame, Sample};
pub use types::{Color, PixelFormat, Timestamp, VideoInfo};
