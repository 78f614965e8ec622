//! Core value types describing a video frame

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Presentation timestamp of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    /// Microseconds since the capture graph started producing
    pub micros: i64,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { micros: 0 };

    /// Create a new timestamp from microseconds
    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    /// Timestamp of frame `index` in a stream running at `fps`
    pub fn for_frame(index: u64, fps: u32) -> Self {
        let fps = fps.max(1) as u64;
        Self::from_micros((index.saturating_mul(1_000_000) / fps).min(i64::MAX as u64) as i64)
    }

    /// Convert to duration, negative timestamps clamp to zero
    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(self.micros.max(0) as u64)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}µs", self.micros)
    }
}

/// Raw pixel layouts understood by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum PixelFormat {
    #[serde(rename = "RGBA")]
    Rgba,
    #[serde(rename = "BGRA")]
    Bgra,
    #[serde(rename = "RGBx")]
    Rgbx,
    #[serde(rename = "RGB")]
    Rgb,
    #[serde(rename = "NV12")]
    Nv12,
    #[serde(rename = "I420")]
    I420,
}

impl PixelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Rgba => "RGBA",
            PixelFormat::Bgra => "BGRA",
            PixelFormat::Rgbx => "RGBx",
            PixelFormat::Rgb => "RGB",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::I420 => "I420",
        }
    }

    /// Bytes per pixel for packed formats, `None` for planar YUV
    pub fn packed_pixel_size(&self) -> Option<usize> {
        match self {
            PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Rgbx => Some(4),
            PixelFormat::Rgb => Some(3),
            PixelFormat::Nv12 | PixelFormat::I420 => None,
        }
    }

    pub fn is_yuv(&self) -> bool {
        self.packed_pixel_size().is_none()
    }

    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::Nv12 => 2,
            PixelFormat::I420 => 3,
            _ => 1,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown pixel format '{0}'")]
pub struct UnknownPixelFormat(pub String);

impl FromStr for PixelFormat {
    type Err = UnknownPixelFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RGBA" => Ok(PixelFormat::Rgba),
            "BGRA" => Ok(PixelFormat::Bgra),
            "RGBx" => Ok(PixelFormat::Rgbx),
            "RGB" => Ok(PixelFormat::Rgb),
            "NV12" => Ok(PixelFormat::Nv12),
            "I420" => Ok(PixelFormat::I420),
            other => Err(UnknownPixelFormat(other.to_string())),
        }
    }
}

/// Negotiated shape of the frames flowing through a graph
///
/// Strides and plane offsets are derived from the format and dimensions; chroma
/// planes of the YUV formats are subsampled by two in both directions, rounding up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoInfo {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

impl VideoInfo {
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            framerate: crate::assets::FRAME_RATE,
        }
    }

    pub fn with_framerate(mut self, framerate: u32) -> Self {
        self.framerate = framerate;
        self
    }

    /// Same format, width and height. Framerate is advisory and not compared.
    pub fn is_compatible(&self, other: &VideoInfo) -> bool {
        self.format == other.format && self.width == other.width && self.height == other.height
    }

    fn chroma_width(&self) -> usize {
        (self.width as usize).div_ceil(2)
    }

    fn chroma_height(&self) -> usize {
        (self.height as usize).div_ceil(2)
    }

    pub fn plane_count(&self) -> usize {
        self.format.plane_count()
    }

    /// Row stride in bytes of the given plane
    pub fn plane_stride(&self, plane: usize) -> usize {
        let width = self.width as usize;
        match (self.format, plane) {
            (format, 0) if !format.is_yuv() => width * format.packed_pixel_size().unwrap_or(4),
            (PixelFormat::Nv12 | PixelFormat::I420, 0) => width,
            (PixelFormat::Nv12, 1) => self.chroma_width() * 2,
            (PixelFormat::I420, 1 | 2) => self.chroma_width(),
            _ => 0,
        }
    }

    /// Number of rows in the given plane
    pub fn plane_height(&self, plane: usize) -> usize {
        match (self.format, plane) {
            (_, 0) => self.height as usize,
            (PixelFormat::Nv12, 1) | (PixelFormat::I420, 1 | 2) => self.chroma_height(),
            _ => 0,
        }
    }

    pub fn plane_size(&self, plane: usize) -> usize {
        self.plane_stride(plane) * self.plane_height(plane)
    }

    /// Byte offset of the given plane from the start of the frame
    pub fn plane_offset(&self, plane: usize) -> usize {
        (0..plane.min(self.plane_count())).map(|p| self.plane_size(p)).sum()
    }

    /// Total frame size in bytes
    pub fn size(&self) -> usize {
        (0..self.plane_count()).map(|p| self.plane_size(p)).sum()
    }

    /// Duration of one frame at the negotiated framerate
    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.framerate.max(1) as u64)
    }
}

impl fmt::Display for VideoInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "video/x-raw,format={},width={},height={},framerate={}/1",
            self.format, self.width, self.height, self.framerate
        )
    }
}

/// RGBA colour used for test patterns and the debug overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(default = "opaque")]
    pub a: u8,
}

fn opaque() -> u8 {
    255
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// BT.601 limited range conversion, returns (Y, U, V)
    pub fn to_yuv(&self) -> (u8, u8, u8) {
        let (r, g, b) = (self.r as i32, self.g as i32, self.b as i32);
        let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
        let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
        let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
        (
            y.clamp(0, 255) as u8,
            u.clamp(0, 255) as u8,
            v.clamp(0, 255) as u8,
        )
    }

    /// Channel bytes of one pixel in a packed format
    pub fn packed(&self, format: PixelFormat) -> Option<Vec<u8>> {
        match format {
            PixelFormat::Rgba => Some(vec![self.r, self.g, self.b, self.a]),
            PixelFormat::Bgra => Some(vec![self.b, self.g, self.r, self.a]),
            PixelFormat::Rgbx => Some(vec![self.r, self.g, self.b, 0xff]),
            PixelFormat::Rgb => Some(vec![self.r, self.g, self.b]),
            PixelFormat::Nv12 | PixelFormat::I420 => None,
        }
    }
}

impl From<[u8; 4]> for Color {
    fn from(c: [u8; 4]) -> Self {
        Self {
            r: c[0],
            g: c[1],
            b: c[2],
            a: c[3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_layout() {
        let info = VideoInfo::new(PixelFormat::Rgba, 640, 480);
        assert_eq!(info.plane_count(), 1);
        assert_eq!(info.plane_stride(0), 2560);
        assert_eq!(info.size(), 640 * 480 * 4);

        let rgb = VideoInfo::new(PixelFormat::Rgb, 3, 2);
        assert_eq!(rgb.size(), 18);
    }

    #[test]
    fn test_planar_layout_rounds_chroma_up() {
        let nv12 = VideoInfo::new(PixelFormat::Nv12, 5, 3);
        assert_eq!(nv12.plane_stride(0), 5);
        assert_eq!(nv12.plane_stride(1), 6);
        assert_eq!(nv12.plane_height(1), 2);
        assert_eq!(nv12.plane_offset(1), 15);
        assert_eq!(nv12.size(), 15 + 12);

        let i420 = VideoInfo::new(PixelFormat::I420, 4, 4);
        assert_eq!(i420.plane_offset(1), 16);
        assert_eq!(i420.plane_offset(2), 20);
        assert_eq!(i420.size(), 24);
    }

    #[test]
    fn test_compatibility_ignores_framerate() {
        let a = VideoInfo::new(PixelFormat::Nv12, 1280, 720).with_framerate(30);
        let b = a.with_framerate(15);
        assert!(a.is_compatible(&b));
        let c = VideoInfo::new(PixelFormat::Rgba, 1280, 720);
        assert!(!a.is_compatible(&c));
    }

    #[test]
    fn test_format_round_trip_names() {
        for format in [
            PixelFormat::Rgba,
            PixelFormat::Bgra,
            PixelFormat::Rgbx,
            PixelFormat::Rgb,
            PixelFormat::Nv12,
            PixelFormat::I420,
        ] {
            assert_eq!(format.as_str().parse::<PixelFormat>(), Ok(format));
        }
        assert!("YUY2".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn test_color_conversion() {
        assert_eq!(Color::rgb(0, 0, 0).to_yuv(), (16, 128, 128));
        assert_eq!(Color::rgb(255, 255, 255).to_yuv(), (235, 128, 128));
        let (_, u, v) = Color::rgb(255, 0, 0).to_yuv();
        assert!(v > 200 && u < 128);
    }

    #[test]
    fn test_frame_timestamps() {
        assert_eq!(Timestamp::for_frame(0, 30), Timestamp::ZERO);
        assert_eq!(Timestamp::for_frame(30, 30).as_duration(), Duration::from_secs(1));
        // frame indices past u32 keep advancing
        let late = Timestamp::for_frame(u64::from(u32::MAX) + 30, 30);
        assert_eq!(late.as_duration().as_secs(), u64::from(u32::MAX) / 30 + 1);
        assert_eq!(Timestamp::for_frame(u64::MAX, 1).micros, i64::MAX);
    }
}
