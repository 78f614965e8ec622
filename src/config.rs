use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

use crate::assets::{
    CAPTURE_MAX_BUFFERS, CAPTURE_SINK_NAME, CAPTURE_SOURCE, DISPLAY_MAX_BUFFERS,
    DISPLAY_SINK, DISPLAY_SOURCE_NAME, FRAME_HEIGHT, FRAME_RATE, FRAME_WIDTH,
    OVERLAY_BOX_HEIGHT, OVERLAY_BOX_WIDTH, OVERLAY_COLOR, VIDEO_SINK_NAME,
};
use crate::frame::{Color, PixelFormat};

/// `videoflip` method applied to captured frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Orientation {
    None,
    #[default]
    Clockwise,
    Counterclockwise,
    #[serde(rename = "rotate-180")]
    Rotate180,
    HorizontalFlip,
    VerticalFlip,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::None => "none",
            Orientation::Clockwise => "clockwise",
            Orientation::Counterclockwise => "counterclockwise",
            Orientation::Rotate180 => "rotate-180",
            Orientation::HorizontalFlip => "horizontal-flip",
            Orientation::VerticalFlip => "vertical-flip",
        }
    }

    /// Quarter turns exchange width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Orientation::Clockwise | Orientation::Counterclockwise)
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown orientation '{0}'")]
pub struct UnknownOrientation(pub String);

impl FromStr for Orientation {
    type Err = UnknownOrientation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "identity" => Ok(Orientation::None),
            "clockwise" | "90r" => Ok(Orientation::Clockwise),
            "counterclockwise" | "90l" => Ok(Orientation::Counterclockwise),
            "rotate-180" | "180" => Ok(Orientation::Rotate180),
            "horizontal-flip" | "horiz" => Ok(Orientation::HorizontalFlip),
            "vertical-flip" | "vert" => Ok(Orientation::VerticalFlip),
            other => Err(UnknownOrientation(other.to_string())),
        }
    }
}

/// Capture graph settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Source element factory
    pub source: String,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub orientation: Orientation,
    /// Frames produced before end-of-stream, unlimited when unset
    pub num_buffers: Option<u64>,
    /// Capacity of the capture sink queue
    pub max_buffers: u32,
    /// Drop the oldest queued frame instead of blocking the producer when full
    pub drop: bool,
    /// Full launch description replacing the generated one
    pub launch: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: CAPTURE_SOURCE.to_string(),
            format: PixelFormat::Rgba,
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            framerate: FRAME_RATE,
            orientation: Orientation::default(),
            num_buffers: None,
            max_buffers: CAPTURE_MAX_BUFFERS,
            drop: false,
            launch: None,
        }
    }
}

impl CaptureConfig {
    pub fn launch_description(&self) -> String {
        if let Some(launch) = &self.launch {
            return launch.clone();
        }

        let mut source = self.source.clone();
        if let Some(n) = self.num_buffers {
            source.push_str(&format!(" num-buffers={n}"));
        }
        format!(
            "{source} ! video/x-raw,format={},width={},height={},framerate={}/1 \
             ! videoflip method={} ! videoconvert \
             ! appsink name={CAPTURE_SINK_NAME} max-buffers={} drop={}",
            self.format,
            self.width,
            self.height,
            self.framerate,
            self.orientation,
            self.max_buffers,
            self.drop
        )
    }
}

/// Display graph settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Video sink element factory
    pub sink: String,
    /// Capacity of the push source queue
    pub max_buffers: u32,
    /// Caps forced on the push source, e.g. `video/x-raw,format=NV12`.
    /// Fields left out follow the capture graph.
    pub caps: Option<String>,
    /// Full launch description replacing the generated one
    pub launch: Option<String>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            sink: DISPLAY_SINK.to_string(),
            max_buffers: DISPLAY_MAX_BUFFERS,
            caps: None,
            launch: None,
        }
    }
}

impl DisplayConfig {
    pub fn launch_description(&self) -> String {
        if let Some(launch) = &self.launch {
            return launch.clone();
        }

        let caps = self
            .caps
            .as_deref()
            .map(|caps| format!(" ! {caps}"))
            .unwrap_or_default();
        format!(
            "appsrc name={DISPLAY_SOURCE_NAME} max-buffers={}{caps} ! videoconvert \
             ! {} name={VIDEO_SINK_NAME}",
            self.max_buffers, self.sink
        )
    }
}

/// Debug box drawn by the relay
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub color: Color,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: OVERLAY_BOX_WIDTH,
            height: OVERLAY_BOX_HEIGHT,
            color: Color::from(OVERLAY_COLOR),
        }
    }
}

/// Everything needed to start one relay session
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub overlay: OverlayConfig,
    /// PEM bundle for networked elements, `CA_CERTIFICATES` is used when unset
    pub trust_store: Option<PathBuf>,
}

impl SessionConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read session config {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse session config {}", path.display()))?;
        Ok(config)
    }
}

/// Returns a version as specified in Cargo.toml
pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::launch;
    use std::io::Write;

    #[test]
    fn test_default_capture_description() {
        let config = CaptureConfig {
            num_buffers: Some(10),
            ..CaptureConfig::default()
        };
        let description = launch::parse(&config.launch_description()).unwrap();

        let source = description.first_element().unwrap();
        assert_eq!(source.factory, "videotestsrc");
        assert_eq!(source.property("num-buffers"), Some("10"));

        let caps = description.caps().next().unwrap();
        assert_eq!(caps.field("format"), Some("RGBA"));
        assert_eq!(caps.field("width"), Some("1280"));
        assert_eq!(caps.field("framerate"), Some("30/1"));

        let flip = description.find_factory("videoflip").unwrap();
        assert_eq!(flip.property("method"), Some("clockwise"));

        let sink = description.last_element().unwrap();
        assert_eq!(sink.factory, "appsink");
        assert_eq!(sink.name(), Some(CAPTURE_SINK_NAME));
        assert_eq!(sink.property("drop"), Some("false"));
    }

    #[test]
    fn test_default_display_description() {
        let description = launch::parse(&DisplayConfig::default().launch_description()).unwrap();
        assert_eq!(description.nodes.len(), 3);
        assert_eq!(description.first_element().unwrap().name(), Some(DISPLAY_SOURCE_NAME));
        assert_eq!(description.last_element().unwrap().factory, DISPLAY_SINK);

        let forced = DisplayConfig {
            caps: Some("video/x-raw,format=NV12".to_string()),
            ..DisplayConfig::default()
        };
        let description = launch::parse(&forced.launch_description()).unwrap();
        assert_eq!(description.caps().next().unwrap().field("format"), Some("NV12"));
    }

    #[test]
    fn test_orientation_names() {
        for name in [
            "none",
            "clockwise",
            "counterclockwise",
            "rotate-180",
            "horizontal-flip",
            "vertical-flip",
        ] {
            let orientation: Orientation = name.parse().unwrap();
            assert_eq!(orientation.as_str(), name);
        }
        assert!(Orientation::Counterclockwise.swaps_dimensions());
        assert!(!Orientation::Rotate180.swaps_dimensions());
        assert!("sideways".parse::<Orientation>().is_err());
    }

    #[test]
    fn test_load_partial_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "capture": {{ "width": 640, "height": 480, "orientation": "rotate-180", "format": "NV12" }},
                "overlay": {{ "enabled": false, "color": {{ "r": 0, "g": 0, "b": 255 }} }},
                "trust_store": "/etc/ssl/certs/ca.pem"
            }}"#
        )
        .unwrap();

        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.capture.width, 640);
        assert_eq!(config.capture.format, PixelFormat::Nv12);
        assert_eq!(config.capture.orientation, Orientation::Rotate180);
        assert_eq!(config.capture.framerate, FRAME_RATE);
        assert!(!config.overlay.enabled);
        assert_eq!(config.overlay.color, Color::rgb(0, 0, 255));
        assert_eq!(config.display, DisplayConfig::default());
        assert_eq!(
            config.trust_store.as_deref(),
            Some(Path::new("/etc/ssl/certs/ca.pem"))
        );
    }

    #[test]
    fn test_load_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = SessionConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse session config"));
    }
}
