use std::time::Duration;

pub const FRAME_RATE: u32 = 30;
pub const FRAME_WIDTH: u32 = 1280;
pub const FRAME_HEIGHT: u32 = 720;

// element names wired by the lifecycle controller
pub const CAPTURE_SINK_NAME: &str = "capturesink";
pub const DISPLAY_SOURCE_NAME: &str = "displaysrc";
pub const VIDEO_SINK_NAME: &str = "videosink";

pub const CAPTURE_SOURCE: &str = "videotestsrc";
pub const DISPLAY_SINK: &str = "glimagesink";

pub const CAPTURE_MAX_BUFFERS: u32 = 2;
pub const DISPLAY_MAX_BUFFERS: u32 = 4;

/// Consecutive refused frames after which the camera gives up with a stream error.
pub const MAX_FLOW_FAILURES: u32 = 30;

// debug overlay
pub const OVERLAY_BOX_WIDTH: u32 = 100;
pub const OVERLAY_BOX_HEIGHT: u32 = 100;
pub const OVERLAY_COLOR: [u8; 4] = [255, 0, 0, 255];

pub const EVENT_LOOP_THREAD: &str = "relay-event-loop";
pub const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

pub const CA_CERTIFICATES_ENV: &str = "CA_CERTIFICATES";
