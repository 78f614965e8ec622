//! In-process media backend
//!
//! Builds capture and display graphs from launch descriptions using the static
//! plugin registry. Capture sources render a test pattern at the negotiated
//! caps; the display sink presents frames on the session's surface.

pub mod camera;
pub mod display;
pub mod registry;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::assets::{
    CAPTURE_MAX_BUFFERS, CAPTURE_SINK_NAME, DISPLAY_MAX_BUFFERS, DISPLAY_SOURCE_NAME,
    FRAME_HEIGHT, FRAME_RATE, FRAME_WIDTH,
};
use crate::config::{CaptureConfig, DisplayConfig, Orientation};
use crate::frame::{PixelFormat, VideoInfo};
use crate::pipeline::launch::{self, CapsSpec, ElementSpec, LaunchDescription};
use crate::pipeline::{BuildError, CaptureGraph, DisplayGraph, GraphBackend};
use crate::tls::TrustStore;

use camera::{AppSink, CameraGraph, CameraSettings, TestPattern};
use display::{AppSrc, ScreenGraph};
use registry::{ElementKind, PluginRegistry, RegistryError};

pub struct SyntheticBackend {
    registry: PluginRegistry,
    trust_store: Option<TrustStore>,
}

impl SyntheticBackend {
    pub fn new(registry: PluginRegistry, trust_store: Option<TrustStore>) -> Self {
        Self {
            registry,
            trust_store,
        }
    }

    /// Register the static plugins and load the trust store
    ///
    /// A missing or unreadable trust store is logged and ignored.
    pub fn initialize(trust_store: Option<&Path>) -> Result<Self, RegistryError> {
        let registry = PluginRegistry::with_static_plugins()?;
        log::info!(
            "Registered {} plugins providing {} elements",
            registry.plugin_count(),
            registry.element_count()
        );
        log::debug!("Plugins: {}", registry.plugin_names().collect::<Vec<_>>().join(", "));
        Ok(Self::new(registry, TrustStore::initialize(trust_store)))
    }

    /// Check every factory exists and return the kind of each element
    fn resolve(&self, description: &LaunchDescription) -> Result<Vec<ElementKind>, BuildError> {
        description
            .elements()
            .map(|element| {
                self.registry
                    .lookup(&element.factory)
                    .map(|factory| factory.kind)
                    .ok_or_else(|| BuildError::MissingElement(element.factory.clone()))
            })
            .collect()
    }

    /// Sources fetching over TLS verify their peer against the trust store
    fn check_transport(&self, element: &ElementSpec) -> Result<(), BuildError> {
        let Some(location) = element.property("location") else {
            return Ok(());
        };
        if !location.starts_with("https://") {
            return Ok(());
        }
        match &self.trust_store {
            Some(store) => {
                log::debug!(
                    "{}: verifying {} against {} certificates from {}",
                    element.factory,
                    location,
                    store.len(),
                    store.path().display()
                );
                Ok(())
            }
            None => Err(BuildError::Untrusted(location.to_string())),
        }
    }

    fn plan_capture(&self, description: &LaunchDescription) -> Result<CapturePlan, BuildError> {
        let kinds = self.resolve(description)?;
        let (Some(source), Some(sink)) = (description.first_element(), description.last_element())
        else {
            return Err(BuildError::Topology("capture graph has no elements".into()));
        };
        if kinds.first() != Some(&ElementKind::Source) {
            return Err(BuildError::Topology(format!(
                "'{}' cannot start a capture graph",
                source.factory
            )));
        }
        self.check_transport(source)?;
        if sink.name() != Some(CAPTURE_SINK_NAME) {
            return Err(BuildError::MissingElement(CAPTURE_SINK_NAME.to_string()));
        }
        if kinds.last() != Some(&ElementKind::AppSink) {
            return Err(BuildError::Topology(format!(
                "{CAPTURE_SINK_NAME} must be an app sink, found '{}'",
                sink.factory
            )));
        }

        let mut info = VideoInfo::new(PixelFormat::Rgba, FRAME_WIDTH, FRAME_HEIGHT)
            .with_framerate(FRAME_RATE);
        for node in &description.nodes {
            if let Some(caps) = node.as_caps() {
                info = apply_caps(info, caps)?;
            } else if let Some(element) = node.as_element()
                && element.factory == "videoflip"
            {
                let method: Orientation = property(element, "method", Orientation::None)?;
                if method.swaps_dimensions() {
                    std::mem::swap(&mut info.width, &mut info.height);
                }
            }
        }

        Ok(CapturePlan {
            settings: CameraSettings {
                info,
                pattern: property(source, "pattern", TestPattern::Bars)?,
                num_buffers: optional_property(source, "num-buffers")?,
            },
            max_buffers: property(sink, "max-buffers", CAPTURE_MAX_BUFFERS)? as usize,
            drop: property(sink, "drop", false)?,
        })
    }

    fn plan_display(
        &self,
        description: &LaunchDescription,
        upstream: &VideoInfo,
    ) -> Result<DisplayPlan, BuildError> {
        let kinds = self.resolve(description)?;
        let Some(source) = description.first_element() else {
            return Err(BuildError::Topology("display graph has no elements".into()));
        };
        if source.name() != Some(DISPLAY_SOURCE_NAME) {
            return Err(BuildError::MissingElement(DISPLAY_SOURCE_NAME.to_string()));
        }
        if kinds.first() != Some(&ElementKind::AppSrc) {
            return Err(BuildError::Topology(format!(
                "{DISPLAY_SOURCE_NAME} must be an app source, found '{}'",
                source.factory
            )));
        }
        if !matches!(kinds.last(), Some(ElementKind::Sink)) {
            return Err(BuildError::Topology(
                "display graph must end in a video sink".into(),
            ));
        }

        // Caps directly after the source fix what it accepts
        let caps = match description.nodes.get(1).and_then(|node| node.as_caps()) {
            Some(caps) => apply_caps(*upstream, caps)?,
            None => *upstream,
        };

        Ok(DisplayPlan {
            caps,
            max_buffers: property(source, "max-buffers", DISPLAY_MAX_BUFFERS)? as usize,
        })
    }
}

struct CapturePlan {
    settings: CameraSettings,
    max_buffers: usize,
    drop: bool,
}

struct DisplayPlan {
    caps: VideoInfo,
    max_buffers: usize,
}

fn invalid(field: &str, value: &str) -> BuildError {
    BuildError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn property<T: FromStr>(element: &ElementSpec, name: &str, default: T) -> Result<T, BuildError> {
    Ok(optional_property(element, name)?.unwrap_or(default))
}

fn optional_property<T: FromStr>(element: &ElementSpec, name: &str) -> Result<Option<T>, BuildError> {
    element
        .property(name)
        .map(|value| {
            value
                .parse()
                .map_err(|_| invalid(&format!("{}::{}", element.factory, name), value))
        })
        .transpose()
}

/// Framerates are fractions; the graph runs at the rounded frames-per-second value
fn parse_framerate(value: &str) -> Option<u32> {
    let (num, den) = value.split_once('/').unwrap_or((value, "1"));
    let num: u64 = num.trim().parse().ok()?;
    let den: u64 = den.trim().parse().ok()?;
    if num == 0 || den == 0 {
        return None;
    }
    u32::try_from((num.saturating_add(den / 2) / den).max(1)).ok()
}

fn apply_caps(mut info: VideoInfo, caps: &CapsSpec) -> Result<VideoInfo, BuildError> {
    if caps.media_type != "video/x-raw" {
        return Err(BuildError::Topology(format!(
            "unsupported media type {}",
            caps.media_type
        )));
    }
    if let Some(format) = caps.field("format") {
        info.format = format.parse().map_err(|_| invalid("format", format))?;
    }
    for (field, target) in [("width", &mut info.width), ("height", &mut info.height)] {
        if let Some(value) = caps.field(field) {
            *target = value
                .parse()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| invalid(field, value))?;
        }
    }
    if let Some(framerate) = caps.field("framerate") {
        info.framerate = parse_framerate(framerate).ok_or_else(|| invalid("framerate", framerate))?;
    }
    Ok(info)
}

impl GraphBackend for SyntheticBackend {
    fn build_capture(&self, config: &CaptureConfig) -> Result<Arc<dyn CaptureGraph>, BuildError> {
        let description = launch::parse(&config.launch_description())?;
        let plan = self.plan_capture(&description)?;
        log::debug!("Capture graph: {}", description);
        log::info!("Capture caps negotiated to {}", plan.settings.info);

        let sink = AppSink::new(plan.settings.info, plan.max_buffers, plan.drop);
        Ok(Arc::new(CameraGraph::new("capture", plan.settings, sink)))
    }

    fn build_display(
        &self,
        config: &DisplayConfig,
        upstream: &VideoInfo,
    ) -> Result<Arc<dyn DisplayGraph>, BuildError> {
        let description = launch::parse(&config.launch_description())?;
        let plan = self.plan_display(&description, upstream)?;
        log::debug!("Display graph: {}", description);

        let src = AppSrc::new(plan.caps, plan.max_buffers);
        Ok(Arc::new(ScreenGraph::new("display", src)))
    }
}
