//! Frame relay between a capture sink and a display source
//!
//! The relay runs on the capture sink's streaming thread, once per available
//! frame. It is not a queue: each frame is pulled, copied, optionally marked
//! with the debug box and pushed before the next one is pulled, and the push
//! status goes back to the capture graph so backpressure reaches the producer.

pub mod binding;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod metrics;
pub mod overlay;

use std::sync::Arc;
use std::time::Instant;

use crate::pipeline::{
    CaptureSink, DisplaySource, FlowError, FlowResult, NewSampleHandler, RelayHealth,
};

pub use binding::RelayBinding;
pub use metrics::RateMeter;
pub use overlay::DebugOverlay;

pub struct FrameRelay {
    source: Arc<dyn DisplaySource>,
    overlay: Option<DebugOverlay>,
    rate: RateMeter,
    health: Arc<RelayHealth>,
}

impl FrameRelay {
    pub fn new(source: Arc<dyn DisplaySource>, health: Arc<RelayHealth>) -> Self {
        Self {
            source,
            overlay: None,
            rate: RateMeter::new(),
            health,
        }
    }

    pub fn with_overlay(mut self, overlay: Option<DebugOverlay>) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn source(&self) -> &Arc<dyn DisplaySource> {
        &self.source
    }

    /// Move one frame from `sink` to the display source
    pub fn relay(&mut self, sink: &dyn CaptureSink) -> FlowResult {
        let sample = match sink.pull_sample() {
            Ok(sample) => sample,
            Err(err) => {
                self.health.record_pull_miss();
                log::trace!("No frame to relay: {}", err);
                return Err(err.into());
            }
        };

        let view = match sample.map_readable() {
            Ok(view) => view,
            Err(err) => {
                self.health.record_map_failure();
                log::warn!("Dropping frame {}: {}", sample.sequence(), err);
                return Err(FlowError::Error);
            }
        };

        if let Some(fps) = self.rate.tick(Instant::now()) {
            self.health.record_rate(fps);
            log::debug!("Relaying {:.1} fps", fps);
        }

        let mut copy = view.to_frame_copy();
        if let Some(overlay) = &self.overlay {
            overlay.apply(&mut copy);
        }
        drop(view);

        let size = copy.data().len();
        let result = self.source.push_frame(copy);
        match result {
            Ok(_) => self.health.record_relayed(size),
            Err(err) => {
                self.health.record_push_refusal();
                log::trace!("Display source refused frame {}: {}", sample.sequence(), err);
            }
        }
        result
    }
}

impl NewSampleHandler for FrameRelay {
    fn on_new_sample(&mut self, sink: &dyn CaptureSink) -> FlowResult {
        self.relay(sink)
    }
}
