use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::pipeline::{CaptureSink, DisplaySource};

use super::FrameRelay;

/// Wiring of one capture sink to one display source through a [`FrameRelay`]
///
/// Created before either graph plays and removed no later than the first of the
/// two graphs stops. Unbinding is idempotent and may race between the caller
/// thread and the event loop.
pub struct RelayBinding {
    sink: Arc<dyn CaptureSink>,
    source: Arc<dyn DisplaySource>,
    bound: AtomicBool,
}

impl RelayBinding {
    /// Install `relay` as the sink's new-sample handler
    pub fn bind(sink: Arc<dyn CaptureSink>, relay: FrameRelay) -> Self {
        let source = Arc::clone(relay.source());
        sink.set_handler(Box::new(relay));
        log::debug!("Relay bound {} -> {}", sink.caps(), source.caps());
        Self {
            sink,
            source,
            bound: AtomicBool::new(true),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    pub fn sink(&self) -> &Arc<dyn CaptureSink> {
        &self.sink
    }

    pub fn source(&self) -> &Arc<dyn DisplaySource> {
        &self.source
    }

    /// Remove the relay from the sink
    ///
    /// Blocks until an in-flight relay invocation has returned. Once this returns
    /// no further frame is pushed to the display source.
    pub fn unbind(&self) {
        if !self.bound.swap(false, Ordering::AcqRel) {
            return;
        }
        if self.sink.clear_handler().is_some() {
            log::debug!("Relay unbound");
        }
    }
}

impl Drop for RelayBinding {
    fn drop(&mut self) {
        self.unbind();
    }
}
