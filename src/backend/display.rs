//! Display graph fed by an app source
//!
//! Frames pushed into the [`AppSrc`] wait in a bounded queue until the render
//! thread takes them, converts them into display-side samples and presents
//! them on the surface. A full queue refuses the push instead of blocking, so
//! the relay never stalls the capture graph's streaming thread.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::display::SurfaceHandle;
use crate::frame::{BufferLedger, FrameCopy, VideoInfo};
use crate::pipeline::{
    Bus, BusReceiver, DisplayGraph, DisplaySource, FlowError, FlowResult, FlowSuccess,
    GraphState, MediaGraph, StateChangeError,
};
use crate::utils::lock;

struct SrcQueue {
    frames: VecDeque<FrameCopy>,
    flushing: bool,
    eos: bool,
}

/// Push source with a bounded queue
pub struct AppSrc {
    caps: VideoInfo,
    max_buffers: usize,
    queue: Mutex<SrcQueue>,
    available: Condvar,
}

impl AppSrc {
    pub fn new(caps: VideoInfo, max_buffers: usize) -> Self {
        Self {
            caps,
            max_buffers: max_buffers.max(1),
            queue: Mutex::new(SrcQueue {
                frames: VecDeque::new(),
                flushing: true,
                eos: false,
            }),
            available: Condvar::new(),
        }
    }

    pub fn set_flushing(&self, flushing: bool) {
        let mut queue = lock(&self.queue);
        queue.flushing = flushing;
        if flushing {
            queue.frames.clear();
            queue.eos = false;
        }
        self.available.notify_all();
    }

    pub fn queued(&self) -> usize {
        lock(&self.queue).frames.len()
    }

    /// Block until a frame is queued. `None` once flushing or drained after end-of-stream.
    fn next_frame(&self) -> Option<FrameCopy> {
        let mut queue = lock(&self.queue);
        loop {
            if queue.flushing {
                return None;
            }
            if let Some(frame) = queue.frames.pop_front() {
                return Some(frame);
            }
            if queue.eos {
                return None;
            }
            queue = self
                .available
                .wait(queue)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn at_eos(&self) -> bool {
        let queue = lock(&self.queue);
        queue.eos && !queue.flushing
    }
}

impl DisplaySource for AppSrc {
    fn push_frame(&self, frame: FrameCopy) -> FlowResult {
        if !frame.info().is_compatible(&self.caps) {
            log::warn!("Refusing {} on a source negotiated for {}", frame.info(), self.caps);
            return Err(FlowError::NotNegotiated);
        }

        let mut queue = lock(&self.queue);
        if queue.flushing {
            return Err(FlowError::Flushing);
        }
        if queue.eos {
            return Err(FlowError::Eos);
        }
        if queue.frames.len() >= self.max_buffers {
            return Err(FlowError::Backpressure);
        }
        queue.frames.push_back(frame);
        self.available.notify_one();
        Ok(FlowSuccess::Ok)
    }

    fn caps(&self) -> VideoInfo {
        self.caps
    }

    fn end_of_stream(&self) -> FlowResult {
        let mut queue = lock(&self.queue);
        if queue.flushing {
            return Err(FlowError::Flushing);
        }
        queue.eos = true;
        self.available.notify_all();
        Ok(FlowSuccess::Ok)
    }
}

pub struct ScreenGraph {
    name: String,
    src: Arc<AppSrc>,
    ledger: Arc<BufferLedger>,
    surface: Arc<Mutex<Option<SurfaceHandle>>>,
    bus: Bus,
    bus_rx: Mutex<Option<BusReceiver>>,
    state: Mutex<GraphState>,
    renderer: Mutex<Option<JoinHandle<()>>>,
}

impl ScreenGraph {
    pub fn new(name: impl Into<String>, src: AppSrc) -> Self {
        let name = name.into();
        let (bus, bus_rx) = Bus::new(name.clone());
        Self {
            name,
            src: Arc::new(src),
            ledger: BufferLedger::new(),
            surface: Arc::new(Mutex::new(None)),
            bus,
            bus_rx: Mutex::new(Some(bus_rx)),
            state: Mutex::new(GraphState::Ready),
            renderer: Mutex::new(None),
        }
    }

    pub fn ledger(&self) -> &Arc<BufferLedger> {
        &self.ledger
    }

    fn start_renderer(&self) -> Result<(), std::io::Error> {
        let src = Arc::clone(&self.src);
        let ledger = Arc::clone(&self.ledger);
        let surface = Arc::clone(&self.surface);
        let bus = self.bus.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-render", self.name))
            .spawn(move || render_loop(&src, &ledger, &surface, &bus))?;
        *lock(&self.renderer) = Some(handle);
        Ok(())
    }

    fn stop_renderer(&self) {
        self.src.set_flushing(true);
        let renderer = lock(&self.renderer).take();
        if let Some(handle) = renderer
            && handle.join().is_err()
        {
            log::error!("{}: render thread panicked", self.name);
        }
    }
}

fn render_loop(
    src: &AppSrc,
    ledger: &Arc<BufferLedger>,
    surface: &Mutex<Option<SurfaceHandle>>,
    bus: &Bus,
) {
    let mut warned = false;
    while let Some(frame) = src.next_frame() {
        let sample = frame.into_sample(ledger);
        let Some(surface) = lock(surface).clone() else {
            if !warned {
                bus.post_warning("No surface to render to, dropping frames", None);
                warned = true;
            }
            continue;
        };

        match sample.map_readable() {
            Ok(view) => surface
                .presenter()
                .present(&view, sample.sequence(), sample.pts()),
            Err(err) => bus.post_warning(
                "Frame could not be mapped for rendering",
                Some(err.to_string()),
            ),
        }
    }

    if src.at_eos() {
        bus.post_eos();
    }
}

impl MediaGraph for ScreenGraph {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> GraphState {
        *lock(&self.state)
    }

    fn set_state(&self, target: GraphState) -> Result<(), StateChangeError> {
        let mut state = lock(&self.state);
        let current = *state;
        if current == target {
            return Ok(());
        }

        match target {
            GraphState::Playing => {
                self.src.set_flushing(false);
                self.start_renderer().map_err(|err| StateChangeError {
                    graph: self.name.clone(),
                    from: current,
                    to: target,
                    reason: err.to_string(),
                })?;
            }
            GraphState::Ready | GraphState::Null => self.stop_renderer(),
        }

        *state = target;
        self.bus.post_state_changed(current, target);
        Ok(())
    }

    fn take_bus(&self) -> Option<BusReceiver> {
        lock(&self.bus_rx).take()
    }
}

impl DisplayGraph for ScreenGraph {
    fn display_source(&self) -> Arc<dyn DisplaySource> {
        self.src.clone()
    }

    fn set_surface(&self, surface: Option<SurfaceHandle>) {
        *lock(&self.surface) = surface;
    }
}

impl Drop for ScreenGraph {
    fn drop(&mut self) {
        self.stop_renderer();
    }
}
