//! Test-pattern camera graph ending in an app sink
//!
//! A producer thread renders frames at the negotiated rate and hands each one to
//! the [`AppSink`], which queues it and notifies the installed new-sample handler
//! on the producer thread. The handler's flow status is what the producer sees,
//! so downstream backpressure slows or stops the camera.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::assets::MAX_FLOW_FAILURES;
use crate::frame::{BufferLedger, Color, FrameBuffer, PixelFormat, Sample, Timestamp, VideoInfo};
use crate::pipeline::{
    Bus, BusReceiver, CaptureGraph, CaptureSink, FlowError, FlowResult, FlowSuccess, GraphState,
    MediaGraph, NewSampleHandler, PullError, StateChangeError,
};
use crate::utils::lock;
use crate::utils::sos::SignalOfStop;

/// SMPTE-style bars, left to right
const BARS: [Color; 8] = [
    Color::rgb(192, 192, 192),
    Color::rgb(192, 192, 0),
    Color::rgb(0, 192, 192),
    Color::rgb(0, 192, 0),
    Color::rgb(192, 0, 192),
    Color::rgb(192, 0, 0),
    Color::rgb(0, 0, 192),
    Color::rgb(0, 0, 0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    Bars,
    Solid(Color),
}

impl std::str::FromStr for TestPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "smpte" | "0" => Ok(TestPattern::Bars),
            "black" | "2" => Ok(TestPattern::Solid(Color::rgb(0, 0, 0))),
            "white" | "3" => Ok(TestPattern::Solid(Color::rgb(255, 255, 255))),
            "red" | "4" => Ok(TestPattern::Solid(Color::rgb(255, 0, 0))),
            "green" | "5" => Ok(TestPattern::Solid(Color::rgb(0, 255, 0))),
            "blue" | "6" => Ok(TestPattern::Solid(Color::rgb(0, 0, 255))),
            other => Err(other.to_string()),
        }
    }
}

impl TestPattern {
    fn color_at(&self, x: usize, width: usize) -> Color {
        match self {
            TestPattern::Solid(color) => *color,
            TestPattern::Bars => BARS[(x * BARS.len() / width.max(1)).min(BARS.len() - 1)],
        }
    }

    /// One frame of this pattern in the layout described by `info`
    pub fn render(&self, info: &VideoInfo) -> Vec<u8> {
        let mut data = vec![0u8; info.size()];
        let width = info.width as usize;

        match info.format {
            PixelFormat::Nv12 | PixelFormat::I420 => {
                let (luma, chroma) = data.split_at_mut(info.plane_offset(1));
                for row in luma.chunks_exact_mut(info.plane_stride(0)) {
                    for (x, px) in row.iter_mut().enumerate() {
                        *px = self.color_at(x, width).to_yuv().0;
                    }
                }

                if info.format == PixelFormat::Nv12 {
                    for row in chroma.chunks_exact_mut(info.plane_stride(1)) {
                        for (cx, pair) in row.chunks_exact_mut(2).enumerate() {
                            let (_, u, v) = self.color_at(cx * 2, width).to_yuv();
                            pair.copy_from_slice(&[u, v]);
                        }
                    }
                } else {
                    let (u_plane, v_plane) = chroma.split_at_mut(info.plane_size(1));
                    let stride = info.plane_stride(1);
                    for (u_row, v_row) in u_plane
                        .chunks_exact_mut(stride)
                        .zip(v_plane.chunks_exact_mut(stride))
                    {
                        for (cx, (u, v)) in u_row.iter_mut().zip(v_row.iter_mut()).enumerate() {
                            (_, *u, *v) = self.color_at(cx * 2, width).to_yuv();
                        }
                    }
                }
            }
            format => {
                let pixels: Vec<Vec<u8>> = (0..width)
                    .map(|x| self.color_at(x, width).packed(format).unwrap_or_default())
                    .collect();
                for row in data.chunks_exact_mut(info.plane_stride(0)) {
                    for (px, pixel) in row
                        .chunks_exact_mut(format.packed_pixel_size().unwrap_or(4))
                        .zip(&pixels)
                    {
                        px.copy_from_slice(pixel);
                    }
                }
            }
        }
        data
    }
}

struct SinkQueue {
    samples: VecDeque<Sample>,
    flushing: bool,
    eos: bool,
}

/// Pull-based sink with a bounded queue and a single new-sample handler
pub struct AppSink {
    caps: VideoInfo,
    max_buffers: usize,
    drop: bool,
    queue: Mutex<SinkQueue>,
    space: Condvar,
    handler: Mutex<Option<Box<dyn NewSampleHandler>>>,
}

impl AppSink {
    pub fn new(caps: VideoInfo, max_buffers: usize, drop: bool) -> Self {
        Self {
            caps,
            max_buffers: max_buffers.max(1),
            drop,
            queue: Mutex::new(SinkQueue {
                samples: VecDeque::new(),
                flushing: true,
                eos: false,
            }),
            space: Condvar::new(),
            handler: Mutex::new(None),
        }
    }

    /// Queue a sample and notify the handler
    ///
    /// When the queue is full the oldest sample is dropped in `drop` mode,
    /// otherwise the caller blocks until there is room or the sink flushes.
    pub fn push(&self, sample: Sample) -> FlowResult {
        {
            let mut queue = lock(&self.queue);
            loop {
                if queue.flushing {
                    return Err(FlowError::Flushing);
                }
                if queue.samples.len() < self.max_buffers {
                    break;
                }
                if self.drop {
                    if let Some(old) = queue.samples.pop_front() {
                        log::trace!("Capture sink full, dropping frame {}", old.sequence());
                    }
                } else {
                    queue = self
                        .space
                        .wait(queue)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            }
            queue.samples.push_back(sample);
        }

        let mut handler = lock(&self.handler);
        match handler.as_mut() {
            Some(handler) => handler.on_new_sample(self),
            None => Ok(FlowSuccess::Ok),
        }
    }

    /// Flushing discards queued samples and wakes a blocked producer
    pub fn set_flushing(&self, flushing: bool) {
        let mut queue = lock(&self.queue);
        queue.flushing = flushing;
        if flushing {
            queue.samples.clear();
            queue.eos = false;
        }
        self.space.notify_all();
    }

    pub fn set_eos(&self) {
        lock(&self.queue).eos = true;
    }

    pub fn queued(&self) -> usize {
        lock(&self.queue).samples.len()
    }
}

impl CaptureSink for AppSink {
    fn pull_sample(&self) -> Result<Sample, PullError> {
        let mut queue = lock(&self.queue);
        if queue.flushing {
            return Err(PullError::Flushing);
        }
        match queue.samples.pop_front() {
            Some(sample) => {
                self.space.notify_one();
                Ok(sample)
            }
            None if queue.eos => Err(PullError::Eos),
            None => Err(PullError::Empty),
        }
    }

    fn caps(&self) -> VideoInfo {
        self.caps
    }

    fn set_handler(&self, handler: Box<dyn NewSampleHandler>) {
        *lock(&self.handler) = Some(handler);
    }

    fn clear_handler(&self) -> Option<Box<dyn NewSampleHandler>> {
        lock(&self.handler).take()
    }
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub info: VideoInfo,
    pub pattern: TestPattern,
    pub num_buffers: Option<u64>,
}

struct Producer {
    sos: SignalOfStop,
    handle: JoinHandle<()>,
}

pub struct CameraGraph {
    name: String,
    settings: CameraSettings,
    sink: Arc<AppSink>,
    ledger: Arc<BufferLedger>,
    bus: Bus,
    bus_rx: Mutex<Option<BusReceiver>>,
    state: Mutex<GraphState>,
    producer: Mutex<Option<Producer>>,
}

impl CameraGraph {
    pub fn new(name: impl Into<String>, settings: CameraSettings, sink: AppSink) -> Self {
        let name = name.into();
        let (bus, bus_rx) = Bus::new(name.clone());
        Self {
            name,
            settings,
            sink: Arc::new(sink),
            ledger: BufferLedger::new(),
            bus,
            bus_rx: Mutex::new(Some(bus_rx)),
            state: Mutex::new(GraphState::Ready),
            producer: Mutex::new(None),
        }
    }

    pub fn ledger(&self) -> &Arc<BufferLedger> {
        &self.ledger
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    fn start_producer(&self) -> Result<(), std::io::Error> {
        let sos = SignalOfStop::new();
        let worker = ProducerLoop {
            settings: self.settings.clone(),
            sink: Arc::clone(&self.sink),
            ledger: Arc::clone(&self.ledger),
            bus: self.bus.clone(),
            sos: sos.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("{}-src", self.name))
            .spawn(move || worker.run())?;
        *lock(&self.producer) = Some(Producer { sos, handle });
        Ok(())
    }

    fn stop_producer(&self) {
        let producer = lock(&self.producer).take();
        if let Some(producer) = producer {
            producer.sos.cancel();
            self.sink.set_flushing(true);
            if producer.handle.join().is_err() {
                log::error!("{}: producer thread panicked", self.name);
            }
        }
    }
}

struct ProducerLoop {
    settings: CameraSettings,
    sink: Arc<AppSink>,
    ledger: Arc<BufferLedger>,
    bus: Bus,
    sos: SignalOfStop,
}

impl ProducerLoop {
    fn run(self) {
        let info = self.settings.info;
        let frame = self.settings.pattern.render(&info);
        let frame_duration = info.frame_duration();
        let started = Instant::now();
        let mut index = 0u64;
        let mut failures = 0u32;

        log::debug!("{}: producing {}", self.bus.name(), info);
        loop {
            if self.settings.num_buffers.is_some_and(|n| index >= n) {
                log::debug!("{}: produced {} frames, end of stream", self.bus.name(), index);
                self.sink.set_eos();
                self.bus.post_eos();
                break;
            }

            let pts = Timestamp::for_frame(index, info.framerate);
            let due = started + pts.as_duration();
            if self.sos.wait_timeout(due.saturating_duration_since(Instant::now())) {
                break;
            }

            let buffer = FrameBuffer::new(frame.clone(), &self.ledger)
                .with_pts(pts)
                .with_duration(frame_duration)
                .with_sequence(index);
            match self.sink.push(Sample::new(info, buffer)) {
                Ok(_) => failures = 0,
                Err(FlowError::Eos) => {
                    log::debug!("{}: downstream reached end of stream", self.bus.name());
                    self.sink.set_eos();
                    self.bus.post_eos();
                    break;
                }
                Err(err) if err.is_terminal() => {
                    // flushing requested by our own state change is silent
                    if !self.sos.cancelled() {
                        self.bus.post_error(
                            "Internal data stream error",
                            Some(format!("streaming stopped, reason: {err}")),
                        );
                    }
                    break;
                }
                Err(err) => {
                    failures += 1;
                    if failures >= MAX_FLOW_FAILURES {
                        self.bus.post_error(
                            "Internal data stream error",
                            Some(format!(
                                "streaming stopped after {failures} consecutive failures, reason: {err}"
                            )),
                        );
                        break;
                    }
                }
            }
            index += 1;
        }
    }
}

impl MediaGraph for CameraGraph {
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
                self.sink.set_flushing(false);
                self.start_producer().map_err(|err| StateChangeError {
                    graph: self.name.clone(),
                    from: current,
                    to: target,
                    reason: err.to_string(),
                })?;
            }
            GraphState::Ready | GraphState::Null => {
                self.stop_producer();
                self.sink.set_flushing(true);
            }
        }

        *state = target;
        self.bus.post_state_changed(current, target);
        Ok(())
    }

    fn take_bus(&self) -> Option<BusReceiver> {
        lock(&self.bus_rx).take()
    }
}

impl CaptureGraph for CameraGraph {
    fn capture_sink(&self) -> Arc<dyn CaptureSink> {
        self.sink.clone()
    }
}

impl Drop for CameraGraph {
    fn drop(&mut self) {
        self.stop_producer();
    }
}
