//! Scripted capture sink and recording display source for relay tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::frame::{BufferLedger, FrameBuffer, FrameCopy, Sample, Timestamp, VideoInfo};
use crate::pipeline::{
    CaptureSink, DisplaySource, FlowError, FlowResult, FlowSuccess, NewSampleHandler, PullError,
};

/// Capture sink fed by the test
pub struct ScriptedSink {
    caps: VideoInfo,
    queue: Mutex<VecDeque<Result<Sample, PullError>>>,
    handler: Mutex<Option<Box<dyn NewSampleHandler>>>,
}

impl ScriptedSink {
    pub fn new(caps: VideoInfo) -> Arc<Self> {
        Arc::new(Self {
            caps,
            queue: Mutex::new(VecDeque::new()),
            handler: Mutex::new(None),
        })
    }

    pub fn queue(&self, item: Result<Sample, PullError>) {
        self.queue.lock().unwrap().push_back(item);
    }

    /// Queue a well-formed frame
    pub fn queue_frame(&self, ledger: &Arc<BufferLedger>, sequence: u64) {
        self.queue(Ok(frame(ledger, self.caps, sequence)));
    }

    /// Deliver a new-sample notification the way a streaming thread would
    pub fn notify(&self) -> Option<FlowResult> {
        let mut handler = self.handler.lock().unwrap();
        handler.as_mut().map(|h| h.on_new_sample(self))
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }
}

impl CaptureSink for ScriptedSink {
    fn pull_sample(&self) -> Result<Sample, PullError> {
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(PullError::Empty))
    }

    fn caps(&self) -> VideoInfo {
        self.caps
    }

    fn set_handler(&self, handler: Box<dyn NewSampleHandler>) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    fn clear_handler(&self) -> Option<Box<dyn NewSampleHandler>> {
        self.handler.lock().unwrap().take()
    }
}

/// Display source remembering what was pushed into it
pub struct RecordingSource {
    caps: VideoInfo,
    pushed: Mutex<Vec<FrameCopy>>,
    refuse_with: Mutex<Option<FlowError>>,
}

impl RecordingSource {
    pub fn new(caps: VideoInfo) -> Arc<Self> {
        Arc::new(Self {
            caps,
            pushed: Mutex::new(Vec::new()),
            refuse_with: Mutex::new(None),
        })
    }

    pub fn refuse_with(&self, error: Option<FlowError>) {
        *self.refuse_with.lock().unwrap() = error;
    }

    pub fn pushed(&self) -> Vec<(VideoInfo, u64)> {
        self.pushed
            .lock()
            .unwrap()
            .iter()
            .map(|f| (*f.info(), f.sequence()))
            .collect()
    }

    pub fn take_pushed(&self) -> Vec<FrameCopy> {
        std::mem::take(&mut *self.pushed.lock().unwrap())
    }
}

impl DisplaySource for RecordingSource {
    fn push_frame(&self, frame: FrameCopy) -> FlowResult {
        if let Some(error) = *self.refuse_with.lock().unwrap() {
            return Err(error);
        }
        self.pushed.lock().unwrap().push(frame);
        Ok(FlowSuccess::Ok)
    }

    fn caps(&self) -> VideoInfo {
        self.caps
    }

    fn end_of_stream(&self) -> FlowResult {
        Ok(FlowSuccess::Ok)
    }
}

/// Frame filled with its sequence number
pub fn frame(ledger: &Arc<BufferLedger>, info: VideoInfo, sequence: u64) -> Sample {
    let buffer = FrameBuffer::new(vec![sequence as u8; info.size()], ledger)
        .with_pts(Timestamp::for_frame(sequence, info.framerate))
        .with_duration(info.frame_duration())
        .with_sequence(sequence);
    Sample::new(info, buffer)
}
