//! Capabilities the relay and the lifecycle controller need from a media framework
//!
//! The framework itself (element graph, codecs, rendering) is an external
//! collaborator. These traits state exactly what the bridge uses of it:
//! - [`CaptureSink`]: pull-based access to captured frames plus a new-frame notification
//! - [`DisplaySource`]: push-based input of the display graph
//! - [`MediaGraph`]: state changes and the message bus
//! - [`GraphBackend`]: construction of both graphs from a session configuration

use std::sync::Arc;

use crate::config::{CaptureConfig, DisplayConfig};
use crate::display::SurfaceHandle;
use crate::frame::{FrameCopy, Sample, VideoInfo};

use super::launch::LaunchError;
use super::message::BusReceiver;
use super::state::GraphState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowSuccess {
    Ok,
}

/// Flow-control and stream failures returned along the data path
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("graph is flushing")]
    Flushing,
    #[error("end of stream")]
    Eos,
    #[error("caps not negotiated")]
    NotNegotiated,
    #[error("downstream queue is full")]
    Backpressure,
    /// A notification found nothing to pull
    #[error("no frame available")]
    NoFrame,
    #[error("stream error")]
    Error,
}

impl FlowError {
    /// Failures that mean the producer should stop rather than retry
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowError::Flushing | FlowError::Eos)
    }
}

pub type FlowResult = Result<FlowSuccess, FlowError>;

/// Why a pull produced no frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PullError {
    #[error("no frame queued")]
    Empty,
    #[error("sink is flushing")]
    Flushing,
    #[error("sink reached end of stream")]
    Eos,
}

impl From<PullError> for FlowError {
    fn from(err: PullError) -> Self {
        match err {
            PullError::Empty => FlowError::NoFrame,
            PullError::Eos => FlowError::Eos,
            PullError::Flushing => FlowError::Flushing,
        }
    }
}

/// Observer invoked once per frame made available by a [`CaptureSink`]
///
/// Sinks never run the handler concurrently with itself.
pub trait NewSampleHandler: Send {
    fn on_new_sample(&mut self, sink: &dyn CaptureSink) -> FlowResult;
}

/// Terminal stage of a capture graph exposing pulled frames
pub trait CaptureSink: Send + Sync {
    /// Pull the next queued frame
    fn pull_sample(&self) -> Result<Sample, PullError>;

    /// Negotiated frame shape
    fn caps(&self) -> VideoInfo;

    /// Install the single new-sample observer, replacing any previous one
    fn set_handler(&self, handler: Box<dyn NewSampleHandler>);

    /// Remove the observer, waiting for an in-flight invocation to return
    fn clear_handler(&self) -> Option<Box<dyn NewSampleHandler>>;
}

/// Initial stage of a display graph accepting pushed frames
pub trait DisplaySource: Send + Sync {
    /// Queue a frame for display. The copy is consumed whatever the outcome.
    fn push_frame(&self, frame: FrameCopy) -> FlowResult;

    fn caps(&self) -> VideoInfo;

    /// Signal that no more frames will be pushed. The graph posts end-of-stream
    /// on its bus once the queued frames are presented.
    fn end_of_stream(&self) -> FlowResult;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{graph}: failed to change state from {from} to {to}: {reason}")]
pub struct StateChangeError {
    pub graph: String,
    pub from: GraphState,
    pub to: GraphState,
    pub reason: String,
}

/// A connected set of processing stages with its own state and bus
pub trait MediaGraph: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> GraphState;

    /// Move the graph to `target`. Setting `Null` is always possible and idempotent.
    fn set_state(&self, target: GraphState) -> Result<(), StateChangeError>;

    /// Take the receiving end of the bus. Only the first caller gets it.
    fn take_bus(&self) -> Option<BusReceiver>;
}

pub trait CaptureGraph: MediaGraph {
    fn capture_sink(&self) -> Arc<dyn CaptureSink>;
}

pub trait DisplayGraph: MediaGraph {
    fn display_source(&self) -> Arc<dyn DisplaySource>;

    /// Hand the output surface to the video sink
    fn set_surface(&self, surface: Option<SurfaceHandle>);
}

/// Graph construction failures
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid launch description: {0}")]
    Launch(#[from] LaunchError),
    #[error("no element factory named '{0}' is registered")]
    MissingElement(String),
    #[error("invalid graph topology: {0}")]
    Topology(String),
    #[error("invalid value '{value}' for {field}")]
    InvalidValue { field: String, value: String },
    #[error("no trust store to verify {0}")]
    Untrusted(String),
}

/// Constructs capture and display graphs
pub trait GraphBackend: Send + Sync {
    fn build_capture(&self, config: &CaptureConfig) -> Result<Arc<dyn CaptureGraph>, BuildError>;

    /// Build a display graph whose source accepts frames of `upstream` shape
    /// unless the configuration overrides its caps.
    fn build_display(
        &self,
        config: &DisplayConfig,
        upstream: &VideoInfo,
    ) -> Result<Arc<dyn DisplayGraph>, BuildError>;
}
