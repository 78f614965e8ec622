//! Media graph abstractions and session lifecycle
//!
//! - [`graph`]: the traits a media backend implements (graphs, capture sink, display source)
//! - [`launch`]: textual graph descriptions
//! - [`message`]: per-graph message bus
//! - [`state`]: session and graph state machines
//! - [`health`]: relay counters
//! - [`controller`]: builds, wires, runs and tears down sessions

pub mod controller;
pub mod graph;
pub mod health;
pub mod launch;
pub mod message;
pub mod state;

pub use controller::LifecycleController;
pub use graph::{
    BuildError, CaptureGraph, CaptureSink, DisplayGraph, DisplaySource, FlowError, FlowResult,
    FlowSuccess, GraphBackend, MediaGraph, NewSampleHandler, PullError, StateChangeError,
};
pub use health::{HealthSummary, RelayHealth};
pub use message::{Bus, BusReceiver, GraphMessage};
pub use state::{GraphState, SessionState};
