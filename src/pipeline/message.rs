//! Graph message channel
//!
//! Each graph owns one bus. Streaming threads post to it without blocking and the
//! lifecycle controller's event loop is the single observer.

use tokio::sync::mpsc;

use super::state::GraphState;

/// Messages a graph reports to its observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphMessage {
    /// The graph's source has produced its last frame
    Eos { source: String },

    /// Fatal stream failure
    Error {
        source: String,
        message: String,
        debug: Option<String>,
    },

    /// Non-fatal problem worth reporting
    Warning {
        source: String,
        message: String,
        debug: Option<String>,
    },

    /// The graph moved between states
    StateChanged {
        source: String,
        old: GraphState,
        new: GraphState,
    },
}

impl GraphMessage {
    pub fn source(&self) -> &str {
        match self {
            GraphMessage::Eos { source }
            | GraphMessage::Error { source, .. }
            | GraphMessage::Warning { source, .. }
            | GraphMessage::StateChanged { source, .. } => source,
        }
    }

    pub fn is_eos(&self) -> bool {
        matches!(self, GraphMessage::Eos { .. })
    }

    /// End-of-stream and errors both end the session
    pub fn ends_session(&self) -> bool {
        matches!(self, GraphMessage::Eos { .. } | GraphMessage::Error { .. })
    }
}

pub type BusReceiver = mpsc::UnboundedReceiver<GraphMessage>;

/// Posting side of a graph's message channel
#[derive(Debug, Clone)]
pub struct Bus {
    name: String,
    tx: mpsc::UnboundedSender<GraphMessage>,
}

impl Bus {
    pub fn new(name: impl Into<String>) -> (Self, BusReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Post a message. Messages posted after the observer went away are dropped.
    pub fn post(&self, message: GraphMessage) {
        if self.tx.send(message).is_err() {
            log::trace!("{}: bus has no observer, message dropped", self.name);
        }
    }

    pub fn post_eos(&self) {
        self.post(GraphMessage::Eos {
            source: self.name.clone(),
        });
    }

    pub fn post_error(&self, message: impl Into<String>, debug: Option<String>) {
        self.post(GraphMessage::Error {
            source: self.name.clone(),
            message: message.into(),
            debug,
        });
    }

    pub fn post_warning(&self, message: impl Into<String>, debug: Option<String>) {
        self.post(GraphMessage::Warning {
            source: self.name.clone(),
            message: message.into(),
            debug,
        });
    }

    pub fn post_state_changed(&self, old: GraphState, new: GraphState) {
        self.post(GraphMessage::StateChanged {
            source: self.name.clone(),
            old,
            new,
        });
    }
}
