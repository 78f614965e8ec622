//! Session and graph state management

use std::time::Instant;

/// Session state machine
///
/// `Idle → Starting → Running → Stopping → Idle`. A failed start unwinds
/// straight from `Starting` back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session exists
    Idle,

    /// Graphs are being constructed and wired
    Starting,

    /// Both graphs are playing and frames are relayed
    Running {
        /// When the session reached the running state
        started_at: Instant,
    },

    /// The session is being torn down, either on request or after an error/EOS
    Stopping,
}

impl SessionState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;

        match (self, target) {
            (Idle, Starting) => true,

            (Starting, Running { .. }) => true,
            (Starting, Idle) => true, // unwinding a failed start

            (Running { .. }, Stopping) => true,

            (Stopping, Idle) => true,

            (a, b) if a == b => true,

            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Starting => "Starting",
            SessionState::Running { .. } => "Running",
            SessionState::Stopping => "Stopping",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running { .. })
    }

    /// Get the duration since the session started (if running)
    pub fn running_duration(&self) -> Option<std::time::Duration> {
        if let SessionState::Running { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// State of one media graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GraphState {
    /// Resources released, streaming threads joined
    Null,
    /// Constructed and negotiated but not streaming
    Ready,
    /// Streaming
    Playing,
}

impl std::fmt::Display for GraphState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GraphState::Null => "NULL",
            GraphState::Ready => "READY",
            GraphState::Playing => "PLAYING",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let idle = SessionState::Idle;
        let starting = SessionState::Starting;
        let running = SessionState::Running {
            started_at: Instant::now(),
        };
        let stopping = SessionState::Stopping;

        assert!(idle.can_transition_to(&starting));
        assert!(starting.can_transition_to(&running));
        assert!(starting.can_transition_to(&idle));
        assert!(running.can_transition_to(&stopping));
        assert!(stopping.can_transition_to(&idle));

        // Self-transitions
        assert!(idle.can_transition_to(&idle));
        assert!(stopping.can_transition_to(&stopping));
    }

    #[test]
    fn test_invalid_transitions() {
        let idle = SessionState::Idle;
        let running = SessionState::Running {
            started_at: Instant::now(),
        };
        let stopping = SessionState::Stopping;

        assert!(!idle.can_transition_to(&running)); // Must go through Starting
        assert!(!idle.can_transition_to(&stopping));
        assert!(!running.can_transition_to(&idle)); // Must go through Stopping
        assert!(!stopping.can_transition_to(&running));
    }

    #[test]
    fn test_state_checks() {
        let running = SessionState::Running {
            started_at: Instant::now(),
        };
        assert!(running.is_running());
        assert!(!running.is_idle());
        assert!(running.running_duration().is_some());
        assert!(SessionState::Idle.is_idle());
        assert!(SessionState::Stopping.running_duration().is_none());
    }
}
