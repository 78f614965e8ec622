//! Session lifecycle: construction, wiring, event loop and teardown
//!
//! A session is two graphs joined by a [`RelayBinding`], an acquired display
//! surface and one background thread running the event loop that watches both
//! buses. `start` and `stop` are called from the owner's thread, never from the
//! event loop.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::assets::{EVENT_LOOP_THREAD, HEALTH_LOG_INTERVAL};
use crate::config::SessionConfig;
use crate::display::{DisplayTarget, SurfaceHandle};
use crate::relay::{DebugOverlay, FrameRelay, RelayBinding};
use crate::utils::lock;
use crate::utils::sos::SignalOfStop;

use super::graph::{CaptureGraph, DisplayGraph, GraphBackend, MediaGraph};
use super::health::RelayHealth;
use super::message::{BusReceiver, GraphMessage};
use super::state::{GraphState, SessionState};

/// Move `state` to `target` if the state machine allows it
fn transition(state: &Mutex<SessionState>, target: SessionState) -> bool {
    let mut current = lock(state);
    apply_transition(&mut current, target)
}

fn apply_transition(current: &mut SessionState, target: SessionState) -> bool {
    if !current.can_transition_to(&target) {
        log::warn!("Ignoring session transition {} -> {}", current, target);
        return false;
    }
    if current.description() != target.description() {
        log::debug!("Session {} -> {}", current, target);
    }
    *current = target;
    true
}

/// Stop a graph, logging instead of failing. Stopping is always possible.
fn shut_down<G: MediaGraph + ?Sized>(graph: &G) {
    if let Err(err) = graph.set_state(GraphState::Null) {
        log::warn!("{}", err);
    }
}

struct EventLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl EventLoop {
    fn spawn(context: EventLoopContext) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .context("failed to build the event loop runtime")?;
        let cancel = context.cancel.clone();
        let handle = thread::Builder::new()
            .name(EVENT_LOOP_THREAD.to_string())
            .spawn(move || runtime.block_on(context.run()))
            .context("failed to spawn the event loop thread")?;
        Ok(Self { cancel, handle })
    }

    fn shutdown(self) {
        self.cancel.cancel();
        if self.handle.join().is_err() {
            log::error!("Event loop thread panicked");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Capture,
    Display,
}

/// Everything the event loop needs, owned by its thread
struct EventLoopContext {
    capture_bus: BusReceiver,
    display_bus: BusReceiver,
    capture: Arc<dyn CaptureGraph>,
    display: Arc<dyn DisplayGraph>,
    binding: Arc<RelayBinding>,
    state: Arc<Mutex<SessionState>>,
    health: Arc<RelayHealth>,
    end_signal: SignalOfStop,
    cancel: CancellationToken,
}

impl EventLoopContext {
    async fn run(mut self) {
        log::debug!("Event loop started");
        let mut health_tick = tokio::time::interval_at(
            tokio::time::Instant::now() + HEALTH_LOG_INTERVAL,
            HEALTH_LOG_INTERVAL,
        );

        loop {
            let (origin, message) = tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(message) = self.capture_bus.recv() => (Origin::Capture, message),
                Some(message) = self.display_bus.recv() => (Origin::Display, message),
                _ = health_tick.tick() => {
                    log::info!("Relay health: {}", self.health.summary());
                    continue;
                }
            };

            if !self.handle(&message) {
                continue;
            }
            if origin == Origin::Capture && message.is_eos() && self.drain_display() {
                continue;
            }
            self.end_session();
            break;
        }
        log::debug!("Event loop exited");
    }

    /// Log a bus message. Returns `true` if it ends the session.
    fn handle(&self, message: &GraphMessage) -> bool {
        match message {
            GraphMessage::Eos { source } => {
                log::info!("End of stream from {}", source);
            }
            GraphMessage::Error {
                source,
                message,
                debug,
            } => {
                log::error!(
                    "Error received from {}: {} ({})",
                    source,
                    message,
                    debug.as_deref().unwrap_or("no debug information")
                );
            }
            GraphMessage::Warning {
                source,
                message,
                debug,
            } => {
                log::warn!(
                    "Warning received from {}: {} ({})",
                    source,
                    message,
                    debug.as_deref().unwrap_or("no debug information")
                );
            }
            GraphMessage::StateChanged { source, old, new } => {
                log::debug!("{} changed state from {} to {}", source, old, new);
            }
        }
        message.ends_session()
    }

    /// Forward the end of the capture stream to the display graph, whose own
    /// end-of-stream then ends the session once queued frames are presented.
    /// Returns `false` if the display cannot take it.
    fn drain_display(&self) -> bool {
        self.binding.unbind();
        match self.display.display_source().end_of_stream() {
            Ok(_) => {
                log::debug!("Draining {} before ending the session", self.display.name());
                true
            }
            Err(err) => {
                log::warn!("{} cannot drain: {}", self.display.name(), err);
                false
            }
        }
    }

    /// Halt both graphs and tell the owner the session is over
    fn end_session(&self) {
        self.binding.unbind();
        shut_down(self.capture.as_ref());
        shut_down(self.display.as_ref());

        let mut state = lock(&self.state);
        self.end_signal.cancel();
        if state.is_running() {
            apply_transition(&mut state, SessionState::Stopping);
        }
    }
}

/// Resources of one session, released in reverse order of acquisition
struct Session {
    target: Box<dyn DisplayTarget>,
    capture: Option<Arc<dyn CaptureGraph>>,
    display: Option<Arc<dyn DisplayGraph>>,
    binding: Option<Arc<RelayBinding>>,
    surface: Option<SurfaceHandle>,
    event_loop: Option<EventLoop>,
    end_signal: SignalOfStop,
}

impl Session {
    fn new(target: Box<dyn DisplayTarget>, end_signal: SignalOfStop) -> Self {
        Self {
            target,
            capture: None,
            display: None,
            binding: None,
            surface: None,
            event_loop: None,
            end_signal,
        }
    }

    /// Idempotent: every step only undoes what was actually done
    fn teardown(&mut self) {
        if let Some(binding) = self.binding.take() {
            binding.unbind();
        }
        if let Some(capture) = &self.capture {
            shut_down(capture.as_ref());
        }
        if let Some(display) = &self.display {
            shut_down(display.as_ref());
        }
        if let Some(event_loop) = self.event_loop.take() {
            event_loop.shutdown();
        }
        if let Some(surface) = self.surface.take() {
            if let Some(display) = &self.display {
                display.set_surface(None);
            }
            self.target.release(surface);
        }
        self.capture = None;
        self.display = None;
        self.end_signal.cancel();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Owns at most one relay session at a time
pub struct LifecycleController {
    backend: Arc<dyn GraphBackend>,
    state: Arc<Mutex<SessionState>>,
    health: Arc<RelayHealth>,
    end_signal: SignalOfStop,
    session: Option<Session>,
}

impl LifecycleController {
    pub fn new(backend: Arc<dyn GraphBackend>) -> Self {
        Self {
            backend,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            health: Arc::new(RelayHealth::new()),
            end_signal: SignalOfStop::new(),
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Counters of the current or last session
    pub fn health(&self) -> Arc<RelayHealth> {
        Arc::clone(&self.health)
    }

    /// Fired when the current session ends, by itself or through [`stop`](Self::stop)
    pub fn session_end_signal(&self) -> SignalOfStop {
        self.end_signal.clone()
    }

    /// Start a session rendering to `target`, stopping any active one first
    ///
    /// On failure everything created so far is released and the controller is
    /// left `Idle`. Failed starts are not retried.
    pub fn start(
        &mut self,
        config: &SessionConfig,
        target: Box<dyn DisplayTarget>,
    ) -> anyhow::Result<()> {
        if self.session.is_some() {
            log::info!("Stopping the active session before starting a new one");
            self.stop();
        }

        transition(&self.state, SessionState::Starting);
        self.health = Arc::new(RelayHealth::new());
        self.end_signal = SignalOfStop::new();

        let mut session = Session::new(target, self.end_signal.clone());
        if let Err(err) = self.build(&mut session, config) {
            log::error!("Failed to start session: {:#}", err);
            session.teardown();
            transition(&self.state, SessionState::Idle);
            return Err(err);
        }
        self.session = Some(session);

        let mut state = lock(&self.state);
        apply_transition(
            &mut state,
            SessionState::Running {
                started_at: Instant::now(),
            },
        );
        // The stream may already have ended while the graphs were starting
        if self.end_signal.cancelled() {
            apply_transition(&mut state, SessionState::Stopping);
        }
        log::info!("Session started");
        Ok(())
    }

    fn build(&self, session: &mut Session, config: &SessionConfig) -> anyhow::Result<()> {
        let capture = self
            .backend
            .build_capture(&config.capture)
            .context("failed to build the capture graph")?;
        session.capture = Some(Arc::clone(&capture));

        let sink = capture.capture_sink();
        let caps = sink.caps();
        let display = self
            .backend
            .build_display(&config.display, &caps)
            .context("failed to build the display graph")?;
        session.display = Some(Arc::clone(&display));

        let source = display.display_source();
        if !source.caps().is_compatible(&caps) {
            anyhow::bail!(
                "caps mismatch: capture produces {} but display accepts {}",
                caps,
                source.caps()
            );
        }

        let relay = FrameRelay::new(source, Arc::clone(&self.health))
            .with_overlay(DebugOverlay::from_config(&config.overlay));
        let binding = Arc::new(RelayBinding::bind(sink, relay));
        session.binding = Some(Arc::clone(&binding));

        let surface = session
            .target
            .acquire()
            .context("failed to acquire the display surface")?;
        display.set_surface(Some(surface.clone()));
        session.surface = Some(surface);

        let capture_bus = capture
            .take_bus()
            .context("capture graph bus already has an observer")?;
        let display_bus = display
            .take_bus()
            .context("display graph bus already has an observer")?;
        session.event_loop = Some(EventLoop::spawn(EventLoopContext {
            capture_bus,
            display_bus,
            capture: Arc::clone(&capture),
            display: Arc::clone(&display),
            binding,
            state: Arc::clone(&self.state),
            health: Arc::clone(&self.health),
            end_signal: self.end_signal.clone(),
            cancel: CancellationToken::new(),
        })?);

        display
            .set_state(GraphState::Playing)
            .context("failed to start the display graph")?;
        capture
            .set_state(GraphState::Playing)
            .context("failed to start the capture graph")?;
        Ok(())
    }

    /// Tear the session down. Blocks until the event loop has exited. No-op when idle.
    pub fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            log::debug!("No active session to stop");
            return;
        };

        if let Some(ran) = self.state().running_duration() {
            log::debug!("Session ran for {:.1}s", ran.as_secs_f64());
        }
        transition(&self.state, SessionState::Stopping);
        session.teardown();
        log::info!("Session stopped: {}", self.health.summary());
        transition(&self.state, SessionState::Idle);
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SyntheticBackend;
    use crate::backend::registry::PluginRegistry;
    use crate::config::{CaptureConfig, DisplayConfig, Orientation};
    use crate::assets::MAX_FLOW_FAILURES;
    use crate::display::{FramePresenter, HeadlessSurface, SurfaceError};
    use crate::frame::{MappedFrame, PixelFormat, Timestamp};
    use std::time::Duration;

    fn controller() -> LifecycleController {
        let registry = PluginRegistry::with_static_plugins().unwrap();
        LifecycleController::new(Arc::new(SyntheticBackend::new(registry, None)))
    }

    fn config(num_buffers: Option<u64>) -> SessionConfig {
        SessionConfig {
            capture: CaptureConfig {
                format: PixelFormat::Rgba,
                width: 64,
                height: 48,
                framerate: 100,
                orientation: Orientation::None,
                num_buffers,
                ..CaptureConfig::default()
            },
            ..SessionConfig::default()
        }
    }

    type Journal = Arc<Mutex<Vec<String>>>;

    /// Headless surface that records acquire and release calls
    struct JournalTarget {
        surface: HeadlessSurface,
        journal: Journal,
    }

    impl JournalTarget {
        fn boxed(id: u64, journal: &Journal) -> Box<dyn DisplayTarget> {
            Box::new(Self {
                surface: HeadlessSurface::new(id),
                journal: journal.clone(),
            })
        }
    }

    impl DisplayTarget for JournalTarget {
        fn acquire(&mut self) -> Result<SurfaceHandle, SurfaceError> {
            let handle = self.surface.acquire()?;
            self.journal
                .lock()
                .unwrap()
                .push(format!("acquire:{}", handle.id()));
            Ok(handle)
        }

        fn release(&mut self, surface: SurfaceHandle) {
            self.journal
                .lock()
                .unwrap()
                .push(format!("release:{}", surface.id()));
            self.surface.release(surface);
        }
    }

    struct UnavailableTarget;

    impl DisplayTarget for UnavailableTarget {
        fn acquire(&mut self) -> Result<SurfaceHandle, SurfaceError> {
            Err(SurfaceError::Unavailable("window destroyed".to_string()))
        }

        fn release(&mut self, _surface: SurfaceHandle) {
            panic!("nothing was acquired");
        }
    }

    fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut controller = controller();
        controller.stop();
        controller.stop();
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn test_start_and_stop() {
        let mut controller = controller();
        let surface = HeadlessSurface::new(1);
        let presenter = surface.presenter();

        controller.start(&config(None), Box::new(surface)).unwrap();
        assert!(controller.state().is_running());
        assert!(wait_until(Duration::from_secs(5), || {
            presenter.frames_presented() > 0
        }));

        controller.stop();
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.session_end_signal().cancelled());
        assert!(controller.health().frames_relayed() > 0);

        let latest = presenter.latest().unwrap();
        assert_eq!(latest.info.unwrap().width, 64);
        // debug box in the corner, default colour
        assert_eq!(&latest.data[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_second_start_replaces_first_session() {
        let journal = Journal::default();
        let mut controller = controller();

        controller
            .start(&config(None), JournalTarget::boxed(1, &journal))
            .unwrap();
        let first_end = controller.session_end_signal();
        controller
            .start(&config(None), JournalTarget::boxed(2, &journal))
            .unwrap();

        assert!(first_end.cancelled());
        assert!(!controller.session_end_signal().cancelled());
        assert!(controller.state().is_running());
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["acquire:1", "release:1", "acquire:2"]
        );

        controller.stop();
        assert_eq!(journal.lock().unwrap().last().unwrap(), "release:2");
    }

    #[test]
    fn test_missing_element_leaves_idle() {
        let journal = Journal::default();
        let mut controller = controller();
        let mut config = config(None);
        config.capture.source = "nosuchsrc".to_string();

        let err = controller
            .start(&config, JournalTarget::boxed(1, &journal))
            .unwrap_err();
        assert!(format!("{err:#}").contains("nosuchsrc"));
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(journal.lock().unwrap().is_empty());

        // A later start is unaffected
        controller
            .start(&self::config(Some(1)), JournalTarget::boxed(2, &journal))
            .unwrap();
    }

    #[test]
    fn test_caps_mismatch_fails_start() {
        let journal = Journal::default();
        let mut controller = controller();
        let config = SessionConfig {
            display: DisplayConfig {
                caps: Some("video/x-raw,format=NV12".to_string()),
                ..DisplayConfig::default()
            },
            ..config(None)
        };

        let err = controller
            .start(&config, JournalTarget::boxed(1, &journal))
            .unwrap_err();
        assert!(err.to_string().contains("caps mismatch"));
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(journal.lock().unwrap().is_empty());
    }

    #[test]
    fn test_surface_failure_unwinds() {
        let mut controller = controller();
        let err = controller
            .start(&config(None), Box::new(UnavailableTarget))
            .unwrap_err();
        assert!(format!("{err:#}").contains("window destroyed"));
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(controller.health().frames_relayed(), 0);

        controller.stop();
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn test_end_of_stream_stops_session() {
        let mut controller = controller();
        controller
            .start(&config(Some(5)), Box::new(HeadlessSurface::new(1)))
            .unwrap();

        let ended = controller.session_end_signal();
        assert!(ended.wait_timeout(Duration::from_secs(10)));
        assert_eq!(controller.state(), SessionState::Stopping);

        let health = controller.health();
        assert!(health.frames_relayed() > 0);
        assert!(health.frames_relayed() + health.push_refusals() <= 5);

        controller.stop();
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn test_frames_reach_surface_in_order() {
        let mut controller = controller();
        let surface = HeadlessSurface::new(1);
        let presenter = surface.presenter();
        let mut config = config(Some(20));
        config.overlay.enabled = false;

        controller.start(&config, Box::new(surface)).unwrap();
        assert!(
            controller
                .session_end_signal()
                .wait_timeout(Duration::from_secs(10))
        );
        controller.stop();

        // the display drains before the session ends
        assert_eq!(presenter.frames_presented(), controller.health().frames_relayed());
        assert!(presenter.frames_presented() > 0);
        assert_eq!(presenter.frames_reordered(), 0);
        let latest = presenter.latest().unwrap();
        assert!(latest.sequence < 20);
        // bars pattern, untouched
        assert_eq!(&latest.data[0..4], &[192, 192, 192, 255]);
    }

    /// Presenter that takes far longer than a capture frame interval
    struct SlowPresenter;

    impl FramePresenter for SlowPresenter {
        fn present(&self, _frame: &MappedFrame<'_>, _sequence: u64, _pts: Timestamp) {
            thread::sleep(Duration::from_millis(40));
        }
    }

    struct SlowTarget;

    impl DisplayTarget for SlowTarget {
        fn acquire(&mut self) -> Result<SurfaceHandle, SurfaceError> {
            Ok(SurfaceHandle::new(7, Arc::new(SlowPresenter)))
        }

        fn release(&mut self, _surface: SurfaceHandle) {}
    }

    #[test]
    fn test_stream_error_stops_session() {
        let mut controller = controller();
        let mut config = config(None);
        config.capture.framerate = 1000;
        config.display.max_buffers = 1;

        controller.start(&config, Box::new(SlowTarget)).unwrap();
        assert!(
            controller
                .session_end_signal()
                .wait_timeout(Duration::from_secs(10))
        );
        assert_eq!(controller.state(), SessionState::Stopping);
        assert!(controller.health().push_refusals() >= u64::from(MAX_FLOW_FAILURES));

        controller.stop();
        assert_eq!(controller.state(), SessionState::Idle);
    }
}
