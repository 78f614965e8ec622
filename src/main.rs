use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use camera_relay::backend::SyntheticBackend;
use camera_relay::config::{Orientation, SessionConfig, app_name, app_version};
use camera_relay::display::HeadlessSurface;
use camera_relay::pipeline::LifecycleController;
use camera_relay::utils::sos::SignalOfStop;
use clap::{Arg, ArgAction, Command, value_parser};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let matches = Command::new(app_name())
        .version(app_version())
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Session configuration file (JSON)")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .help("Capture width in pixels")
                .value_parser(value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .help("Capture height in pixels")
                .value_parser(value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("fps")
                .long("fps")
                .help("Capture frame rate")
                .value_parser(value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("orientation")
                .long("orientation")
                .help("Capture flip method (none, clockwise, rotate-180, ...)")
                .value_parser(value_parser!(Orientation)),
        )
        .arg(
            Arg::new("frames")
                .short('n')
                .long("frames")
                .help("Stop after this many captured frames")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("duration")
                .short('d')
                .long("duration")
                .value_name("SECONDS")
                .help("Stop after this many seconds")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("no-overlay")
                .long("no-overlay")
                .help("Do not draw the debug box")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("trust-store")
                .long("trust-store")
                .value_name("FILE")
                .help("PEM certificate bundle, overrides CA_CERTIFICATES")
                .value_parser(value_parser!(PathBuf)),
        )
        .get_matches();

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(width) = matches.get_one::<u32>("width") {
        config.capture.width = *width;
    }
    if let Some(height) = matches.get_one::<u32>("height") {
        config.capture.height = *height;
    }
    if let Some(fps) = matches.get_one::<u32>("fps") {
        config.capture.framerate = *fps;
    }
    if let Some(orientation) = matches.get_one::<Orientation>("orientation") {
        config.capture.orientation = *orientation;
    }
    if let Some(frames) = matches.get_one::<u64>("frames") {
        config.capture.num_buffers = Some(*frames);
    }
    if matches.get_flag("no-overlay") {
        config.overlay.enabled = false;
    }
    if let Some(path) = matches.get_one::<PathBuf>("trust-store") {
        config.trust_store = Some(path.clone());
    }
    let duration = matches.get_one::<u64>("duration").map(|s| Duration::from_secs(*s));

    let backend = SyntheticBackend::initialize(config.trust_store.as_deref())
        .context("failed to register plugins")?;
    let mut controller = LifecycleController::new(Arc::new(backend));

    let surface = HeadlessSurface::new(1);
    let presenter = surface.presenter();
    controller.start(&config, Box::new(surface))?;

    // SIGINT, SIGTERM and SIGHUP end the session like an end of stream would
    let interrupted = SignalOfStop::new();
    let ended = controller.session_end_signal();
    {
        let interrupted = interrupted.clone();
        let ended = ended.clone();
        ctrlc::set_handler(move || {
            interrupted.cancel();
            ended.cancel();
        })
        .context("failed to set the Ctrl-C handler")?;
    }

    match duration {
        Some(duration) => {
            if !ended.wait_timeout(duration) {
                log::info!("Ran for {}s, stopping", duration.as_secs());
            }
        }
        None => ended.wait_cancellation(),
    }
    if interrupted.cancelled() {
        log::info!("Interrupted, stopping");
    }

    controller.stop();
    let health = controller.health();
    log::info!("{}", health.summary());
    log::info!(
        "{} frames presented, {} out of order",
        presenter.frames_presented(),
        presenter.frames_reordered()
    );
    Ok(())
}
