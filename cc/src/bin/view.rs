//! ChompChamps view
//!
//! Started by the master as `view <width> <height>`. Prints every state the
//! master announces and acknowledges it; exits after the final frame.

use std::io::Write;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{Level, info};

use chompchamps::cli::ClientArgs;
use chompchamps::client::{AttachPolicy, ObserverSession, is_missing_region};
use chompchamps::config::Config;
use chompchamps::logging::setup_logging;
use chompchamps::render::render_frame;
use chompchamps::signals;

fn main() -> Result<()> {
    let args = ClientArgs::parse();
    let config = Config::load(None).context("Failed to load configuration")?;
    setup_logging(None, config.log_level.as_deref(), Level::WARN).context("Failed to setup logging")?;
    signals::install_handlers()?;

    let policy = AttachPolicy::from(&config.process);
    let session = ObserverSession::connect(args.width, args.height, &policy).map_err(|e| {
        if is_missing_region(&e) {
            e.wrap_err("No game is running")
        } else {
            e
        }
    })?;

    let stdout = std::io::stdout();
    let mut frames = 0u64;
    while let Some(frame) = session.next_frame()? {
        {
            let mut out = stdout.lock();
            out.write_all(render_frame(&frame).as_bytes())
                .and_then(|()| out.flush())
                .context("Failed to print frame")?;
        }
        session.ack()?;
        frames += 1;
        if frame.finished || signals::shutdown_requested() {
            break;
        }
    }

    info!(frames, "View done");
    Ok(())
}
