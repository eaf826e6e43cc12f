//! ChompChamps greedy player
//!
//! Started by the master as `player <width> <height>`. Each time its move
//! gate opens it moves towards the richest free neighbour by writing one
//! direction byte to stdout.

use std::io::ErrorKind;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{Level, debug, info};

use chompchamps::cli::ClientArgs;
use chompchamps::client::{AgentSession, AttachPolicy, is_missing_region};
use chompchamps::config::Config;
use chompchamps::logging::setup_logging;
use chompchamps::signals;
use chompchamps::strategy::choose_greedy;

fn main() -> Result<()> {
    let args = ClientArgs::parse();
    let config = Config::load(None).context("Failed to load configuration")?;
    setup_logging(None, config.log_level.as_deref(), Level::WARN).context("Failed to setup logging")?;
    signals::install_handlers()?;

    let policy = AttachPolicy::from(&config.process);
    let session = AgentSession::connect(args.width, args.height, &policy).map_err(|e| {
        if is_missing_region(&e) {
            e.wrap_err("No game is running")
        } else {
            e
        }
    })?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut moves = 0u64;
    while let Some(turn) = session.next_turn()? {
        if signals::shutdown_requested() {
            break;
        }
        let direction = choose_greedy(&turn.snapshot, &turn.me);
        debug!(direction, x = turn.me.x, y = turn.me.y, "player: sending move");
        match session.send(&mut out, direction) {
            Ok(()) => moves += 1,
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                debug!("player: master closed the channel");
                break;
            }
            Err(e) => return Err(e).context("Failed to send move"),
        }
    }

    info!(slot = session.slot(), moves, "Player done");
    Ok(())
}
