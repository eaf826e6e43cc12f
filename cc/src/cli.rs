//! Command-line definitions for the master, player and view binaries

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use gamestate::MAX_AGENTS;

/// ChompChamps master - runs a game between player processes
#[derive(Parser, Debug)]
#[command(
    name = "master",
    version,
    about = "ChompChamps master: runs a game between player processes",
    disable_help_flag = true
)]
pub struct MasterCli {
    /// Print help (-h is the board height)
    #[arg(long, action = ArgAction::Help)]
    pub help: Option<bool>,

    /// Board width (min 10)
    #[arg(short = 'w', long, value_parser = clap::value_parser!(u16).range(10..=1000))]
    pub width: Option<u16>,

    /// Board height (min 10)
    #[arg(short = 'h', long, value_parser = clap::value_parser!(u16).range(10..=1000))]
    pub height: Option<u16>,

    /// Delay between state updates in milliseconds
    #[arg(short = 'd', long, value_parser = clap::value_parser!(u64).range(0..=5000))]
    pub delay: Option<u64>,

    /// Seconds without a valid move before the game ends
    #[arg(short = 't', long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,

    /// Seed for the reward layout (default: current time)
    #[arg(short = 's', long)]
    pub seed: Option<u64>,

    /// Path to the view binary
    #[arg(short = 'v', long)]
    pub view: Option<PathBuf>,

    /// Paths to player binaries
    #[arg(short = 'p', long = "players", required = true, num_args = 1..=MAX_AGENTS)]
    pub players: Vec<PathBuf>,

    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,
}

/// Arguments the master passes to every player and to the view
#[derive(Parser, Debug)]
pub struct ClientArgs {
    /// Board width
    #[arg(value_parser = clap::value_parser!(u16).range(10..))]
    pub width: u16,

    /// Board height
    #[arg(value_parser = clap::value_parser!(u16).range(10..))]
    pub height: u16,
}
