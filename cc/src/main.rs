//! ChompChamps master
//!
//! Creates the shared game, launches the players and the optional view,
//! runs the game to the end and prints every child's result.

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{Level, debug, info};

use chompchamps::FinishReason;
use chompchamps::cli::MasterCli;
use chompchamps::config::Config;
use chompchamps::lifecycle::{GameHost, GameReport};
use chompchamps::logging::setup_logging;
use chompchamps::signals;

fn print_report(report: &GameReport) {
    if let Some(status) = report.view_status {
        let code = status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string());
        println!("View exited ({})", code);
    }
    for player in &report.players {
        println!("{}", player);
    }
    println!("Standings:");
    for (place, standing) in report.standings.iter().enumerate() {
        println!(
            "  {}. {} {} / {} / {}",
            place + 1,
            standing.name,
            standing.score,
            standing.valid_moves,
            standing.invalid_moves
        );
    }
    match report.winner_name() {
        Some(name) => println!("{} {}", "Winner:".green().bold(), name),
        None => println!("{}", "No winner".yellow()),
    }
    println!("Game over: {}", report.reason);
}

fn main() -> Result<()> {
    let cli = MasterCli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref(), Level::INFO)
        .context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.apply_cli(&cli);
    config.validate().context("Invalid configuration")?;
    debug!(?config, "main: configuration ready");

    signals::install_handlers()?;

    let mut host = GameHost::launch(config)?;
    let result = host.run();
    host.teardown();
    let report = result?;

    print_report(&report);
    if report.reason == FinishReason::Interrupted {
        eyre::bail!("Game interrupted");
    }
    info!(winner = ?report.winner_name(), "Master done");
    Ok(())
}

