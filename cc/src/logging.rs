//! Tracing setup shared by the three binaries
//!
//! Everything goes to stderr: a player's stdout is its intent pipe and the
//! view's stdout is the rendered board.

use eyre::Result;
use tracing::Level;

/// Resolve a level name; unknown names fall back to `default`
pub fn parse_level(name: &str, default: Level) -> Level {
    match name.to_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "INFO" => Level::INFO,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to {}", name, default);
            default
        }
    }
}

/// Install the global subscriber
///
/// Level priority: CLI --log-level > config file > `default`. `RUST_LOG`
/// directives are honoured on top.
pub fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>, default: Level) -> Result<()> {
    let level = cli_log_level
        .or(config_log_level)
        .map(|s| parse_level(s, default))
        .unwrap_or(default);

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install tracing subscriber: {}", e))?;

    tracing::debug!(%level, "setup_logging: initialized");
    Ok(())
}
