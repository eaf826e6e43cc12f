//! ChompChamps configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use gamestate::{MAX_AGENTS, MIN_BOARD_SIZE};
use serde::{Deserialize, Serialize};

use crate::cli::MasterCli;

/// Largest accepted board side
pub const MAX_BOARD_SIZE: u16 = 1000;

/// Largest accepted pacing delay in milliseconds
pub const MAX_DELAY_MS: u64 = 5000;

/// Largest accepted inactivity timeout in seconds
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// Main ChompChamps configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Board and timing
    pub game: GameConfig,

    /// Shared memory names
    pub shm: ShmConfig,

    /// Child process handling
    pub process: ProcessConfig,

    /// Log level used when none is given on the command line
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: ./chompchamps.yml
        let local_config = PathBuf::from("chompchamps.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/chompchamps/chompchamps.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("chompchamps").join("chompchamps.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Only the log level, read before logging is up; failures are ignored
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Command-line values win over the file
    pub fn apply_cli(&mut self, cli: &MasterCli) {
        if let Some(width) = cli.width {
            self.game.width = width;
        }
        if let Some(height) = cli.height {
            self.game.height = height;
        }
        if let Some(delay) = cli.delay {
            self.game.delay_ms = delay;
        }
        if let Some(timeout) = cli.timeout {
            self.game.timeout_secs = timeout;
        }
        if cli.seed.is_some() {
            self.game.seed = cli.seed;
        }
        if cli.view.is_some() {
            self.game.view = cli.view.clone();
        }
        if !cli.players.is_empty() {
            self.game.players = cli.players.clone();
        }
    }

    /// Check ranges before anything is created
    pub fn validate(&self) -> Result<()> {
        let game = &self.game;
        for (label, side) in [("width", game.width), ("height", game.height)] {
            if !(MIN_BOARD_SIZE..=MAX_BOARD_SIZE).contains(&side) {
                eyre::bail!(
                    "Board {} {} out of range ({}..={})",
                    label,
                    side,
                    MIN_BOARD_SIZE,
                    MAX_BOARD_SIZE
                );
            }
        }
        if game.delay_ms > MAX_DELAY_MS {
            eyre::bail!("Delay {}ms out of range (0..={})", game.delay_ms, MAX_DELAY_MS);
        }
        if !(1..=MAX_TIMEOUT_SECS).contains(&game.timeout_secs) {
            eyre::bail!("Timeout {}s out of range (1..={})", game.timeout_secs, MAX_TIMEOUT_SECS);
        }
        if game.players.is_empty() {
            eyre::bail!("At least one player is required");
        }
        if game.players.len() > MAX_AGENTS {
            eyre::bail!("Too many players: {} (max {})", game.players.len(), MAX_AGENTS);
        }
        for name in [&self.shm.state_name, &self.shm.sync_name] {
            if !name.starts_with('/') || name.len() < 2 || name[1..].contains('/') {
                eyre::bail!("Invalid shared memory name '{}': must be '/' followed by a plain name", name);
            }
        }
        if self.shm.state_name == self.shm.sync_name {
            eyre::bail!("State and sync shared memory names must differ");
        }
        Ok(())
    }
}

/// Board and timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub width: u16,

    pub height: u16,

    /// Pause after every update, in milliseconds
    #[serde(rename = "delay-ms")]
    pub delay_ms: u64,

    /// Seconds without a valid move before the game ends
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// Reward layout seed; current time when unset
    pub seed: Option<u64>,

    /// View binary
    pub view: Option<PathBuf>,

    /// Player binaries, one per slot
    pub players: Vec<PathBuf>,
}

impl GameConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            width: 10,
            height: 10,
            delay_ms: 200,
            timeout_secs: 10,
            seed: None,
            view: None,
            players: Vec::new(),
        }
    }
}

/// Shared memory names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShmConfig {
    /// World region
    #[serde(rename = "state-name")]
    pub state_name: String,

    /// Synchronization region
    #[serde(rename = "sync-name")]
    pub sync_name: String,
}

impl Default for ShmConfig {
    /// Well-known names unless overridden through the environment
    fn default() -> Self {
        let (state_name, sync_name) = gamestate::names_from_env();
        Self { state_name, sync_name }
    }
}

/// Child process handling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// How long children get to exit on their own before SIGTERM
    #[serde(rename = "reap-grace-ms")]
    pub reap_grace_ms: u64,

    /// Interval between view liveness checks while waiting for an ack
    #[serde(rename = "observer-ack-poll-ms")]
    pub observer_ack_poll_ms: u64,

    /// Attempts a client makes to map regions that do not exist yet
    #[serde(rename = "attach-retries")]
    pub attach_retries: u32,

    /// Pause between attach attempts
    #[serde(rename = "attach-retry-ms")]
    pub attach_retry_ms: u64,
}

impl ProcessConfig {
    pub fn reap_grace(&self) -> Duration {
        Duration::from_millis(self.reap_grace_ms)
    }

    pub fn observer_ack_poll(&self) -> Duration {
        Duration::from_millis(self.observer_ack_poll_ms.max(1))
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            reap_grace_ms: 5000,
            observer_ack_poll_ms: 100,
            attach_retries: 50,
            attach_retry_ms: 20,
        }
    }
}
