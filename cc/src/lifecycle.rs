//! Game lifecycle on the master side
//!
//! [`GameHost::launch`] creates both shared regions, seeds the board and
//! spawns every player while holding the write section, so no player can
//! look itself up before all pids are registered. The view is spawned last.
//! [`GameHost::run`] drives the [`Dispatcher`] and collects the result.
//! [`GameHost::teardown`] undoes everything in a fixed order and also runs
//! from `Drop`, so error paths clean up the same way.

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use eyre::{Context, Result};
use gamestate::{
    SYNC_NAME_ENV, STATE_NAME_ENV, SharedRegion, SharedSync, SharedWorld, Standing, WorldLayout, WorldSnapshot,
    standings, winner,
};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::board;
use crate::channel::{IntentSource, PipeChannels};
use crate::config::Config;
use crate::dispatch::{DispatchSettings, Dispatcher, FinishReason};
use crate::rendezvous::ObserverLink;
use crate::signals;

/// Interval between exit checks while reaping
const REAP_POLL: Duration = Duration::from_millis(20);

/// How long a child gets after SIGTERM before SIGKILL
const TERM_GRACE: Duration = Duration::from_secs(1);

/// How a child process ended, with its final numbers
#[derive(Debug, Clone)]
pub struct ChildExit {
    pub name: String,
    pub pid: i32,
    pub status: Option<ExitStatus>,
    pub score: u32,
    pub valid_moves: u32,
    pub invalid_moves: u32,
}

impl ChildExit {
    /// Exit code, `signal N`, or `unknown` when the child was never reaped
    pub fn status_label(&self) -> String {
        match self.status {
            Some(status) => match (status.code(), status.signal()) {
                (Some(code), _) => code.to_string(),
                (None, Some(signal)) => format!("signal {}", signal),
                (None, None) => "unknown".to_string(),
            },
            None => "unknown".to_string(),
        }
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Player {} ({}) exited ({}) with a score of {} / {} / {}",
            self.name,
            self.pid,
            self.status_label(),
            self.score,
            self.valid_moves,
            self.invalid_moves
        )
    }
}

/// Everything the master reports after a game
#[derive(Debug, Clone)]
pub struct GameReport {
    pub reason: FinishReason,
    /// Roster order
    pub players: Vec<ChildExit>,
    /// Best first
    pub standings: Vec<Standing>,
    /// Roster slot of the winner; None on a full tie
    pub winner: Option<usize>,
    pub view_status: Option<ExitStatus>,
}

impl GameReport {
    pub fn winner_name(&self) -> Option<&str> {
        self.winner
            .and_then(|idx| self.players.get(idx))
            .map(|p| p.name.as_str())
    }
}

#[derive(Debug)]
struct Spawned {
    name: String,
    child: Child,
    status: Option<ExitStatus>,
}

impl Spawned {
    fn pid(&self) -> i32 {
        self.child.id() as i32
    }
}

/// Owner of the shared regions and child processes of one game
#[derive(Debug)]
pub struct GameHost {
    config: Config,
    world: Option<SharedWorld>,
    sync: Option<SharedSync>,
    /// Region names this process created and must unlink
    created: Vec<String>,
    channels: PipeChannels,
    agents: Vec<Spawned>,
    observer: Option<Spawned>,
    /// Set once the game ended on its own
    clean: bool,
    torn_down: bool,
}

impl GameHost {
    /// Create regions, seed the board and spawn all children
    ///
    /// Expects a validated config. On error everything created so far is
    /// torn down before returning.
    pub fn launch(config: Config) -> Result<Self> {
        debug!(?config, "GameHost::launch: called");
        let layout = WorldLayout::new(config.game.width, config.game.height)?;
        let state_name = config.shm.state_name.clone();
        let sync_name = config.shm.sync_name.clone();
        let agent_count = config.game.players.len();

        let mut host = Self {
            config,
            world: None,
            sync: None,
            created: Vec::new(),
            channels: PipeChannels::new(),
            agents: Vec::new(),
            observer: None,
            clean: false,
            torn_down: false,
        };

        let world = SharedWorld::create(&state_name, layout, agent_count)
            .context(format!("Failed to create world region {}", state_name))?;
        host.created.push(state_name);
        host.world = Some(world);

        let sync = SharedSync::create(&sync_name).context(format!("Failed to create sync region {}", sync_name))?;
        host.created.push(sync_name);
        host.sync = Some(sync);

        host.spawn_children()?;
        info!(
            players = host.agents.len(),
            view = host.observer.is_some(),
            width = layout.width(),
            height = layout.height(),
            "Game launched"
        );
        Ok(host)
    }

    fn spawn_children(&mut self) -> Result<()> {
        let (Some(world), Some(sync)) = (self.world.as_ref(), self.sync.as_ref()) else {
            eyre::bail!("Shared regions are not created");
        };
        let game = &self.config.game;
        let names: Vec<String> = game
            .players
            .iter()
            .enumerate()
            .map(|(idx, path)| board::agent_name(path, idx))
            .collect();
        let seed = game.seed.unwrap_or_else(time_seed);
        info!(seed, "Seeding board");

        {
            let mut section = sync.gate().write()?;
            let mut state = world.write(&mut section)?;
            board::seed_board(&mut state, seed, &names);

            for (idx, (path, name)) in game.players.iter().zip(names).enumerate() {
                let mut child = spawn_client(path, &self.config, Stdio::piped())?;
                let pid = child.id() as i32;
                if let Some(agent) = state.agent_mut(idx) {
                    agent.pid = pid;
                }
                debug!(idx, pid, name = %name, "GameHost::spawn_children: player spawned");
                self.channels.push(child.stdout.take());
                self.agents.push(Spawned {
                    name,
                    child,
                    status: None,
                });
            }
        }

        if let Some(path) = &game.view {
            let child = spawn_client(path, &self.config, Stdio::inherit())?;
            debug!(pid = child.id(), "GameHost::spawn_children: view spawned");
            self.observer = Some(Spawned {
                name: board::agent_name(path, 0),
                child,
                status: None,
            });
        }
        Ok(())
    }

    /// Play the game to the end, wait for the children and report
    pub fn run(&mut self) -> Result<GameReport> {
        debug!("GameHost::run: called");
        let (Some(world), Some(sync)) = (self.world.as_ref(), self.sync.as_ref()) else {
            eyre::bail!("Game is not launched");
        };
        let settings = DispatchSettings {
            delay: self.config.game.delay(),
            timeout: self.config.game.timeout(),
            ..Default::default()
        };
        let link = ObserverLink::new(
            sync,
            self.observer.as_mut().map(|o| &mut o.child),
            self.config.process.observer_ack_poll(),
        );

        let reason = Dispatcher::new(world, sync, &mut self.channels, link, settings).run()?;
        let snapshot = {
            let section = sync.gate().read()?;
            world.read(&section).snapshot()
        };

        self.clean = reason != FinishReason::Interrupted && !signals::shutdown_requested();
        self.channels.close_all();
        self.reap_children();
        Ok(self.report(reason, &snapshot))
    }

    fn report(&self, reason: FinishReason, snapshot: &WorldSnapshot) -> GameReport {
        let players = self
            .agents
            .iter()
            .zip(&snapshot.agents)
            .map(|(spawned, agent)| ChildExit {
                name: spawned.name.clone(),
                pid: spawned.pid(),
                status: spawned.status,
                score: agent.score,
                valid_moves: agent.valid_moves,
                invalid_moves: agent.invalid_moves,
            })
            .collect();
        GameReport {
            reason,
            players,
            standings: standings(&snapshot.agents),
            winner: winner(&snapshot.agents),
            view_status: self.observer.as_ref().and_then(|o| o.status),
        }
    }

    /// Wait for every child; stragglers get SIGTERM, then SIGKILL
    fn reap_children(&mut self) {
        let grace = if self.clean {
            self.config.process.reap_grace()
        } else {
            Duration::ZERO
        };
        debug!(?grace, clean = self.clean, "GameHost::reap_children: called");
        for spawned in self.agents.iter_mut().chain(self.observer.iter_mut()) {
            if spawned.status.is_none() {
                spawned.status = reap(spawned, grace);
            }
        }
    }

    /// Release everything: channels, children, mappings, names
    ///
    /// Children are reaped before the semaphores are destroyed and before
    /// either name is unlinked. Safe to call more than once.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        debug!("GameHost::teardown: called");

        self.channels.close_all();
        self.reap_children();
        if let Some(world) = self.world.take() {
            world.release();
        }
        if let Some(sync) = self.sync.take() {
            sync.release();
        }
        for name in self.created.drain(..) {
            match SharedRegion::unlink(&name) {
                Ok(()) => debug!(name = %name, "GameHost::teardown: unlinked"),
                Err(e) => warn!(name = %name, error = %e, "Failed to unlink shared region"),
            }
        }
        info!("Game torn down");
    }
}

impl Drop for GameHost {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn spawn_client(path: &Path, config: &Config, stdout: Stdio) -> Result<Child> {
    Command::new(path)
        .arg(config.game.width.to_string())
        .arg(config.game.height.to_string())
        .env(STATE_NAME_ENV, &config.shm.state_name)
        .env(SYNC_NAME_ENV, &config.shm.sync_name)
        .stdin(Stdio::null())
        .stdout(stdout)
        .spawn()
        .context(format!("Failed to launch {}", path.display()))
}

fn wait_until(child: &mut Child, deadline: Instant) -> Option<ExitStatus> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if Instant::now() < deadline => std::thread::sleep(REAP_POLL),
            Ok(None) => return None,
            Err(e) => {
                warn!(pid = child.id(), error = %e, "Failed to check child process");
                return None;
            }
        }
    }
}

fn reap(spawned: &mut Spawned, grace: Duration) -> Option<ExitStatus> {
    let pid = spawned.pid();
    if let Some(status) = wait_until(&mut spawned.child, Instant::now() + grace) {
        debug!(pid, %status, "reap: exited");
        return Some(status);
    }

    if !grace.is_zero() {
        warn!(pid, name = %spawned.name, "Child did not exit in time, sending SIGTERM");
    }
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(pid, error = %e, "reap: SIGTERM failed");
    }
    if let Some(status) = wait_until(&mut spawned.child, Instant::now() + TERM_GRACE) {
        return Some(status);
    }

    warn!(pid, name = %spawned.name, "Child did not stop gracefully, sending SIGKILL");
    if let Err(e) = spawned.child.kill() {
        debug!(pid, error = %e, "reap: SIGKILL failed");
    }
    match spawned.child.wait() {
        Ok(status) => Some(status),
        Err(e) => {
            warn!(pid, error = %e, "Failed to reap child");
            None
        }
    }
}
