//! Attach side used by players and the view

use std::io::Write;
use std::time::Duration;

use eyre::{Context, Result};
use gamestate::{
    Access, AgentRecord, SemError, SharedSync, SharedWorld, StoreError, StoreResult, WorldLayout, WorldSnapshot,
    names_from_env,
};
use tracing::{debug, info};

use crate::config::ProcessConfig;

/// How long a client keeps trying to map regions that do not exist yet
#[derive(Debug, Clone, Copy)]
pub struct AttachPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for AttachPolicy {
    fn default() -> Self {
        Self::from(&ProcessConfig::default())
    }
}

impl From<&ProcessConfig> for AttachPolicy {
    fn from(process: &ProcessConfig) -> Self {
        Self {
            retries: process.attach_retries,
            delay: Duration::from_millis(process.attach_retry_ms),
        }
    }
}

impl AttachPolicy {
    /// Run `attach` until it stops reporting a missing region
    fn retry<T>(&self, mut attach: impl FnMut() -> StoreResult<T>) -> StoreResult<T> {
        let mut attempt = 0;
        loop {
            match attach() {
                Err(e) if e.is_not_created() && attempt < self.retries => {
                    attempt += 1;
                    debug!(attempt, "AttachPolicy::retry: region not there yet");
                    std::thread::sleep(self.delay);
                }
                result => return result,
            }
        }
    }
}

/// Map the world read-only and the sync region read-write
fn attach(width: u16, height: u16, policy: &AttachPolicy) -> Result<(SharedWorld, SharedSync)> {
    let (state_name, sync_name) = names_from_env();
    let layout = WorldLayout::new(width, height)?;
    let world = policy
        .retry(|| SharedWorld::attach(&state_name, layout, Access::ReadOnly))
        .context(format!("Failed to attach world region {}", state_name))?;
    let sync = policy
        .retry(|| SharedSync::attach(&sync_name))
        .context(format!("Failed to attach sync region {}", sync_name))?;
    Ok((world, sync))
}

/// What an agent sees when its move gate opens
#[derive(Debug, Clone)]
pub struct Turn {
    pub snapshot: WorldSnapshot,
    /// This agent's own record
    pub me: AgentRecord,
}

/// A player's connection to a running game
#[derive(Debug)]
pub struct AgentSession {
    world: SharedWorld,
    sync: SharedSync,
    slot: usize,
}

impl AgentSession {
    /// Attach and find this process's roster slot by pid
    pub fn connect(width: u16, height: u16, policy: &AttachPolicy) -> Result<Self> {
        let (world, sync) = attach(width, height, policy)?;
        let pid = std::process::id() as i32;
        let slot = {
            let section = sync.gate().read()?;
            world.read(&section).find_pid(pid)
        };
        let Some(slot) = slot else {
            eyre::bail!("Process {} is not registered in the game", pid);
        };
        info!(slot, pid, "Player attached");
        Ok(Self { world, sync, slot })
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Wait for the move gate, then snapshot the world
    ///
    /// None once the game is finished, this agent is blocked or a signal
    /// interrupted the wait.
    pub fn next_turn(&self) -> Result<Option<Turn>> {
        let Some(gate) = self.sync.move_gate(self.slot) else {
            eyre::bail!("No move gate for slot {}", self.slot);
        };
        match gate.wait() {
            Ok(()) => {}
            Err(SemError::Interrupted) => return Ok(None),
            Err(e) => return Err(e).context("Failed to wait for move gate"),
        }

        let snapshot = match self.sync.gate().read() {
            Ok(section) => self.world.read(&section).snapshot(),
            Err(SemError::Interrupted) => return Ok(None),
            Err(e) => return Err(e).context("Failed to enter read section"),
        };
        let Some(me) = snapshot.agents.get(self.slot).copied() else {
            eyre::bail!("Slot {} missing from roster", self.slot);
        };
        if snapshot.finished || me.is_blocked() {
            debug!(finished = snapshot.finished, blocked = me.is_blocked(), "AgentSession::next_turn: done");
            return Ok(None);
        }
        Ok(Some(Turn { snapshot, me }))
    }

    /// Send one direction code
    pub fn send<W: Write>(&self, out: &mut W, direction: u8) -> std::io::Result<()> {
        out.write_all(&[direction])?;
        out.flush()
    }
}

/// The view's connection to a running game
#[derive(Debug)]
pub struct ObserverSession {
    world: SharedWorld,
    sync: SharedSync,
}

impl ObserverSession {
    pub fn connect(width: u16, height: u16, policy: &AttachPolicy) -> Result<Self> {
        let (world, sync) = attach(width, height, policy)?;
        info!("View attached");
        Ok(Self { world, sync })
    }

    /// Wait for the next notification and snapshot the world
    ///
    /// None when a signal interrupted the wait.
    pub fn next_frame(&self) -> Result<Option<WorldSnapshot>> {
        match self.sync.wait_notify() {
            Ok(()) => {}
            Err(SemError::Interrupted) => return Ok(None),
            Err(e) => return Err(e).context("Failed to wait for notification"),
        }
        match self.sync.gate().read() {
            Ok(section) => Ok(Some(self.world.read(&section).snapshot())),
            Err(SemError::Interrupted) => Ok(None),
            Err(e) => Err(e).context("Failed to enter read section"),
        }
    }

    /// Tell the master the frame has been rendered
    pub fn ack(&self) -> Result<()> {
        self.sync.ack().context("Failed to acknowledge frame")
    }
}

/// Whether `err` was caused by a region that was never created
pub fn is_missing_region(err: &eyre::Report) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<StoreError>().is_some_and(StoreError::is_not_created))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_retry_gives_up_after_limit() {
        let policy = AttachPolicy {
            retries: 3,
            delay: Duration::from_millis(1),
        };
        let calls = Cell::new(0);
        let result: StoreResult<()> = policy.retry(|| {
            calls.set(calls.get() + 1);
            Err(StoreError::NotCreated { name: "/x".to_string() })
        });
        assert!(result.unwrap_err().is_not_created());
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_retry_stops_on_other_errors() {
        let policy = AttachPolicy::default();
        let calls = Cell::new(0);
        let result: StoreResult<()> = policy.retry(|| {
            calls.set(calls.get() + 1);
            Err(StoreError::InvalidLayout("bad".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_retry_succeeds_once_created() {
        let policy = AttachPolicy {
            retries: 5,
            delay: Duration::from_millis(1),
        };
        let calls = Cell::new(0);
        let result = policy.retry(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(StoreError::NotCreated { name: "/x".to_string() })
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_missing_region_detection() {
        let err = eyre::Report::new(StoreError::NotCreated { name: "/x".to_string() }).wrap_err("Failed to attach");
        assert!(is_missing_region(&err));
        assert!(!is_missing_region(&eyre::eyre!("other")));
    }
}
