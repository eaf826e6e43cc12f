//! Master side of the view handshake
//!
//! After every mutation the master posts the view's notify semaphore and
//! waits for its ack. The wait is sliced so a view that exits early is
//! noticed and the master carries on without it.

use std::process::Child;
use std::time::Duration;

use eyre::{Context, Result};
use gamestate::{SemError, SharedSync};
use tracing::{debug, warn};

use crate::signals;

/// Show the current state to whoever renders it
pub trait Rendezvous {
    /// Announce a new state and wait until it has been rendered
    fn frame(&mut self) -> Result<()>;
}

/// No view attached
#[derive(Debug, Default, Clone, Copy)]
pub struct NoObserver;

impl Rendezvous for NoObserver {
    fn frame(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Handshake with a spawned view process
#[derive(Debug)]
pub struct ObserverLink<'a> {
    sync: &'a SharedSync,
    child: Option<&'a mut Child>,
    poll: Duration,
    frames: u64,
}

impl<'a> ObserverLink<'a> {
    pub fn new(sync: &'a SharedSync, child: Option<&'a mut Child>, poll: Duration) -> Self {
        Self {
            sync,
            child,
            poll,
            frames: 0,
        }
    }

    /// Frames acknowledged so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Whether a live view is still attached
    pub fn is_attached(&self) -> bool {
        self.child.is_some()
    }
}

impl Rendezvous for ObserverLink<'_> {
    fn frame(&mut self) -> Result<()> {
        let Some(child) = self.child.as_deref_mut() else {
            return Ok(());
        };
        self.sync.notify_observer().context("Failed to notify view")?;

        loop {
            match self.sync.await_observer(self.poll) {
                Ok(true) => {
                    self.frames += 1;
                    return Ok(());
                }
                Ok(false) | Err(SemError::Interrupted) => {}
                Err(e) => return Err(e).context("Failed to wait for view"),
            }

            if let Some(status) = child.try_wait().context("Failed to check view process")? {
                warn!(%status, frames = self.frames, "View exited early, continuing without it");
                self.child = None;
                return Ok(());
            }
            if signals::shutdown_requested() {
                debug!("ObserverLink::frame: shutdown requested, not waiting for ack");
                return Ok(());
            }
        }
    }
}
