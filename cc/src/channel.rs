//! Per-agent intent channels
//!
//! Each agent writes one byte per intent to the write end of its own pipe
//! (its stdout). The master polls the read ends of all active agents and
//! reads single bytes from whichever are ready. End-of-file means the agent
//! withdrew.

use std::io::{ErrorKind, Read};
use std::os::fd::AsFd;
use std::process::ChildStdout;
use std::time::Duration;

use eyre::{Context, Result};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{debug, warn};

/// Result of reading one agent's channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// A direction code (0-7 are meaningful)
    Move(u8),
    /// Write end closed; the agent is gone
    Closed,
    /// Nothing to read after all
    Pending,
}

/// Where the dispatcher gets agent intents from
pub trait IntentSource {
    /// Wait up to `timeout` until at least one of `agents` has something to
    /// read; returns the ready slots (possibly none)
    fn wait_ready(&mut self, agents: &[usize], timeout: Duration) -> Result<Vec<usize>>;

    /// Read one intent from slot `idx`
    fn read_intent(&mut self, idx: usize) -> Result<Intent>;

    /// Stop listening to slot `idx` and release its channel
    fn retire(&mut self, idx: usize);

    /// Release every channel
    fn close_all(&mut self);
}

impl<T: IntentSource + ?Sized> IntentSource for &mut T {
    fn wait_ready(&mut self, agents: &[usize], timeout: Duration) -> Result<Vec<usize>> {
        (**self).wait_ready(agents, timeout)
    }

    fn read_intent(&mut self, idx: usize) -> Result<Intent> {
        (**self).read_intent(idx)
    }

    fn retire(&mut self, idx: usize) {
        (**self).retire(idx)
    }

    fn close_all(&mut self) {
        (**self).close_all()
    }
}

/// Read ends of the agents' stdout pipes, indexed by roster slot
#[derive(Debug, Default)]
pub struct PipeChannels {
    pipes: Vec<Option<ChildStdout>>,
}

impl PipeChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the next slot's pipe
    pub fn push(&mut self, pipe: Option<ChildStdout>) {
        self.pipes.push(pipe);
    }

    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }

    /// Number of channels still open
    pub fn open_count(&self) -> usize {
        self.pipes.iter().filter(|p| p.is_some()).count()
    }
}

fn poll_timeout(timeout: Duration) -> PollTimeout {
    let ms = timeout.as_millis().min(u16::MAX as u128) as u16;
    PollTimeout::from(ms)
}

impl IntentSource for PipeChannels {
    fn wait_ready(&mut self, agents: &[usize], timeout: Duration) -> Result<Vec<usize>> {
        let mut slots = Vec::with_capacity(agents.len());
        let mut fds = Vec::with_capacity(agents.len());
        for &idx in agents {
            if let Some(Some(pipe)) = self.pipes.get(idx) {
                slots.push(idx);
                fds.push(PollFd::new(pipe.as_fd(), PollFlags::POLLIN));
            }
        }
        if fds.is_empty() {
            std::thread::sleep(timeout);
            return Ok(Vec::new());
        }

        match poll(&mut fds, poll_timeout(timeout)) {
            Ok(0) => return Ok(Vec::new()),
            Ok(_) => {}
            Err(Errno::EINTR) => {
                debug!("PipeChannels::wait_ready: interrupted");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e).context("Failed to poll agent channels"),
        }

        let ready_flags = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
        let ready = slots
            .into_iter()
            .zip(fds.iter())
            .filter(|(_, fd)| fd.revents().is_some_and(|r| r.intersects(ready_flags)))
            .map(|(idx, _)| idx)
            .collect();
        Ok(ready)
    }

    fn read_intent(&mut self, idx: usize) -> Result<Intent> {
        let Some(Some(pipe)) = self.pipes.get_mut(idx) else {
            return Ok(Intent::Closed);
        };
        let mut byte = [0u8; 1];
        match pipe.read(&mut byte) {
            Ok(0) => Ok(Intent::Closed),
            Ok(_) => Ok(Intent::Move(byte[0])),
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => Ok(Intent::Pending),
            Err(e) => {
                warn!(idx, error = %e, "Agent channel broken, treating as closed");
                Ok(Intent::Closed)
            }
        }
    }

    fn retire(&mut self, idx: usize) {
        if let Some(slot) = self.pipes.get_mut(idx)
            && slot.take().is_some()
        {
            debug!(idx, "PipeChannels::retire: closed channel");
        }
    }

    fn close_all(&mut self) {
        debug!(open = self.open_count(), "PipeChannels::close_all: called");
        for slot in &mut self.pipes {
            slot.take();
        }
    }
}
