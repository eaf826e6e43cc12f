//! Synchronization region
//!
//! Holds every semaphore the processes share: the observer rendezvous pair,
//! the world [`RwGate`] and one move gate per agent slot.

use std::time::Duration;

use tracing::{debug, warn};

use crate::MAX_AGENTS;
use crate::error::{SemResult, StoreError, StoreResult};
use crate::gate::RwGate;
use crate::region::{Access, SharedRegion};
use crate::semaphore::Semaphore;

/// Layout of the synchronization region
#[repr(C)]
#[derive(Debug)]
pub struct SyncState {
    /// Master -> view: there is a new state to render
    view_notify: Semaphore,
    /// View -> master: rendering finished
    view_done: Semaphore,
    /// Serializes world readers and the writer
    gate: RwGate,
    /// Agent `i` may compute and send one move
    move_gates: [Semaphore; MAX_AGENTS],
}

impl SyncState {
    fn init(&self) -> StoreResult<()> {
        let wrap = |what: &'static str| move |source| StoreError::Semaphore { what, source };
        self.view_notify.init(0).map_err(wrap("init view_notify"))?;
        self.view_done.init(0).map_err(wrap("init view_done"))?;
        self.gate.init().map_err(wrap("init gate"))?;
        for gate in &self.move_gates {
            gate.init(1).map_err(wrap("init move gate"))?;
        }
        Ok(())
    }

    fn destroy(&self) -> SemResult<()> {
        self.view_notify.destroy()?;
        self.view_done.destroy()?;
        self.gate.destroy()?;
        for gate in &self.move_gates {
            gate.destroy()?;
        }
        Ok(())
    }
}

/// Handle on a mapped synchronization region
#[derive(Debug)]
pub struct SharedSync {
    region: SharedRegion,
    /// Set for the process that initialised the semaphores
    owner: bool,
}

impl SharedSync {
    /// Size of the region in bytes
    pub const LEN: usize = std::mem::size_of::<SyncState>();

    /// Create the named region and initialise every semaphore (master only)
    ///
    /// On failure the half-built region is unmapped and its name unlinked.
    pub fn create(name: &str) -> StoreResult<Self> {
        debug!(name, len = Self::LEN, "SharedSync::create: called");
        let region = SharedRegion::create(name, Self::LEN)?;
        let sync = Self { region, owner: true };
        if let Err(e) = sync.state().init() {
            drop(sync);
            if let Err(unlink_err) = SharedRegion::unlink(name) {
                warn!(name, error = %unlink_err, "Failed to unlink sync region after init failure");
            }
            return Err(e);
        }
        Ok(sync)
    }

    /// Map an existing region read-write (players and view)
    pub fn attach(name: &str) -> StoreResult<Self> {
        debug!(name, "SharedSync::attach: called");
        let region = SharedRegion::open(name, Self::LEN, Access::ReadWrite)?;
        Ok(Self { region, owner: false })
    }

    /// In-process region with freshly initialised semaphores
    pub fn anonymous() -> StoreResult<Self> {
        let region = SharedRegion::anonymous(Self::LEN)?;
        let sync = Self { region, owner: true };
        sync.state().init()?;
        Ok(sync)
    }

    fn state(&self) -> &SyncState {
        // SAFETY: the region is LEN bytes, page aligned, and laid out as SyncState
        unsafe { &*(self.region.as_ptr() as *const SyncState) }
    }

    /// Gate serializing world access
    pub fn gate(&self) -> &RwGate {
        &self.state().gate
    }

    /// Move gate of agent slot `idx`
    pub fn move_gate(&self, idx: usize) -> Option<&Semaphore> {
        self.state().move_gates.get(idx)
    }

    /// Tell the view a new state is ready (master)
    pub fn notify_observer(&self) -> SemResult<()> {
        self.state().view_notify.post()
    }

    /// Wait up to `timeout` for the view's acknowledgment (master)
    pub fn await_observer(&self, timeout: Duration) -> SemResult<bool> {
        self.state().view_done.wait_timeout(timeout)
    }

    /// Block until the master announces a new state (view)
    pub fn wait_notify(&self) -> SemResult<()> {
        self.state().view_notify.wait()
    }

    /// Acknowledge that rendering finished (view)
    pub fn ack(&self) -> SemResult<()> {
        self.state().view_done.post()
    }

    /// Name the region was mapped from
    pub fn name(&self) -> &str {
        self.region.label()
    }

    /// Destroy the semaphores (owner) and unmap
    ///
    /// Every other process must have detached; the name itself is unlinked
    /// separately by the master.
    pub fn release(self) {
        debug!(name = %self.name(), owner = self.owner, "SharedSync::release: called");
        if self.owner
            && let Err(e) = self.state().destroy()
        {
            warn!(error = %e, "Failed to destroy semaphores");
        }
    }
}
