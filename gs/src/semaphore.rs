//! Process-shared POSIX semaphores
//!
//! [`Semaphore`] wraps an unnamed `sem_t` that lives inside a shared region.
//! It is only ever handled by reference into that region; it is initialised
//! in place by the creator and destroyed in place before the region is unmapped.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nix::errno::Errno;

use crate::error::{SemError, SemResult};

/// An unnamed semaphore placed in shared memory
#[repr(transparent)]
pub struct Semaphore(UnsafeCell<MaybeUninit<libc::sem_t>>);

// sem_t is designed for concurrent use from any thread or process.
unsafe impl Sync for Semaphore {}
unsafe impl Send for Semaphore {}

impl Semaphore {
    fn raw(&self) -> *mut libc::sem_t {
        self.0.get().cast()
    }

    /// Initialise in place as a process-shared semaphore with `value`
    ///
    /// Must be called exactly once, by the region's creator, before any
    /// other process attaches.
    pub fn init(&self, value: u32) -> SemResult<()> {
        // SAFETY: raw() points at sem_t-sized, suitably aligned shared memory
        let rc = unsafe { libc::sem_init(self.raw(), 1, value) };
        if rc == -1 { Err(SemError::last()) } else { Ok(()) }
    }

    /// Decrement, blocking while the value is zero
    ///
    /// Returns [`SemError::Interrupted`] if a signal handler ran while waiting.
    pub fn wait(&self) -> SemResult<()> {
        // SAFETY: initialised by the creator before attach
        let rc = unsafe { libc::sem_wait(self.raw()) };
        if rc == -1 { Err(SemError::last()) } else { Ok(()) }
    }

    /// Decrement, retrying transparently when a signal interrupts the wait
    pub fn wait_uninterrupted(&self) -> SemResult<()> {
        loop {
            match self.wait() {
                Err(SemError::Interrupted) => continue,
                other => return other,
            }
        }
    }

    /// Decrement without blocking; `Ok(false)` if the value was zero
    pub fn try_wait(&self) -> SemResult<bool> {
        // SAFETY: see wait()
        let rc = unsafe { libc::sem_trywait(self.raw()) };
        if rc == 0 {
            return Ok(true);
        }
        match Errno::last() {
            Errno::EAGAIN => Ok(false),
            Errno::EINTR => Err(SemError::Interrupted),
            errno => Err(SemError::Os(errno)),
        }
    }

    /// Decrement, giving up after `timeout`; `Ok(false)` on timeout
    pub fn wait_timeout(&self, timeout: Duration) -> SemResult<bool> {
        let deadline = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .saturating_add(timeout);
        let ts = libc::timespec {
            tv_sec: deadline.as_secs() as libc::time_t,
            tv_nsec: deadline.subsec_nanos() as libc::c_long,
        };
        // SAFETY: see wait(); ts is a valid absolute CLOCK_REALTIME deadline
        let rc = unsafe { libc::sem_timedwait(self.raw(), &ts) };
        if rc == 0 {
            return Ok(true);
        }
        match Errno::last() {
            Errno::ETIMEDOUT => Ok(false),
            Errno::EINTR => Err(SemError::Interrupted),
            errno => Err(SemError::Os(errno)),
        }
    }

    /// Increment, waking one waiter
    pub fn post(&self) -> SemResult<()> {
        // SAFETY: see wait()
        let rc = unsafe { libc::sem_post(self.raw()) };
        if rc == -1 { Err(SemError::last()) } else { Ok(()) }
    }

    /// Current value (a snapshot; may be stale immediately)
    pub fn value(&self) -> SemResult<i32> {
        let mut value: libc::c_int = 0;
        // SAFETY: see wait()
        let rc = unsafe { libc::sem_getvalue(self.raw(), &mut value) };
        if rc == -1 { Err(SemError::last()) } else { Ok(value) }
    }

    /// Destroy in place; no process may be waiting
    pub fn destroy(&self) -> SemResult<()> {
        // SAFETY: see wait()
        let rc = unsafe { libc::sem_destroy(self.raw()) };
        if rc == -1 { Err(SemError::last()) } else { Ok(()) }
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore").field("value", &self.value().ok()).finish()
    }
}
