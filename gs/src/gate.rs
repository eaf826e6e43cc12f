//! Shared reader/writer gate
//!
//! [`RwGate`] lives inside the synchronization region and serializes access
//! to the world region across processes.
//!
//! # Protocol
//!
//! - **Read section**: pass through the turnstile, then increment the reader
//!   count under the count mutex. The reader that moves the count 0 → 1 takes
//!   the writer mutex on behalf of all readers; the one that moves it back to
//!   0 releases it. Any number of readers overlap.
//! - **Write section**: take the turnstile, then the writer mutex, and hold
//!   both until the section ends.
//!
//! # Fairness contract
//!
//! Writers queue on the turnstile in arrival order. Because readers also
//! pass through the turnstile, a writer waiting there stops new readers from
//! entering; it only waits for the readers already inside to leave. Nothing
//! beyond arrival-order queuing is promised between writers.
//!
//! # Signals
//!
//! Entering either section returns [`SemError::Interrupted`] when a signal
//! handler runs during a blocking wait. Anything taken before the
//! interruption is given back, so the gate is left as it was found.
//! Leaving a section never gives up on EINTR.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::warn;

use crate::error::{SemError, SemResult};
use crate::semaphore::Semaphore;

/// Turnstile-gated readers/writer lock placed in shared memory
#[repr(C)]
#[derive(Debug)]
pub struct RwGate {
    turnstile: Semaphore,
    writer: Semaphore,
    count_mutex: Semaphore,
    /// Only touched while `count_mutex` is held
    readers: AtomicU32,
}

impl RwGate {
    /// Initialise all primitives in place; creator only
    pub fn init(&self) -> SemResult<()> {
        self.turnstile.init(1)?;
        self.writer.init(1)?;
        self.count_mutex.init(1)?;
        self.readers.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Enter a read section
    pub fn read(&self) -> SemResult<ReadSection<'_>> {
        self.turnstile.wait()?;
        self.turnstile.post()?;

        self.count_mutex.wait()?;
        let readers = self.readers.load(Ordering::Relaxed) + 1;
        self.readers.store(readers, Ordering::Relaxed);
        let entered = if readers == 1 { self.writer.wait() } else { Ok(()) };
        if entered.is_err() {
            self.readers.store(readers - 1, Ordering::Relaxed);
        }
        self.count_mutex.post()?;
        entered?;

        Ok(ReadSection { gate: self })
    }

    /// Enter the exclusive write section
    pub fn write(&self) -> SemResult<WriteSection<'_>> {
        self.turnstile.wait()?;
        if let Err(e) = self.writer.wait() {
            self.turnstile.post()?;
            return Err(e);
        }
        Ok(WriteSection { gate: self })
    }

    /// Enter the write section only if nobody is inside or queued
    ///
    /// Never blocks. `Ok(None)` when the gate is busy.
    pub fn try_write(&self) -> SemResult<Option<WriteSection<'_>>> {
        if !retry_on_eintr(|| self.turnstile.try_wait())? {
            return Ok(None);
        }
        match retry_on_eintr(|| self.writer.try_wait()) {
            Ok(true) => Ok(Some(WriteSection { gate: self })),
            other => {
                self.turnstile.post()?;
                other.map(|_| None)
            }
        }
    }

    /// Readers currently inside a read section
    pub fn reader_count(&self) -> u32 {
        self.readers.load(Ordering::Relaxed)
    }

    /// Whether the writer mutex is currently taken (by readers or a writer)
    pub fn is_held(&self) -> bool {
        self.writer.value().map(|v| v == 0).unwrap_or(false)
    }

    /// Destroy all primitives in place; creator only, nobody inside
    pub fn destroy(&self) -> SemResult<()> {
        self.turnstile.destroy()?;
        self.writer.destroy()?;
        self.count_mutex.destroy()
    }

    fn leave_read(&self) -> SemResult<()> {
        self.count_mutex.wait_uninterrupted()?;
        let readers = self.readers.load(Ordering::Relaxed).saturating_sub(1);
        self.readers.store(readers, Ordering::Relaxed);
        let released = if readers == 0 { self.writer.post() } else { Ok(()) };
        self.count_mutex.post()?;
        released
    }

    fn leave_write(&self) -> SemResult<()> {
        self.writer.post()?;
        self.turnstile.post()
    }
}

fn retry_on_eintr(op: impl Fn() -> SemResult<bool>) -> SemResult<bool> {
    loop {
        match op() {
            Err(SemError::Interrupted) => continue,
            other => return other,
        }
    }
}

/// Proof of being inside a read section; leaving happens on drop
#[derive(Debug)]
pub struct ReadSection<'a> {
    gate: &'a RwGate,
}

impl Drop for ReadSection<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.gate.leave_read() {
            warn!(error = %e, "Failed to leave read section");
        }
    }
}

/// Proof of holding the exclusive write section; released on drop
#[derive(Debug)]
pub struct WriteSection<'a> {
    gate: &'a RwGate,
}

impl Drop for WriteSection<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.gate.leave_write() {
            warn!(error = %e, "Failed to leave write section");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::SharedRegion;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    struct Fixture {
        region: SharedRegion,
    }

    impl Fixture {
        fn new() -> Arc<Self> {
            let region = SharedRegion::anonymous(std::mem::size_of::<RwGate>()).unwrap();
            let fixture = Self { region };
            fixture.gate().init().unwrap();
            Arc::new(fixture)
        }

        fn gate(&self) -> &RwGate {
            unsafe { &*(self.region.as_ptr() as *const RwGate) }
        }
    }

    #[test]
    fn test_reader_count_balanced_with_writer_mutex() {
        let fx = Fixture::new();
        let gate = fx.gate();
        assert_eq!(gate.reader_count(), 0);
        assert!(!gate.is_held());

        let mut sections = Vec::new();
        for expected in 1..=4 {
            sections.push(gate.read().unwrap());
            assert_eq!(gate.reader_count(), expected);
            assert!(gate.is_held());
        }

        while let Some(section) = sections.pop() {
            drop(section);
            assert_eq!(gate.is_held(), gate.reader_count() > 0);
        }
        assert_eq!(gate.reader_count(), 0);
        assert!(!gate.is_held());
    }

    #[test]
    fn test_write_section_holds_and_releases() {
        let fx = Fixture::new();
        let gate = fx.gate();
        {
            let _w = gate.write().unwrap();
            assert!(gate.is_held());
            assert_eq!(gate.reader_count(), 0);
        }
        assert!(!gate.is_held());
        let _r = gate.read().unwrap();
        assert_eq!(gate.reader_count(), 1);
    }

    #[test]
    fn test_reader_cannot_complete_while_writer_holds() {
        let fx = Fixture::new();
        let writer_done = Arc::new(AtomicBool::new(false));

        let section = fx.gate().write().unwrap();

        let fx2 = Arc::clone(&fx);
        let done = Arc::clone(&writer_done);
        let reader = thread::spawn(move || {
            let _r = fx2.gate().read().unwrap();
            // The writer must have left before any reader gets in
            assert!(done.load(Ordering::SeqCst));
        });

        thread::sleep(Duration::from_millis(50));
        writer_done.store(true, Ordering::SeqCst);
        drop(section);
        reader.join().unwrap();
    }

    #[test]
    fn test_writer_waits_for_readers_then_blocks_newcomers() {
        let fx = Fixture::new();
        let first = fx.gate().read().unwrap();

        let writing = Arc::new(AtomicBool::new(false));
        let fx_w = Arc::clone(&fx);
        let writing_w = Arc::clone(&writing);
        let writer = thread::spawn(move || {
            let _w = fx_w.gate().write().unwrap();
            writing_w.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            writing_w.store(false, Ordering::SeqCst);
        });

        // Let the writer queue on the turnstile
        thread::sleep(Duration::from_millis(30));
        assert!(!writing.load(Ordering::SeqCst));

        let fx_r = Arc::clone(&fx);
        let writing_r = Arc::clone(&writing);
        let late_reader = thread::spawn(move || {
            let _r = fx_r.gate().read().unwrap();
            assert!(!writing_r.load(Ordering::SeqCst));
        });

        thread::sleep(Duration::from_millis(30));
        drop(first);
        writer.join().unwrap();
        late_reader.join().unwrap();
        assert_eq!(fx.gate().reader_count(), 0);
    }

    extern "C" fn ignore_signal(_signal: std::ffi::c_int) {}

    #[test]
    fn test_blocked_writer_returns_interrupted_and_gate_recovers() {
        use nix::sys::pthread::{pthread_kill, pthread_self};
        use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
        use std::sync::mpsc;

        let action = SigAction::new(SigHandler::Handler(ignore_signal), SaFlags::empty(), SigSet::empty());
        unsafe { sigaction(Signal::SIGUSR1, &action) }.unwrap();

        let fx = Fixture::new();
        // A reader that never leaves, like a player killed inside its section
        let stuck = fx.gate().read().unwrap();

        let (tid_tx, tid_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let fx_w = Arc::clone(&fx);
        let writer = thread::spawn(move || {
            tid_tx.send(pthread_self()).unwrap();
            let result = fx_w.gate().write().map(drop);
            done_tx.send(result).unwrap();
        });

        let tid = tid_rx.recv().unwrap();
        let mut result = None;
        for _ in 0..100 {
            thread::sleep(Duration::from_millis(10));
            pthread_kill(tid, Signal::SIGUSR1).unwrap();
            if let Ok(r) = done_rx.recv_timeout(Duration::from_millis(10)) {
                result = Some(r);
                break;
            }
        }
        writer.join().unwrap();
        assert_eq!(result, Some(Err(SemError::Interrupted)));

        // The interrupted writer gave the turnstile back
        let late = fx.gate().read().unwrap();
        assert_eq!(fx.gate().reader_count(), 2);
        drop(late);
        drop(stuck);
        assert!(!fx.gate().is_held());
        drop(fx.gate().write().unwrap());
    }

    #[test]
    fn test_try_write_never_blocks() {
        let fx = Fixture::new();
        let gate = fx.gate();
        {
            let _r = gate.read().unwrap();
            assert!(gate.try_write().unwrap().is_none());
        }
        {
            let _w = gate.try_write().unwrap().expect("free gate");
            assert!(gate.try_write().unwrap().is_none());
        }
        assert!(!gate.is_held());
        let _r = gate.read().unwrap();
        assert_eq!(gate.reader_count(), 1);
    }

    #[test]
    fn test_writers_are_mutually_exclusive() {
        let fx = Fixture::new();
        let inside = Arc::new(AtomicU32::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let fx = Arc::clone(&fx);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let _w = fx.gate().write().unwrap();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
