//! Termination signal handling
//!
//! SIGINT and SIGTERM only raise a flag. The handlers are installed without
//! SA_RESTART so a blocking semaphore wait or poll returns EINTR, and the
//! caller leaves through its normal cleanup path.

use std::ffi::c_int;
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::{Context, Result};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use tracing::debug;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_signal: c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM to the shutdown flag
pub fn install_handlers() -> Result<()> {
    debug!("install_handlers: called");
    let action = SigAction::new(SigHandler::Handler(on_signal), SaFlags::empty(), SigSet::empty());
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic
        unsafe { sigaction(signal, &action) }.context(format!("Failed to install {} handler", signal))?;
    }
    Ok(())
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}
