//! Cooperative cancellation.
//!
//! An [`InterruptLatch`] is a cloneable token that starts unset and, once set,
//! stays set. Long-running loops poll it at safe points (between external
//! process invocations) via [`InterruptLatch::interrupt_if_needed`] and stop
//! starting new work once it is set; nothing is torn down mid-operation.
//!
//! [`override_sigint`] registers one latch with a SIGINT handler for the whole
//! process. The first SIGINT sets the latch, prints a notice to stderr and
//! restores the previous disposition, so a second SIGINT terminates the
//! process the usual way.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterruptError {
    #[error("Interrupted")]
    Interrupted,
}

impl InterruptError {
    pub fn kind(&self) -> &'static str {
        "interrupted"
    }
}

/// One-way cancellation flag shared by clones.
#[derive(Debug, Clone, Default)]
pub struct InterruptLatch {
    flag: Arc<AtomicBool>,
    reported: Arc<AtomicBool>,
}

impl InterruptLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the latch. There is no way to clear it again.
    ///
    /// Only performs an atomic store, so it is safe to call from a signal
    /// handler.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Non-blocking, side-effect-free read of the latch.
    pub fn interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Return `Err(Interrupted)` if the latch is set, `Ok(())` otherwise.
    ///
    /// Call this at safe points inside long loops.
    pub fn interrupt_if_needed(&self) -> Result<(), InterruptError> {
        if self.report_if_interrupted() {
            return Err(InterruptError::Interrupted);
        }
        Ok(())
    }

    /// Like [`interrupted`](Self::interrupted), but also writes the interrupt
    /// to the structured log the first time any clone sees the latch set.
    ///
    /// For callers that observe an interrupted run without stopping on it.
    pub fn report_if_interrupted(&self) -> bool {
        if !self.interrupted() {
            return false;
        }
        if !self.reported.swap(true, Ordering::SeqCst) {
            tracing::warn!("Interrupt received; stopping at a safe point");
        }
        true
    }
}

static OVERRIDE_CALLED: AtomicBool = AtomicBool::new(false);
static PROCESS_LATCH: OnceLock<InterruptLatch> = OnceLock::new();
static PREVIOUS_DISPOSITION: AtomicUsize = AtomicUsize::new(libc::SIG_DFL);

extern "C" fn handle_sigint(_sig: libc::c_int) {
    // Only async-signal-safe calls here: write(2), an atomic store, signal(2).
    let msg = b"\nInterrupt received; finishing the current step. Interrupt again to force exit.\n";
    unsafe {
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
    }
    if let Some(latch) = PROCESS_LATCH.get() {
        latch.trigger();
    }
    let previous = PREVIOUS_DISPOSITION.load(Ordering::SeqCst);
    unsafe {
        libc::signal(libc::SIGINT, previous);
    }
}

/// Install the process-wide SIGINT handler and register `latch` with it.
///
/// # Panics
///
/// Panics if called more than once per process; installing the handler twice
/// is a programming error.
pub fn override_sigint(latch: &InterruptLatch) {
    assert!(
        !OVERRIDE_CALLED.swap(true, Ordering::SeqCst),
        "override_sigint must only be called once per process"
    );
    let _ = PROCESS_LATCH.set(latch.clone());

    let previous = unsafe { libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t) };
    if previous == libc::SIG_ERR {
        tracing::warn!("Failed to install SIGINT handler; interrupts will terminate immediately");
        return;
    }
    PREVIOUS_DISPOSITION.store(previous, Ordering::SeqCst);
    tracing::debug!("Installed SIGINT handler");
}

/// The latch registered by [`override_sigint`], if any.
pub fn process_latch() -> Option<&'static InterruptLatch> {
    PROCESS_LATCH.get()
}

/// Whether the process-wide latch has been set. `false` before
/// [`override_sigint`] has been called.
pub fn interrupted() -> bool {
    process_latch().is_some_and(InterruptLatch::interrupted)
}

/// Process-wide form of [`InterruptLatch::interrupt_if_needed`].
pub fn interrupt_if_needed() -> Result<(), InterruptError> {
    match process_latch() {
        Some(latch) => latch.interrupt_if_needed(),
        None => Ok(()),
    }
}
