//! SIGINT handling.
//!
//! An interrupt never kills the kernel. The handler only raises a flag; the
//! interpreter polls it and abandons the running task, and the dispatcher
//! swallows the resulting [`EvalError::Interrupted`].

use std::ffi::c_int;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::evaluator::{EvalError, EvalResult};

/// Flag shared with the signal handler. Initialized before the handler is installed.
static PROCESS_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// A pending-interrupt flag.
///
/// [`Interrupt::process`] is the flag the SIGINT handler raises; other
/// instances are detached and only raised through [`Interrupt::request`].
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// A detached flag, not connected to any signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide flag raised by SIGINT.
    pub fn process() -> Self {
        let flag = PROCESS_FLAG.get_or_init(|| Arc::new(AtomicBool::new(false)));
        Self { flag: flag.clone() }
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Fail with [`EvalError::Interrupted`] if an interrupt is pending.
    pub fn check(&self) -> EvalResult<()> {
        if self.is_requested() {
            Err(EvalError::Interrupted)
        } else {
            Ok(())
        }
    }
}

extern "C" fn on_sigint(_signal: c_int) {
    // Only an atomic store: async-signal-safe.
    if let Some(flag) = PROCESS_FLAG.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

/// Route SIGINT to [`Interrupt::process`].
///
/// `SA_RESTART` keeps a blocking read on the input channel alive across the signal.
pub fn install_interrupt_handler() -> nix::Result<()> {
    let _ = Interrupt::process();
    let action = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handler only performs an atomic store on an already-initialized flag.
    unsafe { sigaction(Signal::SIGINT, &action) }?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_flags_are_independent() {
        let a = Interrupt::new();
        let b = Interrupt::new();
        a.request();
        assert!(a.is_requested());
        assert!(!b.is_requested());
    }

    #[test]
    fn clones_share_the_flag() {
        let a = Interrupt::new();
        let b = a.clone();
        b.request();
        assert_eq!(a.check(), Err(EvalError::Interrupted));
        a.clear();
        assert_eq!(b.check(), Ok(()));
    }
}
