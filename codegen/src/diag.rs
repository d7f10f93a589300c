//! Diagnostics plumbing.
//!
//! Verifier findings are ordinary warnings: they are collected into `VerifierErrors` and logged.
//! Fatal logic errors go through a panic hook that the host may replace, for example to route
//! the message into its own crash reporting before aborting.

use std::sync::Mutex;

/// A replaceable hook invoked on fatal logic errors, with a formatted message.
pub type PanicHook = fn(&str) -> !;

static PANIC_HOOK: Mutex<Option<PanicHook>> = Mutex::new(None);

/// Replace the hook invoked on fatal logic errors. Returns the previous hook, if any.
pub fn set_panic_hook(hook: PanicHook) -> Option<PanicHook> {
    let mut slot = PANIC_HOOK.lock().unwrap();
    slot.replace(hook)
}

/// Report a fatal logic error and abort through the installed hook, or `panic!` if none is set.
pub(crate) fn fatal(msg: &str) -> ! {
    let hook = *PANIC_HOOK.lock().unwrap();
    match hook {
        Some(hook) => hook(msg),
        None => panic!("{}", msg),
    }
}
