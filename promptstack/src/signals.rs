//! Process signal handling.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag::register;

/// Registers SIGTERM and SIGINT handlers that set a shared flag.
///
/// The returned flag flips to `true` on the first signal. Poll it from the
/// command loop and cancel outstanding work when it is set.
///
/// # Errors
///
/// Returns the OS error if a handler cannot be installed.
pub fn register_shutdown() -> std::io::Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    register(SIGTERM, Arc::clone(&flag))?;
    register(SIGINT, Arc::clone(&flag))?;
    Ok(flag)
}
