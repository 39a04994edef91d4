//! Cooperative cancellation via a process-wide atomic flag

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// How often [`wait_or_abandon`] re-checks the flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Global shutdown flag, set by the SIGTERM/SIGINT handler
pub fn shutdown_flag() -> &'static AtomicBool {
    static FLAG: AtomicBool = AtomicBool::new(false);
    &FLAG
}

/// Check if shutdown was requested
pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// Join `handle` unless shutdown is requested first.
///
/// Returns `None` when the caller should abandon the thread: in-flight work is
/// dropped, not drained. Everything the pipeline persists goes through an
/// atomic rename, so abandoning never leaves a half-written file behind.
pub fn wait_or_abandon<T>(handle: JoinHandle<T>) -> Option<std::thread::Result<T>> {
    loop {
        if handle.is_finished() {
            return Some(handle.join());
        }
        if is_shutdown_requested() {
            return None;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_finished_thread() {
        let handle = std::thread::spawn(|| 7);
        let result = wait_or_abandon(handle).expect("not abandoned");
        assert_eq!(result.unwrap(), 7);
    }
}
