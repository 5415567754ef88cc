use std::sync::{Mutex, MutexGuard};

/// Lock a std mutex, taking the data back if a previous holder panicked.
pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("mutex poisoned in {context}; recovering");
            poisoned.into_inner()
        }
    }
}
