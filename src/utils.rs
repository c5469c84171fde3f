use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks the mutex, recovering the guard if another thread panicked while holding it.
/// Every critical section in this crate leaves its data consistent before anything can panic.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
