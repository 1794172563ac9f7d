//! A value guarded by an exclusive lock.

use parking_lot::Mutex;

/// A mutable cell shared across threads.
///
/// Access is limited to a snapshot read and a read-modify-write, so callers
/// never hold a guard across other work.
#[derive(Debug, Default)]
pub struct Atomic<T> {
    value: Mutex<T>,
}

impl<T> Atomic<T> {
    /// Create a new cell.
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    /// Apply `transform` under the lock and return the previous value.
    pub fn mutate<F>(&self, transform: F) -> T
    where
        T: Clone,
        F: FnOnce(&mut T),
    {
        let mut guard = self.value.lock();
        let previous = guard.clone();
        transform(&mut guard);
        previous
    }

    /// Replace the value, returning the previous one.
    pub fn swap(&self, value: T) -> T {
        std::mem::replace(&mut *self.value.lock(), value)
    }
}

impl<T: Clone> Atomic<T> {
    /// Snapshot of the current value.
    pub fn value(&self) -> T {
        self.value.lock().clone()
    }
}

impl<T: Default> Atomic<T> {
    /// Read the value and reset it to its default in one step.
    pub fn take(&self) -> T {
        std::mem::take(&mut *self.value.lock())
    }
}
