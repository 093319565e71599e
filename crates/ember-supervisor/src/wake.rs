//! Single-slot wake channel
//!
//! A worker thread parks on its `WakeSlot` while the kernel services its
//! trap. The driver fills the slot exactly once per trap; the worker
//! takes the value and clears the slot.
//!
//! The waiter checks the slot only while holding the lock and sleeps on
//! the condition variable, which releases the lock atomically, so a
//! `post` that lands between the check and the sleep is never lost.

use std::sync::{Condvar, Mutex};

/// One value handed from the driver to a waiting worker.
pub struct WakeSlot<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T> WakeSlot<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Fill the slot and wake the waiter.
    ///
    /// A value that was never taken is replaced.
    pub fn post(&self, value: T) {
        let mut slot = match self.value.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(value);
        self.ready.notify_one();
    }

    /// Block until the slot holds a value, then take it.
    pub fn wait(&self) -> T {
        let mut slot = match self.value.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            if let Some(value) = slot.take() {
                return value;
            }
            slot = match self.ready.wait(slot) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Take the value if one is there.
    pub fn try_take(&self) -> Option<T> {
        match self.value.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl<T> Default for WakeSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_post_before_wait() {
        let slot = WakeSlot::new();
        slot.post(7);
        assert_eq!(slot.wait(), 7);
        assert_eq!(slot.try_take(), None);
    }

    #[test]
    fn test_wait_across_threads() {
        let slot = Arc::new(WakeSlot::new());
        let waiter = {
            let slot = slot.clone();
            thread::spawn(move || slot.wait())
        };
        slot.post("done");
        assert_eq!(waiter.join().unwrap(), "done");
    }

    #[test]
    fn test_second_post_replaces_untaken_value() {
        let slot = WakeSlot::new();
        slot.post(1);
        slot.post(2);
        assert_eq!(slot.try_take(), Some(2));
        assert_eq!(slot.try_take(), None);
    }
}
