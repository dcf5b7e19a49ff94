//! One-shot completion signal
//!
//! The first `complete` wins; waiters on any thread see that value.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct Completion<T> {
    value: Mutex<Option<T>>,
    cond: Condvar,
}

impl<T: Clone> Completion<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Resolve the signal; returns false if it was already resolved
    pub fn complete(&self, value: T) -> bool {
        let mut slot = self.value.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        self.cond.notify_all();
        true
    }

    pub fn is_complete(&self) -> bool {
        self.value.lock().is_some()
    }

    pub fn get(&self) -> Option<T> {
        self.value.lock().clone()
    }

    /// Block until resolved
    pub fn wait(&self) -> T {
        let mut slot = self.value.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            self.cond.wait(&mut slot);
        }
    }

    /// Block until resolved or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.value.lock();
        while slot.is_none() {
            if self.cond.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.clone()
    }
}

impl<T: Clone> Default for Completion<T> {
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
    fn test_first_complete_wins() {
        let done = Completion::new();
        assert!(done.complete(true));
        assert!(!done.complete(false));
        assert_eq!(done.get(), Some(true));
    }

    #[test]
    fn test_wait_across_threads() {
        let done = Arc::new(Completion::new());
        let d = Arc::clone(&done);
        let handle = thread::spawn(move || d.wait());
        thread::sleep(Duration::from_millis(10));
        done.complete(7u32);
        assert_eq!(handle.join().unwrap(), 7);
    }

    #[test]
    fn test_wait_timeout_expires() {
        let done: Completion<bool> = Completion::new();
        let start = Instant::now();
        assert_eq!(done.wait_timeout(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(!done.is_complete());
    }
}
