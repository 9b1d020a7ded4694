//! Single-item handoff between the session task and the recognition worker

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Holds at most one pending item. A newer `put` replaces an item the
/// consumer has not taken yet, so the consumer always sees the freshest
/// frame and the producer never blocks.
#[derive(Debug)]
pub struct LatestSlot<T> {
    item: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            item: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Store `value`. Returns true if an unconsumed item was overwritten.
    pub fn put(&self, value: T) -> bool {
        let mut item = self.item.lock().unwrap_or_else(|p| p.into_inner());
        let replaced = item.replace(value).is_some();
        self.ready.notify_one();
        replaced
    }

    pub fn take(&self) -> Option<T> {
        self.item.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    /// Wait up to `timeout` for an item.
    pub fn wait_take(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut item = self.item.lock().unwrap_or_else(|p| p.into_inner());

        loop {
            if let Some(value) = item.take() {
                return Some(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            item = match self.ready.wait_timeout(item, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Wake a consumer blocked in `wait_take` without storing anything.
    pub fn notify(&self) {
        let _item = self.item.lock().unwrap_or_else(|p| p.into_inner());
        self.ready.notify_all();
    }
}

impl<T> Default for LatestSlot<T> {
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
    fn test_put_replaces_pending_item() {
        let slot = LatestSlot::new();
        assert!(!slot.put(1));
        assert!(slot.put(2));
        assert_eq!(slot.take(), Some(2));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn test_wait_take_times_out_empty() {
        let slot: LatestSlot<u32> = LatestSlot::new();
        assert_eq!(slot.wait_take(Duration::from_millis(20)), None);
    }

    #[test]
    fn test_wait_take_wakes_on_put() {
        let slot = Arc::new(LatestSlot::new());
        let consumer = slot.clone();
        let handle = thread::spawn(move || consumer.wait_take(Duration::from_secs(5)));

        thread::sleep(Duration::from_millis(20));
        slot.put("frame");

        assert_eq!(handle.join().unwrap(), Some("frame"));
    }
}
