//! FIFO of files waiting for optimization.
//!
//! A dispatched entry is counted as active before it leaves the pending list,
//! under the same lock. Reading `pending()` and then `active()` can therefore
//! never miss an entry that is between the two.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct WorkQueue {
    pending: Mutex<VecDeque<PathBuf>>,
    active: AtomicUsize,
    enqueued: AtomicUsize,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, path: PathBuf) {
        let mut pending = self.lock();
        pending.push_back(path);
        self.enqueued.fetch_add(1, Ordering::SeqCst);
    }

    /// Takes the oldest entry and marks it active.
    pub fn dispatch(&self) -> Option<PathBuf> {
        let mut pending = self.lock();
        if pending.is_empty() {
            return None;
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        pending.pop_front()
    }

    /// Marks one dispatched entry as finished.
    pub fn finish(&self) {
        // Saturating: a stray finish must not wrap the counter.
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Total entries ever pushed.
    pub fn enqueued(&self) -> usize {
        self.enqueued.load(Ordering::SeqCst)
    }

    /// Nothing pending and nothing running, checked atomically.
    pub fn is_idle(&self) -> bool {
        let pending = self.lock();
        pending.is_empty() && self.active.load(Ordering::SeqCst) == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<PathBuf>> {
        // A poisoned queue still holds valid paths.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::new();
        queue.push(PathBuf::from("1.png"));
        queue.push(PathBuf::from("2.png"));
        queue.push(PathBuf::from("3.png"));

        assert_eq!(queue.dispatch(), Some(PathBuf::from("1.png")));
        assert_eq!(queue.dispatch(), Some(PathBuf::from("2.png")));
        assert_eq!(queue.dispatch(), Some(PathBuf::from("3.png")));
        assert_eq!(queue.dispatch(), None);
        assert_eq!(queue.enqueued(), 3);
    }

    #[test]
    fn test_dispatched_entry_counts_as_active() {
        let queue = WorkQueue::new();
        queue.push(PathBuf::from("a.png"));
        assert!(!queue.is_idle());

        queue.dispatch();
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.active(), 1);
        assert!(!queue.is_idle());

        queue.finish();
        assert_eq!(queue.active(), 0);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_finish_saturates() {
        let queue = WorkQueue::new();
        queue.finish();
        assert_eq!(queue.active(), 0);
    }
}
