//! Lock-free work queue for distributing papers across parallel workers

use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free work queue distributing items to workers.
///
/// Workers call [`next()`](WorkQueue::next) to atomically claim the next item.
/// Items are claimed in submission order; completion order is up to the workers.
pub struct WorkQueue<S> {
    items: Vec<S>,
    cursor: AtomicUsize,
}

impl<S> WorkQueue<S> {
    /// Create queue from all items (no filtering)
    pub fn new(items: Vec<S>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Get next item to process (lock-free)
    pub fn next(&self) -> Option<&S> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i)
    }

    /// Items not yet claimed by any worker
    pub fn remaining(&self) -> usize {
        self.items
            .len()
            .saturating_sub(self.cursor.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[test]
    fn new_returns_all() {
        let q = WorkQueue::new(vec![1, 2, 3]);
        assert_eq!(q.remaining(), 3);
        assert_eq!(q.next(), Some(&1));
        assert_eq!(q.next(), Some(&2));
        assert_eq!(q.remaining(), 1);
        assert_eq!(q.next(), Some(&3));
        assert_eq!(q.next(), None);
        assert_eq!(q.remaining(), 0);
    }

    #[test]
    fn concurrent_claims_are_unique() {
        let q = WorkQueue::new((0..1000).collect::<Vec<_>>());
        let seen = Mutex::new(HashSet::new());
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    while let Some(i) = q.next() {
                        assert!(seen.lock().unwrap().insert(*i));
                    }
                });
            }
        });
        assert_eq!(seen.into_inner().unwrap().len(), 1000);
    }
}
