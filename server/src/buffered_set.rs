//! A one-writer, many-reader set: the writer mutates a private buffer
//! and publishes it atomically with `commit`; readers clone the last
//! committed snapshot without ever blocking the writer.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/// The writer half. Mutations stay invisible until `commit`.
#[derive(Debug)]
pub struct BufferedHashSet<T> {
    buffer: HashSet<T>,
    committed: Arc<Mutex<Arc<HashSet<T>>>>,
}

/// A handle that reads the last committed snapshot; cheap to clone and
/// safe on any thread.
#[derive(Debug, Clone)]
pub struct SnapshotReader<T> {
    committed: Arc<Mutex<Arc<HashSet<T>>>>,
}

impl<T: Eq + Hash + Clone> BufferedHashSet<T> {
    pub fn new() -> Self {
        Self {
            buffer: HashSet::new(),
            committed: Arc::new(Mutex::new(Arc::new(HashSet::new()))),
        }
    }

    pub fn insert(&mut self, value: T) -> bool {
        self.buffer.insert(value)
    }

    pub fn remove(&mut self, value: &T) -> bool {
        self.buffer.remove(value)
    }

    pub fn contains_pending(&self, value: &T) -> bool {
        self.buffer.contains(value)
    }

    /// Publishes the current buffer as the readable snapshot.
    pub fn commit(&mut self) {
        *self.committed.lock() = Arc::new(self.buffer.clone());
    }

    pub fn snapshot(&self) -> Arc<HashSet<T>> {
        self.committed.lock().clone()
    }

    pub fn reader(&self) -> SnapshotReader<T> {
        SnapshotReader {
            committed: Arc::clone(&self.committed),
        }
    }
}

impl<T: Eq + Hash + Clone> Default for BufferedHashSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SnapshotReader<T> {
    pub fn snapshot(&self) -> Arc<HashSet<T>> {
        self.committed.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::BufferedHashSet;

    #[test]
    fn mutations_are_invisible_until_commit() {
        let mut set = BufferedHashSet::new();
        let reader = set.reader();

        set.insert(1u64);
        set.insert(2);
        assert!(reader.snapshot().is_empty());

        set.commit();
        assert_eq!(reader.snapshot().len(), 2);

        set.remove(&1);
        assert!(reader.snapshot().contains(&1));
        set.commit();
        assert!(!reader.snapshot().contains(&1));
    }

    #[test]
    fn snapshots_are_stable_across_later_commits() {
        let mut set = BufferedHashSet::new();
        set.insert(1u64);
        set.commit();

        let snapshot = set.snapshot();
        set.insert(2);
        set.commit();

        // The old snapshot still sees the old world.
        assert_eq!(snapshot.len(), 1);
        assert_eq!(set.snapshot().len(), 2);
    }
}
