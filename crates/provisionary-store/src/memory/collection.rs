// ── Generic keyed entity collection ──
//
// Concurrent storage with O(1) lookups. Every mutation bumps a revision
// counter shared by all collections of one store, so a single watch
// receiver observes any write.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// A concurrent collection for a single entity type.
///
/// Uses `DashMap` for lookups and a shared `watch` channel as the change
/// signal. Reads clone the stored value; writes never hold a shard lock
/// across an await point.
pub(crate) struct EntityCollection<T: Clone + Send + Sync + 'static> {
    /// Primary storage: composite key (`"{org}:{id}"`) -> entity.
    by_key: DashMap<String, T>,

    /// Store-wide revision, bumped on every mutation.
    revision: Arc<watch::Sender<u64>>,
}

impl<T: Clone + Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new(revision: Arc<watch::Sender<u64>>) -> Self {
        Self {
            by_key: DashMap::new(),
            revision,
        }
    }

    /// Insert or replace an entity. Returns the previous value.
    pub(crate) fn insert(&self, key: String, entity: T) -> Option<T> {
        let previous = self.by_key.insert(key, entity);
        self.bump_revision();
        previous
    }

    /// Remove an entity by key. Returns the removed entity if it existed.
    pub(crate) fn remove(&self, key: &str) -> Option<T> {
        let removed = self.by_key.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.bump_revision();
        }
        removed
    }

    pub(crate) fn get(&self, key: &str) -> Option<T> {
        self.by_key.get(key).map(|r| r.value().clone())
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// First entity matching `pred`, in no particular order.
    pub(crate) fn find(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        self.by_key
            .iter()
            .find(|r| pred(r.value()))
            .map(|r| r.value().clone())
    }

    /// All entities matching `pred`.
    pub(crate) fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.by_key
            .iter()
            .filter(|r| pred(r.value()))
            .map(|r| r.value().clone())
            .collect()
    }

    /// Snapshot of every entity.
    pub(crate) fn values(&self) -> Vec<T> {
        self.filter(|_| true)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn bump_revision(&self) {
        // `send_modify` updates unconditionally, even with zero receivers.
        self.revision.send_modify(|v| *v += 1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn collection() -> (EntityCollection<String>, watch::Receiver<u64>) {
        let (tx, rx) = watch::channel(0u64);
        (EntityCollection::new(Arc::new(tx)), rx)
    }

    #[test]
    fn insert_returns_previous_value() {
        let (col, _rx) = collection();
        assert!(col.insert("1:a".into(), "x".into()).is_none());
        assert_eq!(col.insert("1:a".into(), "y".into()).as_deref(), Some("x"));
        assert_eq!(col.get("1:a").as_deref(), Some("y"));
    }

    #[test]
    fn every_mutation_bumps_revision() {
        let (col, rx) = collection();
        col.insert("1:a".into(), "x".into());
        col.insert("1:b".into(), "y".into());
        col.remove("1:a");
        assert_eq!(*rx.borrow(), 3);
    }

    #[test]
    fn removing_missing_key_is_not_a_mutation() {
        let (col, rx) = collection();
        assert!(col.remove("nope").is_none());
        assert_eq!(*rx.borrow(), 0);
    }

    #[test]
    fn filter_and_find() {
        let (col, _rx) = collection();
        col.insert("1:a".into(), "apple".into());
        col.insert("1:b".into(), "banana".into());
        col.insert("2:c".into(), "avocado".into());

        let mut starts_a = col.filter(|v| v.starts_with('a'));
        starts_a.sort();
        assert_eq!(starts_a, vec!["apple".to_string(), "avocado".to_string()]);
        assert_eq!(col.find(|v| v == "banana").as_deref(), Some("banana"));
        assert_eq!(col.len(), 3);
        assert!(col.contains("2:c"));
    }
}
