use std::hash::Hash;

use dashmap::{DashMap, DashSet};

/// Two-level concurrent associative store: `run_id → {set of values}`.
/// The LabelStore, StatusStore, and the per-run engine index all share
/// this shape — they differ only in which values get inserted.
///
/// Outer lookups never contend across different `run_id`s (`DashMap`
/// shards internally); inserts for the same `run_id` and same value race
/// harmlessly because the inner collection is a set.
#[derive(Debug)]
pub struct TwoLevelSet<V: Eq + Hash + Clone> {
    inner: DashMap<i64, DashSet<V>>,
}

impl<V: Eq + Hash + Clone> Default for TwoLevelSet<V> {
    fn default() -> Self {
        Self { inner: DashMap::new() }
    }
}

impl<V: Eq + Hash + Clone> TwoLevelSet<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the inner set on first write for `run_id`, otherwise just
    /// inserts into the existing one.
    pub fn insert(&self, run_id: i64, value: V) {
        self.inner.entry(run_id).or_default().insert(value);
    }

    /// Snapshot of every value recorded for `run_id`. Empty if the run was
    /// never observed or was already deleted.
    pub fn values(&self, run_id: i64) -> Vec<V> {
        self.inner
            .get(&run_id)
            .map(|set| set.iter().map(|v| v.clone()).collect())
            .unwrap_or_default()
    }

    /// Removes the entire inner set for `run_id`, returning its values.
    pub fn delete(&self, run_id: i64) -> Vec<V> {
        self.inner
            .remove(&run_id)
            .map(|(_, set)| set.into_iter().collect())
            .unwrap_or_default()
    }

    /// Every `run_id` currently tracked — the metric GC iterates this.
    pub fn run_ids(&self) -> Vec<i64> {
        self.inner.iter().map(|entry| *entry.key()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// `run_id → {request labels observed}` (also reused, instantiated over
/// `String`, for the StatusStore).
pub type LabelStore = TwoLevelSet<String>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn insert_creates_inner_set_on_first_write() {
        let store: LabelStore = TwoLevelSet::new();
        store.insert(1, "GET /checkout".to_string());
        assert_eq!(store.values(1), vec!["GET /checkout".to_string()]);
    }

    #[test]
    fn duplicate_inserts_are_idempotent() {
        let store: LabelStore = TwoLevelSet::new();
        store.insert(1, "200".to_string());
        store.insert(1, "200".to_string());
        store.insert(1, "500".to_string());
        let mut values = store.values(1);
        values.sort();
        assert_eq!(values, vec!["200".to_string(), "500".to_string()]);
    }

    #[test]
    fn delete_removes_entire_inner_set() {
        let store: LabelStore = TwoLevelSet::new();
        store.insert(1, "a".to_string());
        store.insert(1, "b".to_string());
        let deleted = store.delete(1);
        assert_eq!(deleted.len(), 2);
        assert!(store.values(1).is_empty());
        assert!(!store.run_ids().contains(&1));
    }

    #[test]
    fn different_run_ids_are_independent() {
        let store: LabelStore = TwoLevelSet::new();
        store.insert(1, "a".to_string());
        store.insert(2, "b".to_string());
        store.delete(1);
        assert!(store.values(1).is_empty());
        assert_eq!(store.values(2), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_inserts_to_different_runs_all_land() {
        let store: Arc<LabelStore> = Arc::new(TwoLevelSet::new());
        let mut handles = Vec::new();
        for run_id in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert(run_id, format!("label-{run_id}"));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.run_ids().len(), 20);
    }
}
