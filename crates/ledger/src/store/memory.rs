//! In-memory store.

use super::{ReadView, Store, WriteBatch};
use crate::LedgerResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

type Data = BTreeMap<Vec<u8>, Vec<u8>>;

/// Store backed by a `BTreeMap`. Read views share the map until the next
/// write, which copies it.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<Arc<Data>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.len())
            .finish()
    }
}

/// Frozen view over one version of the map.
struct FrozenView {
    data: Arc<Data>,
}

fn scan(data: &Data, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    data.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

impl ReadView for FrozenView {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.get(key).cloned()
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        scan(&self.data, prefix)
    }
}

impl Store for MemoryStore {
    fn read_view(&self) -> Arc<dyn ReadView> {
        Arc::new(FrozenView {
            data: self.data.read().clone(),
        })
    }

    fn write_batch(&self, batch: WriteBatch) -> LedgerResult<()> {
        let mut guard = self.data.write();
        let data = Arc::make_mut(&mut guard);
        for (key, value) in batch.into_changes() {
            match value {
                Some(value) => {
                    data.insert(key, value);
                }
                None => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_view_is_frozen() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(vec![1, 1], vec![10]);
        store.write_batch(batch).unwrap();

        let view = store.read_view();
        let mut batch = WriteBatch::new();
        batch.put(vec![1, 2], vec![20]);
        batch.delete(vec![1, 1]);
        store.write_batch(batch).unwrap();

        assert_eq!(view.get(&[1, 1]), Some(vec![10]));
        assert_eq!(view.get(&[1, 2]), None);
        let latest = store.read_view();
        assert_eq!(latest.get(&[1, 1]), None);
        assert_eq!(latest.get(&[1, 2]), Some(vec![20]));
    }

    #[test]
    fn test_scan_prefix() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(vec![1, 1], vec![1]);
        batch.put(vec![2, 1], vec![2]);
        batch.put(vec![2, 2], vec![3]);
        batch.put(vec![3], vec![4]);
        store.write_batch(batch).unwrap();

        let entries = store.read_view().scan_prefix(&[2]);
        assert_eq!(
            entries,
            vec![(vec![2, 1], vec![2]), (vec![2, 2], vec![3])]
        );
    }
}
