//! In-memory storage backed by one ordered map per column.
//!
//! Used by tests and anywhere persistence is unnecessary. Behavior matches
//! the RocksDB backend so the two are interchangeable behind [`Storage`].

use crate::batch::OperationKind;
use crate::{Column, Storage, StorageResult, WriteBatch};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// An in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<Column, Table>>,
}

impl MemoryStore {
    /// Create an empty store with all columns present.
    pub fn new() -> Self {
        let mut tables = HashMap::new();
        for &column in Column::all() {
            tables.insert(column, Table::new());
        }
        Self {
            tables: RwLock::new(tables),
        }
    }
}

impl Storage for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let tables = self.tables.read();
        Ok(tables
            .get(&column)
            .and_then(|table| table.get(key))
            .cloned())
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let mut tables = self.tables.write();
        tables
            .entry(column)
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> StorageResult<()> {
        let mut tables = self.tables.write();
        if let Some(table) = tables.get_mut(&column) {
            table.remove(key);
        }
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        // One lock acquisition makes the batch atomic with respect to all
        // other readers and writers.
        let mut tables = self.tables.write();
        for op in batch.operations {
            let table = tables.entry(op.column).or_default();
            match op.kind {
                OperationKind::Put { value } => {
                    table.insert(op.key, value);
                }
                OperationKind::Delete => {
                    table.remove(&op.key);
                }
            }
        }
        Ok(())
    }

    fn iter(
        &self,
        column: Column,
    ) -> StorageResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>> {
        let tables = self.tables.read();
        let entries: Vec<(Vec<u8>, Vec<u8>)> = tables
            .get(&column)
            .map(|table| {
                table
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Box::new(entries.into_iter()))
    }

    fn count(&self, column: Column) -> StorageResult<u64> {
        let tables = self.tables.read();
        Ok(tables.get(&column).map(|t| t.len() as u64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let store = MemoryStore::new();
        store.put(Column::Metadata, b"key", b"value").unwrap();
        assert_eq!(
            store.get(Column::Metadata, b"key").unwrap(),
            Some(b"value".to_vec())
        );
        assert!(store.contains(Column::Metadata, b"key").unwrap());

        store.delete(Column::Metadata, b"key").unwrap();
        assert_eq!(store.get(Column::Metadata, b"key").unwrap(), None);
    }

    #[test]
    fn test_columns_are_isolated() {
        let store = MemoryStore::new();
        store.put(Column::Blocks, b"k", b"block").unwrap();
        assert_eq!(store.get(Column::Transactions, b"k").unwrap(), None);
    }

    #[test]
    fn test_batch_applies_all_operations() {
        let store = MemoryStore::new();
        store.put(Column::Utxos, b"spent", b"old").unwrap();

        let mut batch = WriteBatch::new();
        batch.put(Column::Utxos, b"created".to_vec(), b"new".to_vec());
        batch.delete(Column::Utxos, b"spent".to_vec());
        store.write_batch(batch).unwrap();

        assert_eq!(
            store.get(Column::Utxos, b"created").unwrap(),
            Some(b"new".to_vec())
        );
        assert_eq!(store.get(Column::Utxos, b"spent").unwrap(), None);
    }

    #[test]
    fn test_iter_is_key_ordered() {
        let store = MemoryStore::new();
        store.put(Column::HeightIndex, &[2], b"b").unwrap();
        store.put(Column::HeightIndex, &[1], b"a").unwrap();
        store.put(Column::HeightIndex, &[3], b"c").unwrap();

        let keys: Vec<Vec<u8>> = store
            .iter(Column::HeightIndex)
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn test_count() {
        let store = MemoryStore::new();
        assert_eq!(store.count(Column::Utxos).unwrap(), 0);
        store.put(Column::Utxos, b"a", b"1").unwrap();
        store.put(Column::Utxos, b"b", b"2").unwrap();
        assert_eq!(store.count(Column::Utxos).unwrap(), 2);
    }
}
