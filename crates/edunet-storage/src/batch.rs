//! Atomic write batches.
//!
//! A batch collects puts and deletes across columns; `Storage::write_batch`
//! applies all of them in one atomic step. Dropping an unwritten batch
//! discards it, which is how callers abandon a half-built transaction.

use crate::Column;

/// One operation within a batch.
#[derive(Debug, Clone)]
pub(crate) enum OperationKind {
    Put { value: Vec<u8> },
    Delete,
}

#[derive(Debug, Clone)]
pub(crate) struct Operation {
    pub column: Column,
    pub key: Vec<u8>,
    pub kind: OperationKind,
}

/// A collection of writes applied atomically.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    pub(crate) operations: Vec<Operation>,
}

impl WriteBatch {
    /// Start an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put.
    pub fn put(&mut self, column: Column, key: Vec<u8>, value: Vec<u8>) {
        self.operations.push(Operation {
            column,
            key,
            kind: OperationKind::Put { value },
        });
    }

    /// Queue a delete.
    pub fn delete(&mut self, column: Column, key: Vec<u8>) {
        self.operations.push(Operation {
            column,
            key,
            kind: OperationKind::Delete,
        });
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
