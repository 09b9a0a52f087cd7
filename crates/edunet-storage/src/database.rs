//! RocksDB-backed storage.

use crate::batch::OperationKind;
use crate::{Column, Storage, StorageError, StorageResult, WriteBatch};
use rocksdb::{ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

type Db = DBWithThreadMode<MultiThreaded>;

/// Persistent store over RocksDB column families.
pub struct Database {
    db: Arc<Db>,
}

impl Database {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref();
        info!("Opening database at {:?}", path);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(256);
        opts.set_keep_log_file_num(1);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = Column::all()
            .iter()
            .map(|column| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                ColumnFamilyDescriptor::new(column.name(), cf_opts)
            })
            .collect();

        let db = Db::open_cf_descriptors(&opts, path, cf_descriptors)?;
        debug!("Database opened");

        Ok(Self { db: Arc::new(db) })
    }

    fn handle(&self, column: Column) -> StorageResult<Arc<rocksdb::BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(column.name())
            .ok_or(StorageError::ColumnNotFound(column.name()))
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> StorageResult<()> {
        for column in Column::all() {
            let handle = self.handle(*column)?;
            self.db.flush_cf(&handle)?;
        }
        Ok(())
    }
}

impl Storage for Database {
    fn get(&self, column: Column, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let handle = self.handle(column)?;
        Ok(self.db.get_cf(&handle, key)?)
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let handle = self.handle(column)?;
        self.db.put_cf(&handle, key, value)?;
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> StorageResult<()> {
        let handle = self.handle(column)?;
        self.db.delete_cf(&handle, key)?;
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut rocks_batch = rocksdb::WriteBatch::default();
        for op in batch.operations {
            let handle = self.handle(op.column)?;
            match op.kind {
                OperationKind::Put { value } => rocks_batch.put_cf(&handle, &op.key, &value),
                OperationKind::Delete => rocks_batch.delete_cf(&handle, &op.key),
            }
        }
        self.db.write(rocks_batch)?;
        Ok(())
    }

    fn iter(
        &self,
        column: Column,
    ) -> StorageResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>> {
        let handle = self.handle(column)?;
        let entries: Vec<(Vec<u8>, Vec<u8>)> = self
            .db
            .iterator_cf(&handle, rocksdb::IteratorMode::Start)
            .filter_map(|item| item.ok())
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        Ok(Box::new(entries.into_iter()))
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
        }
    }
}
