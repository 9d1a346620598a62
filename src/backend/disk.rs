//! Embedded on-disk backend.
//!
//! One redb database file holds every index, one named table per index.
//! Keys are the zero-padded decimal encoding of the record id, so redb's
//! B-tree range order is the index's primary-key scan order.

use crate::backend::{Backend, KvStore, decode_key, encode_key};
use crate::config::{MergeOperator, StrataConfig};
use crate::error::StrataError;
use crate::record::RecordId;
use redb::{Builder, Database, ReadableDatabase, ReadableTable, TableDefinition, TableError};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

fn backend_err(e: impl std::fmt::Display) -> StrataError {
    StrataError::Backend(e.to_string())
}

pub struct DiskBackend {
    db: Arc<Database>,
    read_only: bool,
    merge: Option<MergeOperator>,
}

impl std::fmt::Debug for DiskBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskBackend")
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl DiskBackend {
    /// Opens (or, in read-write mode, creates) the store under `dir`.
    pub fn open(config: &StrataConfig, dir: &Path) -> Result<Self, StrataError> {
        let db_path = dir.join(&config.store_file_name);
        let mut builder = Builder::new();
        if let Some(cache_size) = config.cache_size_bytes {
            builder.set_cache_size(cache_size);
        }
        let db = if config.mode.is_read_only() {
            builder.open(&db_path).map_err(backend_err)?
        } else {
            std::fs::create_dir_all(dir)?;
            builder.create(&db_path).map_err(backend_err)?
        };
        info!(
            path = %db_path.display(),
            read_only = config.mode.is_read_only(),
            "opened store"
        );
        Ok(Self {
            db: Arc::new(db),
            read_only: config.mode.is_read_only(),
            merge: config.merge_operator.clone(),
        })
    }
}

impl Backend for DiskBackend {
    fn store(&self, index_name: &str) -> Result<Arc<dyn KvStore>, StrataError> {
        if !self.read_only {
            // Materialize the table so a fresh index scans empty instead of
            // hitting TableDoesNotExist on first read.
            let txn = self.db.begin_write().map_err(backend_err)?;
            {
                let definition: TableDefinition<&str, &[u8]> = TableDefinition::new(index_name);
                txn.open_table(definition).map_err(backend_err)?;
            }
            txn.commit().map_err(backend_err)?;
        }
        Ok(Arc::new(DiskStore {
            db: Arc::clone(&self.db),
            table: index_name.to_string(),
            read_only: self.read_only,
            merge: self.merge.clone(),
        }))
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

pub struct DiskStore {
    db: Arc<Database>,
    table: String,
    read_only: bool,
    merge: Option<MergeOperator>,
}

impl DiskStore {
    fn definition(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.table)
    }

    fn check_writable(&self) -> Result<(), StrataError> {
        if self.read_only {
            return Err(StrataError::ReadOnly);
        }
        Ok(())
    }

    fn write(&self, id: RecordId, value: Option<&[u8]>) -> Result<(), StrataError> {
        self.check_writable()?;
        let txn = self.db.begin_write().map_err(backend_err)?;
        {
            let mut table = txn.open_table(self.definition()).map_err(backend_err)?;
            let key = encode_key(id);
            match value {
                Some(bytes) => {
                    table.insert(key.as_str(), bytes).map_err(backend_err)?;
                }
                None => {
                    table.remove(key.as_str()).map_err(backend_err)?;
                }
            }
        }
        txn.commit().map_err(backend_err)?;
        Ok(())
    }
}

impl KvStore for DiskStore {
    fn get(&self, id: RecordId) -> Result<Option<Vec<u8>>, StrataError> {
        let txn = self.db.begin_read().map_err(backend_err)?;
        let table = match txn.open_table(self.definition()) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(backend_err(e)),
        };
        let key = encode_key(id);
        let value = table.get(key.as_str()).map_err(backend_err)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn put(&self, id: RecordId, value: &[u8]) -> Result<(), StrataError> {
        self.write(id, Some(value))
    }

    fn delete(&self, id: RecordId) -> Result<(), StrataError> {
        self.write(id, None)
    }

    fn merge(&self, id: RecordId, operand: &[u8]) -> Result<(), StrataError> {
        self.check_writable()?;
        let merged = match &self.merge {
            Some(op) => {
                let existing = self.get(id)?;
                op(existing.as_deref(), operand)
            }
            None => operand.to_vec(),
        };
        self.write(id, Some(&merged))
    }

    fn scan(&self) -> Result<Vec<(RecordId, Vec<u8>)>, StrataError> {
        let txn = self.db.begin_read().map_err(backend_err)?;
        let table = match txn.open_table(self.definition()) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(backend_err(e)),
        };
        let mut entries = Vec::new();
        for entry in table.iter().map_err(backend_err)? {
            let (key_guard, value_guard) = entry.map_err(backend_err)?;
            entries.push((decode_key(key_guard.value())?, value_guard.value().to_vec()));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::DiskBackend;
    use crate::backend::Backend;
    use crate::config::StrataConfig;
    use tempfile::TempDir;

    fn open_test_backend() -> (DiskBackend, TempDir) {
        let dir = TempDir::new().expect("create temp dir");
        let backend =
            DiskBackend::open(&StrataConfig::default(), dir.path()).expect("open backend");
        (backend, dir)
    }

    #[test]
    fn put_get_delete_round_trip() {
        let (backend, _dir) = open_test_backend();
        let store = backend.store("accounts").expect("store");

        assert!(store.get(0).expect("get").is_none());
        store.put(0, b"alice").expect("put");
        assert_eq!(store.get(0).expect("get").as_deref(), Some(&b"alice"[..]));

        store.delete(0).expect("delete");
        assert!(store.get(0).expect("get").is_none());
    }

    #[test]
    fn scan_returns_entries_in_id_order() {
        let (backend, _dir) = open_test_backend();
        let store = backend.store("accounts").expect("store");

        for id in [100_u64, 2, 9, 10] {
            store.put(id, id.to_string().as_bytes()).expect("put");
        }
        let ids: Vec<u64> = store.scan().expect("scan").into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![2, 9, 10, 100]);
    }

    #[test]
    fn tables_are_isolated_per_index() {
        let (backend, _dir) = open_test_backend();
        let accounts = backend.store("accounts").expect("store");
        let balances = backend.store("balances").expect("store");

        accounts.put(1, b"a").expect("put");
        assert!(balances.get(1).expect("get").is_none());
        assert_eq!(balances.scan().expect("scan").len(), 0);
    }

    #[test]
    fn merge_without_operator_is_last_write_wins() {
        let (backend, _dir) = open_test_backend();
        let store = backend.store("accounts").expect("store");

        store.put(5, b"old").expect("put");
        store.merge(5, b"new").expect("merge");
        assert_eq!(store.get(5).expect("get").as_deref(), Some(&b"new"[..]));
    }

    #[test]
    fn merge_applies_configured_operator() {
        let dir = TempDir::new().expect("create temp dir");
        let config = StrataConfig::with_merge_operator(|existing, operand| {
            let mut out = existing.map(<[u8]>::to_vec).unwrap_or_default();
            out.extend_from_slice(operand);
            out
        });
        let backend = DiskBackend::open(&config, dir.path()).expect("open backend");
        let store = backend.store("log").expect("store");

        store.merge(1, b"ab").expect("merge");
        store.merge(1, b"cd").expect("merge");
        assert_eq!(store.get(1).expect("get").as_deref(), Some(&b"abcd"[..]));
    }

    #[test]
    fn read_only_reopen_refuses_writes() {
        let dir = TempDir::new().expect("create temp dir");
        {
            let backend =
                DiskBackend::open(&StrataConfig::default(), dir.path()).expect("open backend");
            let store = backend.store("accounts").expect("store");
            store.put(3, b"persisted").expect("put");
        }

        let backend =
            DiskBackend::open(&StrataConfig::read_only(), dir.path()).expect("reopen read-only");
        assert!(backend.is_read_only());
        let store = backend.store("accounts").expect("store");
        assert_eq!(
            store.get(3).expect("get").as_deref(),
            Some(&b"persisted"[..])
        );
        assert_eq!(store.put(4, b"x").unwrap_err().code_str(), "read_only");
        assert_eq!(store.delete(3).unwrap_err().code_str(), "read_only");
        assert_eq!(store.merge(3, b"x").unwrap_err().code_str(), "read_only");
    }
}
