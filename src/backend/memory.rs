//! Ephemeral backend for tests and throwaway databases. Same contract as
//! the disk backend, no file underneath.

use crate::backend::{Backend, KvStore};
use crate::config::MergeOperator;
use crate::error::StrataError;
use crate::record::RecordId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

type Tables = HashMap<String, BTreeMap<RecordId, Vec<u8>>>;

pub struct MemoryBackend {
    tables: Arc<Mutex<Tables>>,
    read_only: bool,
    merge: Option<MergeOperator>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
            read_only: false,
            merge: None,
        }
    }

    pub fn with_merge_operator(merge: MergeOperator) -> Self {
        Self {
            merge: Some(merge),
            ..Self::new()
        }
    }

    /// Freezes the backend: every store handed out afterwards refuses writes.
    pub fn into_read_only(self) -> Self {
        Self {
            read_only: true,
            ..self
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn store(&self, index_name: &str) -> Result<Arc<dyn KvStore>, StrataError> {
        if !self.read_only {
            self.tables
                .lock()
                .entry(index_name.to_string())
                .or_default();
        }
        Ok(Arc::new(MemoryStore {
            tables: Arc::clone(&self.tables),
            table: index_name.to_string(),
            read_only: self.read_only,
            merge: self.merge.clone(),
        }))
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    table: String,
    read_only: bool,
    merge: Option<MergeOperator>,
}

impl MemoryStore {
    fn check_writable(&self) -> Result<(), StrataError> {
        if self.read_only {
            return Err(StrataError::ReadOnly);
        }
        Ok(())
    }
}

impl KvStore for MemoryStore {
    fn get(&self, id: RecordId) -> Result<Option<Vec<u8>>, StrataError> {
        Ok(self
            .tables
            .lock()
            .get(&self.table)
            .and_then(|table| table.get(&id).cloned()))
    }

    fn put(&self, id: RecordId, value: &[u8]) -> Result<(), StrataError> {
        self.check_writable()?;
        self.tables
            .lock()
            .entry(self.table.clone())
            .or_default()
            .insert(id, value.to_vec());
        Ok(())
    }

    fn delete(&self, id: RecordId) -> Result<(), StrataError> {
        self.check_writable()?;
        if let Some(table) = self.tables.lock().get_mut(&self.table) {
            table.remove(&id);
        }
        Ok(())
    }

    fn merge(&self, id: RecordId, operand: &[u8]) -> Result<(), StrataError> {
        self.check_writable()?;
        let mut tables = self.tables.lock();
        let table = tables.entry(self.table.clone()).or_default();
        let merged = match &self.merge {
            Some(op) => op(table.get(&id).map(Vec::as_slice), operand),
            None => operand.to_vec(),
        };
        table.insert(id, merged);
        Ok(())
    }

    fn scan(&self) -> Result<Vec<(RecordId, Vec<u8>)>, StrataError> {
        Ok(self
            .tables
            .lock()
            .get(&self.table)
            .map(|table| {
                table
                    .iter()
                    .map(|(id, value)| (*id, value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
