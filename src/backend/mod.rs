pub mod disk;
pub mod memory;

use crate::error::StrataError;
use crate::record::RecordId;
use std::sync::Arc;

pub use disk::DiskBackend;
pub use memory::MemoryBackend;

/// Byte-level store scoped to one index's keyspace. The undo engine treats
/// it as the system of record for committed state: every live mutation is
/// mirrored through it, and `scan` rebuilds the live map on open.
///
/// Keys on the wire are the textual decimal encoding of the record id,
/// zero-padded so lexicographic order equals numeric order.
pub trait KvStore: Send + Sync {
    fn get(&self, id: RecordId) -> Result<Option<Vec<u8>>, StrataError>;

    fn put(&self, id: RecordId, value: &[u8]) -> Result<(), StrataError>;

    fn delete(&self, id: RecordId) -> Result<(), StrataError>;

    /// Combines the existing value with `operand` through the configured
    /// merge operator. Without an operator this is last-write-wins.
    fn merge(&self, id: RecordId, operand: &[u8]) -> Result<(), StrataError>;

    /// All entries in ascending id order.
    fn scan(&self) -> Result<Vec<(RecordId, Vec<u8>)>, StrataError>;
}

/// A database backend: opens per-index stores by name and knows its mode.
pub trait Backend: Send + Sync {
    fn store(&self, index_name: &str) -> Result<Arc<dyn KvStore>, StrataError>;

    fn is_read_only(&self) -> bool;
}

/// Zero-padding to 20 digits keeps u64::MAX representable and makes the
/// store's lexicographic key order match numeric id order.
pub(crate) fn encode_key(id: RecordId) -> String {
    format!("{id:020}")
}

pub(crate) fn decode_key(key: &str) -> Result<RecordId, StrataError> {
    key.parse::<RecordId>()
        .map_err(|_| StrataError::Decode(format!("malformed record key: {key:?}")))
}
