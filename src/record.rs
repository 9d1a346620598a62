use crate::error::StrataError;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Primary key of a record. Ids are dense, assigned monotonically from the
/// owning index's counter, and never reused within the life of the index.
pub type RecordId = u64;

/// Undo-stack clock. Stamped on each frame when it is opened.
pub type Revision = i64;

/// A typed record stored in an [`Index`](crate::Index).
///
/// The id is embedded in the record itself; the engine assigns it during
/// `emplace` and keys every later mutation by it. `unique_key` optionally
/// exposes a user-visible unique constraint over the record's attributes:
/// two live records may never share a key.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> RecordId;

    fn set_id(&mut self, id: RecordId);

    fn unique_key(&self) -> Option<Vec<u8>> {
        None
    }
}

pub(crate) fn encode_record<T: Record>(record: &T) -> Result<Vec<u8>, StrataError> {
    rmp_serde::to_vec(record).map_err(|e| StrataError::Encode(e.to_string()))
}

pub(crate) fn decode_record<T: Record>(bytes: &[u8]) -> Result<T, StrataError> {
    rmp_serde::from_slice(bytes).map_err(|e| StrataError::Decode(e.to_string()))
}
