use std::sync::Arc;

/// How the backing store is opened. A read-only store serves `get`/`scan`
/// but refuses every mutating call with `StrataError::ReadOnly`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

impl OpenMode {
    pub fn is_read_only(self) -> bool {
        matches!(self, OpenMode::ReadOnly)
    }
}

/// User-defined merge operator: combines the existing value (if any) with
/// the operand into the value stored back under the key.
pub type MergeOperator = Arc<dyn Fn(Option<&[u8]>, &[u8]) -> Vec<u8> + Send + Sync>;

/// Runtime configuration for a stratadb database.
#[derive(Clone)]
pub struct StrataConfig {
    pub mode: OpenMode,
    /// File name of the store inside the database directory.
    pub store_file_name: String,
    /// Page-cache budget handed to the embedded store, when overridden.
    pub cache_size_bytes: Option<usize>,
    /// Merge operator applied by `KvStore::merge`. When unset, merge
    /// degenerates to last-write-wins.
    pub merge_operator: Option<MergeOperator>,
}

impl std::fmt::Debug for StrataConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrataConfig")
            .field("mode", &self.mode)
            .field("store_file_name", &self.store_file_name)
            .field("cache_size_bytes", &self.cache_size_bytes)
            .field("merge_operator", &self.merge_operator.is_some())
            .finish()
    }
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            mode: OpenMode::ReadWrite,
            store_file_name: "strata.redb".to_string(),
            cache_size_bytes: None,
            merge_operator: None,
        }
    }
}

impl StrataConfig {
    pub fn read_only() -> Self {
        Self {
            mode: OpenMode::ReadOnly,
            ..Self::default()
        }
    }

    pub fn with_merge_operator(
        merge: impl Fn(Option<&[u8]>, &[u8]) -> Vec<u8> + Send + Sync + 'static,
    ) -> Self {
        Self {
            merge_operator: Some(Arc::new(merge)),
            ..Self::default()
        }
    }
}
