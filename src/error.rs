use crate::record::{RecordId, Revision};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrataErrorCode {
    Io,
    Backend,
    Encode,
    Decode,
    Validation,
    ReadOnly,
    NotFound,
    UniquenessViolation,
    StackNotEmpty,
    RevisionOutOfRange,
    InconsistentUndoStack,
}

impl StrataErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            StrataErrorCode::Io => "io",
            StrataErrorCode::Backend => "backend",
            StrataErrorCode::Encode => "encode",
            StrataErrorCode::Decode => "decode",
            StrataErrorCode::Validation => "validation",
            StrataErrorCode::ReadOnly => "read_only",
            StrataErrorCode::NotFound => "not_found",
            StrataErrorCode::UniquenessViolation => "uniqueness_violation",
            StrataErrorCode::StackNotEmpty => "stack_not_empty",
            StrataErrorCode::RevisionOutOfRange => "revision_out_of_range",
            StrataErrorCode::InconsistentUndoStack => "inconsistent_undo_stack",
        }
    }
}

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("store is open read-only")]
    ReadOnly,
    #[error("record {id} not found")]
    NotFound { id: RecordId },
    #[error("could not insert record {id}: uniqueness constraint violated")]
    UniquenessViolation { id: RecordId },
    #[error("cannot set revision while an undo stack is active")]
    StackNotEmpty,
    #[error("revision {requested} exceeds the maximum representable revision")]
    RevisionOutOfRange { requested: u64 },
    #[error(
        "index '{index}' has an undo stack (revision range [{}, {}]) that is \
         inconsistent with other indices in the database (revision range [{}, {}]); \
         corrupted database?",
        actual.0, actual.1, expected.0, expected.1
    )]
    InconsistentUndoStack {
        index: String,
        expected: (Revision, Revision),
        actual: (Revision, Revision),
    },
}

impl StrataError {
    pub fn code(&self) -> StrataErrorCode {
        match self {
            StrataError::Io(_) => StrataErrorCode::Io,
            StrataError::Backend(_) => StrataErrorCode::Backend,
            StrataError::Encode(_) => StrataErrorCode::Encode,
            StrataError::Decode(_) => StrataErrorCode::Decode,
            StrataError::Validation(_) => StrataErrorCode::Validation,
            StrataError::ReadOnly => StrataErrorCode::ReadOnly,
            StrataError::NotFound { .. } => StrataErrorCode::NotFound,
            StrataError::UniquenessViolation { .. } => StrataErrorCode::UniquenessViolation,
            StrataError::StackNotEmpty => StrataErrorCode::StackNotEmpty,
            StrataError::RevisionOutOfRange { .. } => StrataErrorCode::RevisionOutOfRange,
            StrataError::InconsistentUndoStack { .. } => StrataErrorCode::InconsistentUndoStack,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}
