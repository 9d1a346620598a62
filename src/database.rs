use crate::backend::{Backend, DiskBackend, MemoryBackend};
use crate::config::StrataConfig;
use crate::error::StrataError;
use crate::record::{Record, Revision};
use crate::undo::index::Index;
use crate::undo::session::SessionHandle;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Type-erased index lifecycle, so a database can drive heterogeneous
/// indices in lock-step.
pub(crate) trait RegisteredIndex: Send {
    fn name(&self) -> String;

    fn revision(&self) -> Revision;

    fn set_revision(&self, revision: u64) -> Result<(), StrataError>;

    fn undo(&self) -> Result<(), StrataError>;

    fn undo_all(&self) -> Result<(), StrataError>;

    fn squash(&self);

    fn commit(&self, revision: Revision);

    fn undo_stack_revision_range(&self) -> (Revision, Revision);

    fn begin_session(&self, enabled: bool) -> Box<dyn SessionHandle>;
}

impl<T: Record> RegisteredIndex for Index<T> {
    fn name(&self) -> String {
        Index::name(self)
    }

    fn revision(&self) -> Revision {
        Index::revision(self)
    }

    fn set_revision(&self, revision: u64) -> Result<(), StrataError> {
        Index::set_revision(self, revision)
    }

    fn undo(&self) -> Result<(), StrataError> {
        Index::undo(self)
    }

    fn undo_all(&self) -> Result<(), StrataError> {
        Index::undo_all(self)
    }

    fn squash(&self) {
        Index::squash(self);
    }

    fn commit(&self, revision: Revision) {
        Index::commit(self, revision);
    }

    fn undo_stack_revision_range(&self) -> (Revision, Revision) {
        Index::undo_stack_revision_range(self)
    }

    fn begin_session(&self, enabled: bool) -> Box<dyn SessionHandle> {
        Box::new(self.start_undo_session(enabled))
    }
}

/// A fixed set of typed indices sharing one backing store and one
/// revision timeline. Lifecycle operations fan out to every registered
/// index in registration order, serially, so all indices observe the same
/// order of frames.
pub struct Database {
    backend: Arc<dyn Backend>,
    indices: Vec<Box<dyn RegisteredIndex>>,
    registered: HashSet<String>,
}

impl Database {
    /// Opens a disk-backed database under `dir`.
    pub fn open(config: &StrataConfig, dir: &Path) -> Result<Self, StrataError> {
        let backend = DiskBackend::open(config, dir)?;
        Ok(Self::with_backend(Arc::new(backend)))
    }

    /// An ephemeral database for tests and scratch work.
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    pub fn with_backend(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            indices: Vec::new(),
            registered: HashSet::new(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.backend.is_read_only()
    }

    /// Opens the named index over the shared store and registers it for
    /// fan-out.
    ///
    /// A freshly opened index is quiescent at revision 0. When siblings
    /// are already registered, its `undo_stack_revision_range` must match
    /// theirs: on the first registration of a name the index is aligned
    /// (revision seeded to the shared range's begin, then empty frames
    /// pushed until it reaches the shared end); a repeat registration
    /// with a mismatched range means the store no longer agrees with its
    /// siblings, which is surfaced as `InconsistentUndoStack`.
    pub fn add_index<T: Record>(&mut self, name: &str) -> Result<Index<T>, StrataError> {
        let first_registration = !self.registered.contains(name);
        let store = self.backend.store(name)?;
        let index: Index<T> = Index::open(name, store)?;

        if let Some(expected) = self.indices.first().map(|i| i.undo_stack_revision_range()) {
            let actual = index.undo_stack_revision_range();
            if actual != expected {
                if !first_registration {
                    return Err(StrataError::InconsistentUndoStack {
                        index: name.to_string(),
                        expected,
                        actual,
                    });
                }
                info!(
                    index = name,
                    begin = expected.0,
                    end = expected.1,
                    "aligning undo stack of added index with its siblings"
                );
                index.set_revision(expected.0 as u64)?;
                while index.revision() < expected.1 {
                    index.start_undo_session(true).push();
                }
            }
        }

        self.indices.push(Box::new(index.clone()));
        self.registered.insert(name.to_string());
        Ok(index)
    }

    /// Opens one sub-session per registered index, uniformly enabled or
    /// disabled, and bundles them into a composite handle. The composite
    /// revision is the first sub-session's revision, or -1 with no
    /// indices registered.
    pub fn start_undo_session(&self, enabled: bool) -> DbSession {
        let sessions: Vec<Box<dyn SessionHandle>> = self
            .indices
            .iter()
            .map(|index| index.begin_session(enabled))
            .collect();
        let revision = sessions.first().map_or(-1, |s| s.revision());
        DbSession { sessions, revision }
    }

    /// Revision of the shared timeline: the first registered index's
    /// revision, or -1 with no indices registered.
    pub fn revision(&self) -> Revision {
        self.indices.first().map_or(-1, |index| index.revision())
    }

    pub fn set_revision(&self, revision: u64) -> Result<(), StrataError> {
        for index in &self.indices {
            index.set_revision(revision)?;
        }
        Ok(())
    }

    pub fn undo(&self) -> Result<(), StrataError> {
        for index in &self.indices {
            index.undo()?;
        }
        Ok(())
    }

    pub fn squash(&self) {
        for index in &self.indices {
            index.squash();
        }
    }

    pub fn commit(&self, revision: Revision) {
        for index in &self.indices {
            index.commit(revision);
        }
    }

    pub fn undo_all(&self) -> Result<(), StrataError> {
        for index in &self.indices {
            index.undo_all()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("indices", &self.indices.len())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

/// Composite session driving one sub-session per registered index in
/// lock-step. Scope-exit default is `undo`, fanned out in registration
/// order; each verb consumes every sub-session, after which the handle is
/// inert.
pub struct DbSession {
    sessions: Vec<Box<dyn SessionHandle>>,
    revision: Revision,
}

impl DbSession {
    pub fn push(&mut self) {
        for session in &mut self.sessions {
            session.push();
        }
        self.sessions.clear();
    }

    pub fn squash(&mut self) {
        for session in &mut self.sessions {
            session.squash();
        }
        self.sessions.clear();
    }

    pub fn undo(&mut self) -> Result<(), StrataError> {
        let mut first_error = None;
        for session in &mut self.sessions {
            if let Err(e) = session.undo() {
                first_error.get_or_insert(e);
            }
        }
        self.sessions.clear();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }
}

impl Drop for DbSession {
    fn drop(&mut self) {
        for session in &mut self.sessions {
            if let Err(e) = session.undo() {
                warn!(error = %e, "failed to roll back composite session on drop");
            }
        }
        self.sessions.clear();
    }
}
