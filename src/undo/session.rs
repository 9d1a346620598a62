use crate::error::StrataError;
use crate::record::{Record, Revision};
use crate::undo::index::Index;
use tracing::warn;

/// Scoped acquisition of an index's top undo frame.
///
/// While armed, dropping the handle rolls the frame back, so an
/// uncommitted session cannot leak its mutations. Each verb disarms the
/// handle: once one has run, later verbs and the drop are no-ops. Handles
/// move but do not clone; a moved-from handle is gone, so the armed flag
/// travels with the value.
pub struct IndexSession<T: Record> {
    index: Index<T>,
    apply: bool,
    revision: Revision,
}

impl<T: Record> IndexSession<T> {
    pub(crate) fn armed(index: Index<T>, revision: Revision) -> Self {
        Self {
            index,
            apply: true,
            revision,
        }
    }

    pub(crate) fn inert(index: Index<T>) -> Self {
        Self {
            index,
            apply: false,
            revision: -1,
        }
    }

    /// Leaves the frame on the stack for an enclosing `undo`, `squash`,
    /// or `commit` to consume later.
    pub fn push(&mut self) {
        self.apply = false;
    }

    /// Folds this session's frame into the one below it.
    pub fn squash(&mut self) {
        if self.apply {
            self.index.squash();
        }
        self.apply = false;
    }

    /// Explicitly rolls the frame back.
    pub fn undo(&mut self) -> Result<(), StrataError> {
        if !self.apply {
            return Ok(());
        }
        self.apply = false;
        self.index.undo()
    }

    /// Revision stamped on the frame this handle was bound to; -1 for a
    /// disabled session.
    pub fn revision(&self) -> Revision {
        self.revision
    }
}

impl<T: Record> Drop for IndexSession<T> {
    fn drop(&mut self) {
        if !self.apply {
            return;
        }
        self.apply = false;
        if let Err(e) = self.index.undo() {
            warn!(
                index = %self.index.name(),
                error = %e,
                "failed to roll back undo session on drop"
            );
        }
    }
}

/// Type-erased session verbs, used by the database to drive one
/// sub-session per registered index in lock-step.
pub(crate) trait SessionHandle: Send {
    fn push(&mut self);

    fn squash(&mut self);

    fn undo(&mut self) -> Result<(), StrataError>;

    fn revision(&self) -> Revision;
}

impl<T: Record> SessionHandle for IndexSession<T> {
    fn push(&mut self) {
        IndexSession::push(self);
    }

    fn squash(&mut self) {
        IndexSession::squash(self);
    }

    fn undo(&mut self) -> Result<(), StrataError> {
        IndexSession::undo(self)
    }

    fn revision(&self) -> Revision {
        IndexSession::revision(self)
    }
}
