use crate::backend::KvStore;
use crate::error::StrataError;
use crate::record::{Record, RecordId, Revision, decode_record, encode_record};
use crate::undo::session::IndexSession;
use crate::undo::state::UndoState;
use im::OrdMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::error;

/// Typed collection keyed by a monotonically assigned 64-bit id, layered
/// over a [`KvStore`] and tracked by a stack of undo frames.
///
/// The handle is cheap to clone; clones share one underlying index. The
/// engine is single-threaded by contract: the interior lock exists so
/// sessions and the database can hold the index while the caller keeps
/// mutating it, not to make concurrent mutation meaningful.
pub struct Index<T: Record> {
    core: Arc<Mutex<IndexCore<T>>>,
}

impl<T: Record> Clone for Index<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Record> std::fmt::Debug for Index<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index").finish_non_exhaustive()
    }
}

struct IndexCore<T: Record> {
    name: String,
    live: OrdMap<RecordId, T>,
    unique: HashMap<Vec<u8>, RecordId>,
    next_id: RecordId,
    revision: Revision,
    stack: VecDeque<UndoState<T>>,
    store: Arc<dyn KvStore>,
}

fn fatal_uniqueness(index: &str, id: RecordId) -> ! {
    error!(
        index,
        id, "uniqueness violation while applying a tracked mutation; index is corrupted"
    );
    std::process::abort();
}

impl<T: Record> Index<T> {
    /// Opens the index over `store`, rebuilding the live map and the id
    /// counter from an ordered scan. Starts quiescent at revision 0; the
    /// caller reseeds the revision through `set_revision` when restoring
    /// from its own metadata.
    pub fn open(name: impl Into<String>, store: Arc<dyn KvStore>) -> Result<Self, StrataError> {
        let name = name.into();
        let mut live = OrdMap::new();
        let mut unique = HashMap::new();
        let mut next_id: RecordId = 0;
        for (id, bytes) in store.scan()? {
            let record: T = decode_record(&bytes)?;
            if record.id() != id {
                return Err(StrataError::Validation(format!(
                    "index '{name}': record under key {id} carries embedded id {}",
                    record.id()
                )));
            }
            if let Some(key) = record.unique_key() {
                if unique.insert(key, id).is_some() {
                    return Err(StrataError::Validation(format!(
                        "index '{name}': duplicate unique key in persisted records at id {id}"
                    )));
                }
            }
            live.insert(id, record);
            next_id = id + 1;
        }
        Ok(Self {
            core: Arc::new(Mutex::new(IndexCore {
                name,
                live,
                unique,
                next_id,
                revision: 0,
                stack: VecDeque::new(),
                store,
            })),
        })
    }

    pub fn name(&self) -> String {
        self.core.lock().name.clone()
    }

    /// Allocates the next id, builds the record, and inserts it. The
    /// builder receives the assigned id; the embedded id is forced to it
    /// regardless of what the builder wrote. Returns the inserted record.
    pub fn emplace(&self, build: impl FnOnce(RecordId) -> T) -> Result<T, StrataError> {
        self.core.lock().emplace(build)
    }

    /// Applies `f` to the record, keyed by its embedded id. The first
    /// modification of a pre-existing record within the top frame captures
    /// its pre-image. A uniqueness violation caused by `f` aborts the
    /// process: the mutation is already chosen and cannot be unwound.
    pub fn modify(&self, record: &T, f: impl FnOnce(&mut T)) -> Result<(), StrataError> {
        self.core.lock().modify(record.id(), f)
    }

    /// Removes the record, keyed by its embedded id.
    pub fn remove(&self, record: &T) -> Result<(), StrataError> {
        self.core.lock().remove(record.id())
    }

    /// Looks the id up and removes the record it names.
    pub fn remove_object(&self, id: RecordId) -> Result<(), StrataError> {
        self.core.lock().remove(id)
    }

    pub fn find(&self, id: RecordId) -> Option<T> {
        self.core.lock().live.get(&id).cloned()
    }

    pub fn get(&self, id: RecordId) -> Result<T, StrataError> {
        self.core
            .lock()
            .live
            .get(&id)
            .cloned()
            .ok_or(StrataError::NotFound { id })
    }

    /// Live ids in ascending order.
    pub fn ids(&self) -> Vec<RecordId> {
        self.core.lock().live.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.core.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.lock().live.is_empty()
    }

    /// Structural-sharing snapshot of the live map.
    pub fn live(&self) -> OrdMap<RecordId, T> {
        self.core.lock().live.clone()
    }

    pub fn next_id(&self) -> RecordId {
        self.core.lock().next_id
    }

    pub fn revision(&self) -> Revision {
        self.core.lock().revision
    }

    /// Opens a new undo frame and returns the session handle bound to it.
    /// A disabled session is inert: it carries revision -1 and none of its
    /// verbs (nor its drop) touch the index.
    pub fn start_undo_session(&self, enabled: bool) -> IndexSession<T> {
        if !enabled {
            return IndexSession::inert(self.clone());
        }
        let revision = {
            let mut core = self.core.lock();
            core.revision += 1;
            let revision = core.revision;
            let next_id = core.next_id;
            core.stack.push_back(UndoState::open(next_id, revision));
            revision
        };
        IndexSession::armed(self.clone(), revision)
    }

    /// Rolls back the top frame: live state and the id counter return to
    /// their values at the moment the frame was opened. No-op when
    /// quiescent.
    pub fn undo(&self) -> Result<(), StrataError> {
        self.core.lock().undo()
    }

    /// Rolls back until the stack is empty.
    pub fn undo_all(&self) -> Result<(), StrataError> {
        let mut core = self.core.lock();
        while !core.stack.is_empty() {
            core.undo()?;
        }
        Ok(())
    }

    /// Folds the top frame into the one below it. With a single frame on
    /// the stack this is equivalent to committing that frame.
    pub fn squash(&self) {
        self.core.lock().squash();
    }

    /// Drops every bottom frame stamped with a revision `<= revision`.
    /// Live state is untouched; only the ability to roll back past
    /// `revision` is lost.
    pub fn commit(&self, revision: Revision) {
        let mut core = self.core.lock();
        while core.stack.front().is_some_and(|f| f.revision <= revision) {
            core.stack.pop_front();
        }
    }

    /// Seeds the revision counter. Only legal while quiescent.
    pub fn set_revision(&self, revision: u64) -> Result<(), StrataError> {
        let mut core = self.core.lock();
        if !core.stack.is_empty() {
            return Err(StrataError::StackNotEmpty);
        }
        if revision > Revision::MAX as u64 {
            return Err(StrataError::RevisionOutOfRange {
                requested: revision,
            });
        }
        core.revision = revision as Revision;
        Ok(())
    }

    /// `(begin, end)` of the undo stack's revision coverage: both equal
    /// the current revision when quiescent, otherwise one below the
    /// bottom frame's revision through the top frame's revision.
    pub fn undo_stack_revision_range(&self) -> (Revision, Revision) {
        let core = self.core.lock();
        match (core.stack.front(), core.stack.back()) {
            (Some(front), Some(back)) => (front.revision - 1, back.revision),
            _ => (core.revision, core.revision),
        }
    }

    pub fn stack_depth(&self) -> usize {
        self.core.lock().stack.len()
    }

    /// Clone of the top undo frame, if any. Inspection only.
    pub fn top_frame(&self) -> Option<UndoState<T>> {
        self.core.lock().stack.back().cloned()
    }
}

impl<T: Record> IndexCore<T> {
    fn emplace(&mut self, build: impl FnOnce(RecordId) -> T) -> Result<T, StrataError> {
        let id = self.next_id;
        let mut record = build(id);
        record.set_id(id);

        if self.live.contains_key(&id) {
            return Err(StrataError::UniquenessViolation { id });
        }
        let unique_key = record.unique_key();
        if let Some(key) = &unique_key {
            if self.unique.contains_key(key) {
                return Err(StrataError::UniquenessViolation { id });
            }
        }

        let bytes = encode_record(&record)?;
        self.store.put(id, &bytes)?;

        if let Some(key) = unique_key {
            self.unique.insert(key, id);
        }
        self.live.insert(id, record.clone());
        self.next_id += 1;
        if let Some(head) = self.stack.back_mut() {
            head.new_ids.insert(id);
        }
        Ok(record)
    }

    fn modify(&mut self, id: RecordId, f: impl FnOnce(&mut T)) -> Result<(), StrataError> {
        let Some(current) = self.live.get(&id).cloned() else {
            return Err(StrataError::NotFound { id });
        };

        let mut updated = current.clone();
        f(&mut updated);
        if updated.id() != id {
            error!(
                index = %self.name,
                id,
                new_id = updated.id(),
                "modifier rewrote the embedded id; index is corrupted"
            );
            std::process::abort();
        }
        let old_key = current.unique_key();
        let new_key = updated.unique_key();
        if new_key != old_key {
            if let Some(key) = &new_key {
                if self.unique.get(key).is_some_and(|owner| *owner != id) {
                    fatal_uniqueness(&self.name, id);
                }
            }
        }

        let bytes = encode_record(&updated)?;
        self.store.put(id, &bytes)?;

        self.capture_pre_image(id, &current);
        if old_key != new_key {
            if let Some(key) = old_key {
                self.unique.remove(&key);
            }
            if let Some(key) = new_key {
                self.unique.insert(key, id);
            }
        }
        self.live.insert(id, updated);
        Ok(())
    }

    fn remove(&mut self, id: RecordId) -> Result<(), StrataError> {
        let Some(current) = self.live.get(&id).cloned() else {
            return Err(StrataError::NotFound { id });
        };

        self.store.delete(id)?;

        self.note_removed(id, &current);
        if let Some(key) = current.unique_key() {
            self.unique.remove(&key);
        }
        self.live.remove(&id);
        Ok(())
    }

    /// First touch of a pre-existing record within the top frame clones
    /// its pre-image into `old_values`. Frame-new records and already
    /// captured ids are left alone.
    fn capture_pre_image(&mut self, id: RecordId, current: &T) {
        let Some(head) = self.stack.back_mut() else {
            return;
        };
        if head.new_ids.contains(&id) {
            return;
        }
        if head.old_values.contains_key(&id) {
            return;
        }
        head.old_values.insert(id, current.clone());
    }

    /// Resolves a removal against the top frame: a frame-new id has its
    /// creation erased, a captured modification migrates to
    /// `removed_values` keeping the original pre-image, a repeat removal
    /// is a no-op, anything else captures the current value.
    fn note_removed(&mut self, id: RecordId, current: &T) {
        let Some(head) = self.stack.back_mut() else {
            return;
        };
        if head.new_ids.remove(&id) {
            return;
        }
        if let Some(pre) = head.old_values.remove(&id) {
            head.removed_values.insert(id, pre);
            return;
        }
        if head.removed_values.contains_key(&id) {
            return;
        }
        head.removed_values.insert(id, current.clone());
    }

    fn undo(&mut self) -> Result<(), StrataError> {
        let Some(frame) = self.stack.pop_back() else {
            return Ok(());
        };

        for id in &frame.new_ids {
            self.store.delete(*id)?;
            if let Some(record) = self.live.remove(id) {
                if let Some(key) = record.unique_key() {
                    self.unique.remove(&key);
                }
            }
        }
        self.next_id = frame.old_next_id;

        for (id, pre) in frame.old_values {
            let bytes = encode_record(&pre)?;
            self.store.put(id, &bytes)?;
            if let Some(displaced) = self.live.get(&id).and_then(Record::unique_key) {
                self.unique.remove(&displaced);
            }
            if let Some(key) = pre.unique_key() {
                if self.unique.get(&key).is_some_and(|owner| *owner != id) {
                    fatal_uniqueness(&self.name, id);
                }
                self.unique.insert(key, id);
            }
            self.live.insert(id, pre);
        }

        for (id, pre) in frame.removed_values {
            let bytes = encode_record(&pre)?;
            self.store.put(id, &bytes)?;
            if self.live.contains_key(&id) {
                fatal_uniqueness(&self.name, id);
            }
            if let Some(key) = pre.unique_key() {
                if self.unique.contains_key(&key) {
                    fatal_uniqueness(&self.name, id);
                }
                self.unique.insert(key, id);
            }
            self.live.insert(id, pre);
        }

        self.revision -= 1;
        Ok(())
    }

    fn squash(&mut self) {
        let Some(top) = self.stack.pop_back() else {
            return;
        };
        if let Some(prev) = self.stack.back_mut() {
            top.fold_into(prev);
        }
        self.revision -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::Index;
    use crate::backend::{Backend, MemoryBackend};
    use crate::record::{Record, RecordId};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Account {
        id: RecordId,
        owner: String,
        balance: i64,
    }

    impl Record for Account {
        fn id(&self) -> RecordId {
            self.id
        }

        fn set_id(&mut self, id: RecordId) {
            self.id = id;
        }

        fn unique_key(&self) -> Option<Vec<u8>> {
            Some(self.owner.as_bytes().to_vec())
        }
    }

    fn open_index() -> Index<Account> {
        let backend = MemoryBackend::new();
        let store = backend.store("accounts").expect("store");
        Index::open("accounts", store).expect("open index")
    }

    fn emplace_account(index: &Index<Account>, owner: &str, balance: i64) -> Account {
        index
            .emplace(|id| Account {
                id,
                owner: owner.into(),
                balance,
            })
            .expect("emplace")
    }

    #[test]
    fn emplace_assigns_dense_ids() {
        let index = open_index();
        let a = emplace_account(&index, "alice", 10);
        let b = emplace_account(&index, "bob", 20);
        assert_eq!(a.id, 0);
        assert_eq!(b.id, 1);
        assert_eq!(index.next_id(), 2);
        assert_eq!(index.ids(), vec![0, 1]);
    }

    #[test]
    fn emplace_rejects_duplicate_unique_key_and_leaves_state_unchanged() {
        let index = open_index();
        emplace_account(&index, "alice", 10);

        let err = index
            .emplace(|id| Account {
                id,
                owner: "alice".into(),
                balance: 99,
            })
            .unwrap_err();
        assert_eq!(err.code_str(), "uniqueness_violation");
        assert_eq!(index.len(), 1);
        assert_eq!(index.next_id(), 1);
    }

    #[test]
    fn modify_is_keyed_by_embedded_id() {
        let index = open_index();
        let account = emplace_account(&index, "alice", 10);

        index
            .modify(&account, |a| a.balance = 25)
            .expect("modify");
        assert_eq!(index.get(account.id).expect("get").balance, 25);
    }

    #[test]
    fn modify_of_unknown_id_is_not_found() {
        let index = open_index();
        let ghost = Account {
            id: 404,
            owner: "nobody".into(),
            balance: 0,
        };
        let err = index.modify(&ghost, |a| a.balance = 1).unwrap_err();
        assert_eq!(err.code_str(), "not_found");
    }

    #[test]
    fn remove_object_surfaces_not_found() {
        let index = open_index();
        let err = index.remove_object(7).unwrap_err();
        assert!(matches!(
            err,
            crate::error::StrataError::NotFound { id: 7 }
        ));
    }

    #[test]
    fn removed_unique_key_becomes_available_again() {
        let index = open_index();
        let account = emplace_account(&index, "alice", 10);
        index.remove(&account).expect("remove");
        emplace_account(&index, "alice", 30);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn mutations_mirror_into_the_store() {
        let backend = MemoryBackend::new();
        let store = backend.store("accounts").expect("store");
        let index: Index<Account> = Index::open("accounts", store.clone()).expect("open");

        let account = index
            .emplace(|id| Account {
                id,
                owner: "alice".into(),
                balance: 10,
            })
            .expect("emplace");
        assert!(store.get(0).expect("get").is_some());

        index.remove(&account).expect("remove");
        assert!(store.get(0).expect("get").is_none());
    }

    #[test]
    fn open_rebuilds_live_and_next_id_from_scan() {
        let backend = MemoryBackend::new();
        {
            let store = backend.store("accounts").expect("store");
            let index: Index<Account> = Index::open("accounts", store).expect("open");
            emplace_account(&index, "alice", 10);
            emplace_account(&index, "bob", 20);
        }
        let store = backend.store("accounts").expect("store");
        let reopened: Index<Account> = Index::open("accounts", store).expect("reopen");
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.next_id(), 2);
        assert_eq!(reopened.get(1).expect("get").owner, "bob");
        assert_eq!(reopened.revision(), 0);
        assert_eq!(reopened.stack_depth(), 0);
    }
}
