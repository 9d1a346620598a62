use crate::record::{Record, RecordId, Revision};
use std::collections::{BTreeMap, BTreeSet};

/// One frame of an index's undo stack: the inverse of every mutation made
/// while the frame was the top of the stack.
///
/// The three collections are pairwise disjoint on id. An id created during
/// the frame is only in `new_ids`; a pre-existing record that was modified
/// is only in `old_values`; one that was removed is only in
/// `removed_values`.
#[derive(Debug, Clone)]
pub struct UndoState<T> {
    /// Pre-images of records that existed before this frame and were
    /// modified during it. First modification wins.
    pub old_values: BTreeMap<RecordId, T>,
    /// Pre-images of records that existed before this frame and were
    /// removed during it.
    pub removed_values: BTreeMap<RecordId, T>,
    /// Ids allocated during this frame.
    pub new_ids: BTreeSet<RecordId>,
    /// Value of the index's id counter when the frame was opened.
    pub old_next_id: RecordId,
    /// Revision stamped on the frame when it was opened.
    pub revision: Revision,
}

impl<T: Record> UndoState<T> {
    pub(crate) fn open(old_next_id: RecordId, revision: Revision) -> Self {
        Self {
            old_values: BTreeMap::new(),
            removed_values: BTreeMap::new(),
            new_ids: BTreeSet::new(),
            old_next_id,
            revision,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.old_values.is_empty() && self.removed_values.is_empty() && self.new_ids.is_empty()
    }

    /// Folds this frame (the top of the stack) into `prev`, the frame
    /// below it, preserving the net effect as a single frame at `prev`'s
    /// revision.
    ///
    /// Per-id combination, where the row is `prev`'s op and the column is
    /// this frame's op:
    ///
    /// | prev \ top | modify (was Y) | new           | remove (was Y) |
    /// |------------|----------------|---------------|----------------|
    /// | new        | stays new      | unreachable   | creation erased|
    /// | modify X   | keeps X        | unreachable   | removed, was X |
    /// | remove     | unreachable    | unreachable   | unreachable    |
    /// | nothing    | modify, was Y  | new           | removed, was Y |
    ///
    /// The unreachable cells follow from per-frame id disjointness and
    /// from removed records not being live. `prev.old_next_id` is left
    /// untouched: the merged frame still opens at `prev`'s original
    /// counter.
    pub(crate) fn fold_into(self, prev: &mut UndoState<T>) {
        for (id, pre) in self.old_values {
            if prev.new_ids.contains(&id) {
                continue;
            }
            if prev.old_values.contains_key(&id) {
                continue;
            }
            debug_assert!(!prev.removed_values.contains_key(&id));
            prev.old_values.insert(id, pre);
        }

        for id in self.new_ids {
            prev.new_ids.insert(id);
        }

        for (id, pre) in self.removed_values {
            if prev.new_ids.remove(&id) {
                continue;
            }
            if let Some(earlier) = prev.old_values.remove(&id) {
                prev.removed_values.insert(id, earlier);
                continue;
            }
            debug_assert!(!prev.removed_values.contains_key(&id));
            prev.removed_values.insert(id, pre);
        }
    }
}
