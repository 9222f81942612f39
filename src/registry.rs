//! Dedupe key registry: which queued task currently owns each write slot.
//!
//! A slot is a `(target, tag)` pair. The registry lives exactly one batch
//! window and is cleared by the flush together with the pending queue. It
//! keys slots by [`TargetKey`] and holds an anchor per address-keyed target,
//! so no other target can take over that address before the window closes.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::hash::FastHashMap;
use crate::tag::Tag;
use crate::target::{Anchor, Target, TargetKey};
use crate::task::TaskId;

/// Dedupe identity of a submission: the write slot it targets.
///
/// Equality and hashing only consider the slot.
#[derive(Clone)]
pub struct DedupeKey {
    /// Identity of the mutated target.
    pub target: TargetKey,
    /// Slot within the target.
    pub tag: Tag,
    anchor: Option<Anchor>,
}

impl DedupeKey {
    /// Key the slot `tag` of `target`.
    pub fn new(target: &impl Target, tag: impl Into<Tag>) -> Self {
        Self {
            target: target.target_key(),
            tag: tag.into(),
            anchor: target.anchor(),
        }
    }

    pub(crate) fn into_parts(self) -> (TargetKey, Tag, Option<Anchor>) {
        (self.target, self.tag, self.anchor)
    }
}

impl PartialEq for DedupeKey {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target && self.tag == other.tag
    }
}

impl Eq for DedupeKey {}

impl Hash for DedupeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.target.hash(state);
        self.tag.hash(state);
    }
}

impl fmt::Debug for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupeKey")
            .field("target", &self.target)
            .field("tag", &self.tag)
            .field("anchored", &self.anchor.is_some())
            .finish()
    }
}

#[derive(Default)]
struct TargetSlots {
    owners: FastHashMap<Tag, TaskId>,
    anchor: Option<Anchor>,
}

/// Per-window map from `(target, tag)` to the owning task.
#[derive(Default)]
pub struct DedupeRegistry {
    slots: FastHashMap<TargetKey, TargetSlots>,
}

impl DedupeRegistry {
    /// Make `task` the owner of the slot, replacing any previous owner.
    ///
    /// The caller removes a previous owner from its run queue first; the
    /// registry only records who owns the slot now. The first anchor seen for
    /// a target is kept; a later one is handed back so the caller decides
    /// where it gets dropped.
    pub fn record_owner(
        &mut self,
        target: TargetKey,
        tag: Tag,
        task: TaskId,
        anchor: Option<Anchor>,
    ) -> Option<Anchor> {
        let entry = self.slots.entry(target).or_default();
        entry.owners.insert(tag, task);
        if entry.anchor.is_none() {
            entry.anchor = anchor;
            None
        } else {
            anchor
        }
    }

    /// The task owning the slot, if any.
    pub fn owner(&self, target: TargetKey, tag: &Tag) -> Option<TaskId> {
        self.slots.get(&target)?.owners.get(tag).copied()
    }

    /// Drop every entry, anchors included.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Number of distinct targets with at least one owned slot.
    pub fn target_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of owned slots across all targets.
    pub fn slot_count(&self) -> usize {
        self.slots.values().map(|slots| slots.owners.len()).sum()
    }
}

impl fmt::Debug for DedupeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupeRegistry")
            .field("targets", &self.target_count())
            .field("slots", &self.slot_count())
            .finish()
    }
}
