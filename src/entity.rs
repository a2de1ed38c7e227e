//! Entity identifiers, handles and the slot table.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// A globally unique entity identifier.
///
/// GUIDs are allocated from one process-wide strictly increasing counter
/// starting at 1, so they stay unique across worlds; migration relies on
/// this to carry an entity's identity to the destination world.
/// `Guid(0)` is the reserved invalid value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Guid(pub u64);

impl Guid {
    /// The reserved invalid GUID.
    pub const INVALID: Self = Self(0);

    /// Whether this GUID identifies an entity.
    pub fn is_valid(self) -> bool { self != Self::INVALID }
}

/// A position in a world's entity table.
///
/// Component records are sorted by the owning entity's `Index`.
/// [`Index::INVALID`] marks an entity that was queued for addition
/// during a tick and has not been placed into the table yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Index(pub u32);

impl Index {
    /// The unplaced/pending sentinel.
    pub const INVALID: Self = Self(u32::MAX);

    pub(crate) fn to_usize(self) -> usize { self.0 as usize }
}

static NEXT_GUID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_guid() -> Guid { Guid(NEXT_GUID.fetch_add(1, Ordering::Relaxed)) }

/// A copyable, non-owning handle to an entity.
///
/// Handles may become stale when the entity moves to a different slot;
/// [`crate::World::refresh`] repairs a stale handle through a GUID lookup.
/// A handle does not pin its entity alive in any way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityRef {
    /// The entity GUID. `Guid::INVALID` marks the null handle.
    pub guid:       Guid,
    /// The entity-table slot the entity occupied when the handle was made.
    pub index:      Index,
    /// The opaque user value carried by the entity slot.
    pub user_value: i64,
}

impl EntityRef {
    /// The null handle.
    pub const INVALID: Self = Self { guid: Guid::INVALID, index: Index::INVALID, user_value: 0 };

    /// Constructs an unplaced handle from a bare GUID.
    ///
    /// Useful for requesting inherited migrations from a stored GUID;
    /// the world resolves the slot itself.
    pub fn from_guid(guid: Guid) -> Self { Self { guid, ..Self::INVALID } }

    /// Whether the handle refers to an entity at all.
    pub fn is_valid(self) -> bool { self.guid.is_valid() }

    /// Whether the entity has been placed into an entity-table slot.
    /// Handles returned by in-tick entity creation stay unplaced until
    /// the next entity-update phase assigns the slot.
    pub fn is_placed(self) -> bool { self.index != Index::INVALID }
}

static_assertions::assert_impl_all!(EntityRef: Copy, Send, Sync);
static_assertions::assert_impl_all!(Guid: Copy, Send, Sync);

/// One slot of the entity table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Slot {
    pub(crate) guid:       Guid,
    pub(crate) user_value: i64,
}

impl Slot {
    const FREE: Self = Self { guid: Guid::INVALID, user_value: 0 };
}

/// An entity queued for placement during the next entity-update phase.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingEntity {
    pub(crate) guid:       Guid,
    /// `Index::INVALID` appends a fresh slot; otherwise the slot was
    /// reserved from the free list when the addition was queued.
    pub(crate) index:      Index,
    pub(crate) user_value: i64,
}

/// Queues shared between idle-world and in-tick callers.
#[derive(Default)]
pub(crate) struct Queues {
    pub(crate) additions: Vec<PendingEntity>,
    pub(crate) removals:  Vec<(Guid, Index)>,
    pub(crate) free:      Vec<Index>,
}

#[derive(Default)]
struct SearchCache {
    entries: Vec<SearchEntry>,
    valid:   bool,
}

#[derive(Debug, Clone, Copy)]
struct SearchEntry {
    guid:  Guid,
    index: Index,
}

/// The dense entity slot table of one world.
///
/// Per-type component counts live in two flat planes laid out
/// `slot * type_count + type_index`: the *present* plane readers observe
/// during a tick, and the *internal* plane reflecting applied mutations,
/// which becomes the present plane at the end-of-tick swap. Counts are
/// `u8`; an entity holds at most 255 records of one type.
pub(crate) struct Table {
    type_count:      usize,
    slots:           Vec<Slot>,
    present_counts:  Vec<u8>,
    internal_counts: Vec<u8>,
    pub(crate) queues: Mutex<Queues>,
    search:          Mutex<SearchCache>,
}

impl Table {
    pub(crate) fn new(type_count: usize) -> Self {
        Self {
            type_count,
            slots: Vec::new(),
            present_counts: Vec::new(),
            internal_counts: Vec::new(),
            queues: Mutex::new(Queues::default()),
            search: Mutex::new(SearchCache::default()),
        }
    }

    pub(crate) fn slot_count(&self) -> usize { self.slots.len() }

    pub(crate) fn slot(&self, index: Index) -> Option<&Slot> { self.slots.get(index.to_usize()) }

    pub(crate) fn is_live(&self, index: Index) -> bool {
        self.slots.get(index.to_usize()).is_some_and(|slot| slot.guid.is_valid())
    }

    /// Number of live slots.
    pub(crate) fn count(&self) -> usize { self.slots.len() - self.queues.lock().free.len() }

    pub(crate) fn count_pending(&self) -> usize {
        let queues = self.queues.lock();
        queues.additions.len().saturating_sub(queues.removals.len())
    }

    pub(crate) fn handle_at(&self, index: Index) -> Option<EntityRef> {
        let slot = self.slot(index)?;
        Some(EntityRef { guid: slot.guid, index, user_value: slot.user_value })
    }

    /// Places an entity into a free slot or appends one, immediately.
    pub(crate) fn adopt(&mut self, guid: Guid, user_value: i64) -> EntityRef {
        let slot = Slot { guid, user_value };
        let index = match self.queues.get_mut().free.pop() {
            Some(index) => {
                self.slots[index.to_usize()] = slot;
                self.zero_counts(index);
                index
            }
            None => {
                let index = Index(u32::try_from(self.slots.len()).expect("entity table overflow"));
                self.slots.push(slot);
                self.present_counts.resize(self.slots.len() * self.type_count, 0);
                self.internal_counts.resize(self.slots.len() * self.type_count, 0);
                index
            }
        };
        self.search.get_mut().valid = false;
        EntityRef { guid, index, user_value }
    }

    /// Queues an entity addition for the next entity-update phase.
    ///
    /// A slot reserved from the free list yields a placed handle right
    /// away; otherwise the handle stays unplaced until the table grows.
    pub(crate) fn queue_add(&self, guid: Guid, user_value: i64) -> EntityRef {
        let mut queues = self.queues.lock();
        let index = queues.free.pop().unwrap_or(Index::INVALID);
        queues.additions.push(PendingEntity { guid, index, user_value });
        EntityRef { guid, index, user_value }
    }

    /// Queues an entity removal. A second removal of the same
    /// `(guid, index)` pair within the same tick is a no-op success.
    pub(crate) fn queue_remove(&self, guid: Guid, index: Index) -> bool {
        let mut queues = self.queues.lock();
        if !queues.removals.iter().any(|&(g, i)| g == guid && i == index) {
            queues.removals.push((guid, index));
        }
        true
    }

    /// Frees a slot: counts zeroed, GUID cleared, slot recycled.
    pub(crate) fn free_slot(&mut self, index: Index) {
        self.zero_counts(index);
        self.slots[index.to_usize()] = Slot::FREE;
        self.queues.get_mut().free.push(index);
    }

    /// Applies the queued additions after removals have been processed.
    pub(crate) fn apply_additions(&mut self) {
        let additions = std::mem::take(&mut self.queues.get_mut().additions);
        for pending in additions {
            if pending.index == Index::INVALID {
                self.slots.push(Slot { guid: pending.guid, user_value: pending.user_value });
                self.present_counts.resize(self.slots.len() * self.type_count, 0);
                self.internal_counts.resize(self.slots.len() * self.type_count, 0);
            } else {
                self.slots[pending.index.to_usize()] =
                    Slot { guid: pending.guid, user_value: pending.user_value };
                self.zero_counts(pending.index);
            }
        }
        self.queues.get_mut().removals.clear();
        self.search.get_mut().valid = false;
    }

    pub(crate) fn reserve(&mut self, count: usize) {
        let free = self.queues.get_mut().free.len();
        if free < count {
            let extra = count - free;
            self.slots.reserve(extra);
            self.present_counts.reserve(extra * self.type_count);
            self.internal_counts.reserve(extra * self.type_count);
        }
    }

    pub(crate) fn invalidate_search(&mut self) { self.search.get_mut().valid = false; }

    /// Binary-searches the lazily rebuilt GUID index for a live entity.
    pub(crate) fn find(&self, guid: Guid) -> Option<EntityRef> {
        if !guid.is_valid() {
            return None;
        }

        let mut cache = self.search.lock();
        if !cache.valid {
            cache.entries.clear();
            cache.entries.extend(self.slots.iter().enumerate().filter_map(|(i, slot)| {
                slot.guid
                    .is_valid()
                    .then(|| SearchEntry { guid: slot.guid, index: Index(i as u32) })
            }));
            cache.entries.sort_unstable_by_key(|entry| entry.guid);
            cache.valid = true;
        }

        let pos = cache.entries.partition_point(|entry| entry.guid < guid);
        let entry = cache.entries.get(pos).copied()?;
        if entry.guid != guid {
            return None;
        }

        // The cache may be one tick stale; re-validate against the table.
        let slot = self.slots.get(entry.index.to_usize())?;
        (slot.guid == guid).then_some(EntityRef {
            guid,
            index: entry.index,
            user_value: slot.user_value,
        })
    }

    /// Like [`find`](Self::find), but also searches the pending-addition
    /// queue for entities created during the current tick.
    pub(crate) fn find_ext(&self, guid: Guid) -> Option<EntityRef> {
        if let Some(found) = self.find(guid) {
            return Some(found);
        }

        let queues = self.queues.lock();
        queues.additions.iter().find(|pending| pending.guid == guid).map(|pending| EntityRef {
            guid:       pending.guid,
            index:      pending.index,
            user_value: pending.user_value,
        })
    }

    // Count-plane accessors. `index` must be a valid slot.

    pub(crate) fn present_count(&self, index: Index, type_index: usize) -> u8 {
        self.present_counts[index.to_usize() * self.type_count + type_index]
    }

    pub(crate) fn internal_count(&self, index: Index, type_index: usize) -> u8 {
        self.internal_counts[index.to_usize() * self.type_count + type_index]
    }

    pub(crate) fn bump_present(&mut self, index: Index, type_index: usize) {
        let slot = &mut self.present_counts[index.to_usize() * self.type_count + type_index];
        *slot = slot.saturating_add(1);
    }

    pub(crate) fn bump_internal(&mut self, index: Index, type_index: usize) {
        let slot = &mut self.internal_counts[index.to_usize() * self.type_count + type_index];
        *slot = slot.saturating_add(1);
    }

    pub(crate) fn sub_internal(&mut self, index: Index, type_index: usize, count: u8) {
        let slot = &mut self.internal_counts[index.to_usize() * self.type_count + type_index];
        *slot = slot.saturating_sub(count);
    }

    fn zero_counts(&mut self, index: Index) {
        let start = index.to_usize() * self.type_count;
        self.present_counts[start..start + self.type_count].fill(0);
        self.internal_counts[start..start + self.type_count].fill(0);
    }

    /// Copies the internal count plane over the present plane.
    /// Part of the end-of-tick buffer swap.
    pub(crate) fn commit_counts(&mut self) {
        self.present_counts.copy_from_slice(&self.internal_counts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table { Table::new(2) }

    #[test]
    fn adopt_assigns_fresh_monotonic_guids() {
        let mut table = table();
        let a = table.adopt(next_guid(), 0);
        let b = table.adopt(next_guid(), 7);
        assert!(a.guid.is_valid());
        assert!(b.guid > a.guid);
        assert_eq!(a.index, Index(0));
        assert_eq!(b.index, Index(1));
        assert_eq!(b.user_value, 7);
        assert_eq!(table.count(), 2);
    }

    #[test]
    fn freed_slots_are_reused_with_new_guids() {
        let mut table = table();
        let a = table.adopt(next_guid(), 0);
        let _b = table.adopt(next_guid(), 0);
        table.free_slot(a.index);
        table.invalidate_search();
        assert_eq!(table.count(), 1);
        assert_eq!(table.find(a.guid), None);

        let c = table.adopt(next_guid(), 3);
        assert_eq!(c.index, a.index);
        assert_ne!(c.guid, a.guid);
        assert_eq!(table.count(), 2);
    }

    #[test]
    fn find_rebuilds_the_search_index_lazily() {
        let mut table = table();
        let mut handles = Vec::new();
        for n in 0..10 {
            handles.push(table.adopt(next_guid(), n));
        }

        for handle in &handles {
            let found = table.find(handle.guid).expect("live entity");
            assert_eq!(found.index, handle.index);
            assert_eq!(found.user_value, handle.user_value);
        }
        assert_eq!(table.find(Guid::INVALID), None);
        assert_eq!(table.find(Guid(u64::MAX)), None);
    }

    #[test]
    fn find_ext_sees_queued_additions() {
        let mut table = table();
        table.adopt(next_guid(), 0);

        let pending = table.queue_add(next_guid(), 5);
        assert!(!pending.is_placed());
        assert_eq!(table.find(pending.guid), None);
        let found = table.find_ext(pending.guid).expect("queued entity");
        assert_eq!(found.user_value, 5);

        table.apply_additions();
        let placed = table.find(pending.guid).expect("placed entity");
        assert_eq!(placed.index, Index(1));
    }

    #[test]
    fn queued_addition_reserves_freed_slot() {
        let mut table = table();
        let a = table.adopt(next_guid(), 0);
        table.free_slot(a.index);
        table.invalidate_search();

        let pending = table.queue_add(next_guid(), 0);
        assert_eq!(pending.index, a.index);
        table.apply_additions();
        assert!(table.is_live(pending.index));
    }

    #[test]
    fn duplicate_removal_is_deduplicated() {
        let mut table = table();
        let a = table.adopt(next_guid(), 0);
        assert!(table.queue_remove(a.guid, a.index));
        assert!(table.queue_remove(a.guid, a.index));
        assert_eq!(table.queues.lock().removals.len(), 1);
    }

    #[test]
    fn counts_commit_on_swap() {
        let mut table = table();
        let a = table.adopt(next_guid(), 0);
        table.bump_internal(a.index, 1);
        table.bump_internal(a.index, 1);
        assert_eq!(table.present_count(a.index, 1), 0);
        assert_eq!(table.internal_count(a.index, 1), 2);

        table.commit_counts();
        assert_eq!(table.present_count(a.index, 1), 2);

        table.sub_internal(a.index, 1, 2);
        table.commit_counts();
        assert_eq!(table.present_count(a.index, 1), 0);
    }
}
