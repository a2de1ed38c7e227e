//! The typed double-buffered component store and its type-erased vtable.

use std::any::Any;
use std::time::Instant;

use crate::comp::{AnyComp, Component, ComponentId};
use crate::entity::{self, EntityRef, Index};
use crate::util::SyncCell;
use crate::world::metrics::ComponentMetrics;
use crate::world::queue::{Action, Payload};

/// Selects one side of a double buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Buf {
    /// The buffer read during a tick; immutable while processes run.
    Present,
    /// The staging buffer written during a tick.
    Future,
}

/// The two buffers of one component type.
///
/// Both buffers are sorted by owner index with records of one entity
/// contiguous. The present buffer is plain data: it is only mutated
/// through `&mut World` (immediate adds, rebuild, teardown). The future
/// buffer sits in a [`SyncCell`] because authoritative iterators write it
/// through a shared world during dispatch; the authority table arbitrates
/// those writers, and the engine itself only touches the cell through
/// `&mut self` (rebuild, swap) or structure-preserving reads.
pub(crate) struct Store<C: Component> {
    pub(crate) present: Vec<C>,
    pub(crate) future:  SyncCell<Vec<C>>,
}

impl<C: Component> Default for Store<C> {
    fn default() -> Self { Self { present: Vec::new(), future: SyncCell::new(Vec::new()) } }
}

impl<C: Component> Store<C> {
    /// Shared view of the future buffer.
    ///
    /// # Safety
    /// The caller must not hold this across any point where the buffer
    /// structure changes (rebuild, swap); during dispatch the structure is
    /// stable and concurrent accesses only mutate record fields under the
    /// authority contract.
    pub(crate) unsafe fn future_ref(&self) -> &Vec<C> { &*self.future.get() }

    /// Mutable shared view of the future buffer.
    ///
    /// # Safety
    /// As [`future_ref`](Self::future_ref); additionally the caller must
    /// hold authority over this type (or otherwise guarantee exclusive
    /// access to the records it touches).
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn future_mut(&self) -> &mut Vec<C> { &mut *self.future.get() }

    fn buffer(&self, buf: Buf) -> &Vec<C> {
        match buf {
            Buf::Present => &self.present,
            // Safety: structure-preserving read; see future_ref.
            Buf::Future => unsafe { self.future_ref() },
        }
    }
}

/// The type-erased operations the world performs on a store.
///
/// One boxed instance per registered type, indexed by type index; this is
/// the "array of per-type storage descriptors" rendition of the component
/// set product type.
pub(crate) trait AnyStore: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn component_id(&self) -> ComponentId;
    fn len(&self, buf: Buf) -> usize;
    fn owner_at(&self, buf: Buf, index: usize) -> Index;

    /// First buffer position of the entity's contiguous run.
    fn run_start(&self, buf: Buf, owner: Index) -> usize;
    /// One past the last buffer position of the entity's contiguous run.
    fn run_end(&self, buf: Buf, owner: Index) -> usize;

    fn record_at(&self, buf: Buf, index: usize) -> &dyn AnyComp;

    /// Mutable record access in the future buffer through a shared store.
    ///
    /// # Safety
    /// The caller bypasses the authority table; it must guarantee no
    /// concurrent writer touches the same record.
    #[allow(clippy::mut_from_ref)]
    unsafe fn future_record_mut(&self, index: usize) -> &mut dyn AnyComp;

    /// Inserts a copy of `record` right after the entity's present-buffer
    /// run, returning the insertion position. `record` must be of this
    /// store's type.
    fn insert_now(&mut self, record: &dyn AnyComp, owner: Index) -> usize;

    /// Rebuilds the future buffer from the present buffer, merging the
    /// sorted pending actions of this type. See the module docs of
    /// [`super::queue`] for the queue-side invariants.
    fn apply_actions(
        &mut self,
        type_index: usize,
        actions: &[Action],
        entities: &mut entity::Table,
        delta: i64,
        metrics: &mut ComponentMetrics,
    );

    /// Swaps present and future.
    fn swap(&mut self);

    /// Runs `destroy` on every present-buffer record. World teardown only.
    fn destroy_present(&mut self);

    /// Runs the custom-migration hook on the present-buffer record at
    /// `index` and returns a boxed copy for the destination world.
    fn migrate_out(
        &mut self,
        index: usize,
        dest: EntityRef,
        inherited: &mut Vec<EntityRef>,
    ) -> Box<dyn AnyComp>;

    /// Runs `on_migrate_complete` on every present-buffer record of the
    /// entity. Only called for custom-migration types.
    fn notify_migrated(&mut self, owner: Index, dest: EntityRef);
}

impl<C: Component> AnyStore for Store<C> {
    fn as_any(&self) -> &dyn Any { self }

    fn as_any_mut(&mut self) -> &mut dyn Any { self }

    fn component_id(&self) -> ComponentId { C::ID }

    fn len(&self, buf: Buf) -> usize { self.buffer(buf).len() }

    fn owner_at(&self, buf: Buf, index: usize) -> Index {
        Component::owner(&self.buffer(buf)[index])
    }

    fn run_start(&self, buf: Buf, owner: Index) -> usize {
        self.buffer(buf).partition_point(|record| Component::owner(record) < owner)
    }

    fn run_end(&self, buf: Buf, owner: Index) -> usize {
        self.buffer(buf).partition_point(|record| Component::owner(record) <= owner)
    }

    fn record_at(&self, buf: Buf, index: usize) -> &dyn AnyComp { &self.buffer(buf)[index] }

    unsafe fn future_record_mut(&self, index: usize) -> &mut dyn AnyComp {
        &mut self.future_mut()[index]
    }

    fn insert_now(&mut self, record: &dyn AnyComp, owner: Index) -> usize {
        let mut value = *record.downcast_ref::<C>().expect("record type matches the store");
        value.set_owner(owner);
        let position = self.run_end(Buf::Present, owner);
        self.present.insert(position, value);
        position
    }

    fn apply_actions(
        &mut self,
        type_index: usize,
        actions: &[Action],
        entities: &mut entity::Table,
        delta: i64,
        metrics: &mut ComponentMetrics,
    ) {
        let start_time = Instant::now();
        metrics.id = C::ID;

        let Self { present, future } = self;
        let future = future.get_mut();
        future.clear();
        future.reserve((present.len() as i64 + delta).max(0) as usize);

        let mut src = 0usize;
        for action in actions {
            if action.type_index != type_index {
                continue;
            }

            match &action.payload {
                Payload::Remove(_) => {
                    debug_assert!(src <= action.target, "pending actions out of order");
                    if action.destructive {
                        for record in &mut present[action.target..action.target + action.run_length]
                        {
                            record.destroy();
                        }
                    }

                    future.extend_from_slice(&present[src..action.target]);
                    src = action.target + action.run_length;

                    if let Some(owner) = entities.find_ext(action.owner_guid) {
                        if owner.is_placed() {
                            entities.sub_internal(
                                owner.index,
                                type_index,
                                action.run_length.min(u8::MAX as usize) as u8,
                            );
                        }
                    }
                    metrics.delete_ops += 1;
                }
                Payload::Add(record) => {
                    // The owner may have been removed since the action was
                    // queued; orphaned adds are dropped silently.
                    let Some(owner) = entities.find_ext(action.owner_guid) else { continue };
                    if !owner.is_placed()
                        || entities.internal_count(owner.index, type_index) == u8::MAX
                    {
                        continue;
                    }

                    debug_assert!(src <= action.target, "pending actions out of order");
                    future.extend_from_slice(&present[src..action.target]);
                    src = action.target;

                    let mut value =
                        *record.downcast_ref::<C>().expect("action type index matches the store");
                    value.set_owner(owner.index);
                    future.push(value);
                    entities.bump_internal(owner.index, type_index);
                    metrics.add_ops += 1;
                }
            }
        }

        future.extend_from_slice(&present[src..]);
        metrics.update_time = start_time.elapsed();
    }

    fn swap(&mut self) { std::mem::swap(&mut self.present, self.future.get_mut()); }

    fn destroy_present(&mut self) {
        for record in &mut self.present {
            record.destroy();
        }
    }

    fn migrate_out(
        &mut self,
        index: usize,
        dest: EntityRef,
        inherited: &mut Vec<EntityRef>,
    ) -> Box<dyn AnyComp> {
        let record = &mut self.present[index];
        if C::CUSTOM_MIGRATION {
            Component::on_migrate(record, dest, inherited);
        }
        Box::new(*record)
    }

    fn notify_migrated(&mut self, owner: Index, dest: EntityRef) {
        if !C::CUSTOM_MIGRATION {
            return;
        }
        let (start, end) =
            (self.run_start(Buf::Present, owner), self.run_end(Buf::Present, owner));
        for record in &mut self.present[start..end] {
            Component::on_migrate_complete(record, dest);
        }
    }
}
