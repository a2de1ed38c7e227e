//! The world surface processes receive during dispatch.

use crate::comp::{AnyComp, Component, ComponentId};
use crate::entity::{EntityRef, Guid};
use crate::error::Result;
use crate::world::authority::Key;
use crate::world::iter::{CompIter, CompSet};
use crate::world::World;

/// A shared, copyable view of a [`World`].
///
/// This is the only world access a [`crate::Process`] gets: reads of the
/// committed present state, construction of iterators, and the deferred
/// mutation APIs. All mutation routes through the pending queues — entity
/// additions and removals, component adds and removes requested through a
/// view take effect during the next tick's update phases, never
/// immediately.
///
/// Views can also be taken outside a tick via [`World::view`]; the
/// deferred semantics stay the same, but authoritative iterators then fail
/// with [`crate::Error::InvalidProcessState`].
#[derive(Clone, Copy)]
pub struct WorldView<'w> {
    world: &'w World,
}

impl<'w> WorldView<'w> {
    pub(crate) fn new(world: &'w World) -> Self { Self { world } }

    // ---- entities -------------------------------------------------------

    /// Queues an entity addition. The returned handle is unplaced unless a
    /// freed slot could be reserved; it resolves after the next tick's
    /// entity update.
    pub fn add_entity(&self) -> EntityRef { self.world.queue_add_entity_inner(0) }

    /// Queues an entity addition carrying an opaque user value.
    pub fn add_entity_with_value(&self, user_value: i64) -> EntityRef {
        self.world.queue_add_entity_inner(user_value)
    }

    /// Queues the entity for removal. See [`World::remove_entity`].
    pub fn remove_entity(&self, entity: EntityRef) -> bool {
        self.world.remove_entity_inner(entity)
    }

    /// Number of live entities.
    pub fn count(&self) -> usize { self.world.count() }

    /// Queued additions not yet offset by queued removals.
    pub fn count_pending(&self) -> usize { self.world.count_pending() }

    /// The handle stored in entity-table slot `index`.
    pub fn get(&self, index: usize) -> Result<EntityRef> { self.world.get(index) }

    /// Looks up a live entity by GUID.
    pub fn find(&self, guid: Guid) -> EntityRef { self.world.find(guid) }

    /// Looks up an entity by GUID, including ones queued for addition.
    pub fn find_ext(&self, guid: Guid) -> EntityRef { self.world.find_ext(guid) }

    /// Whether the handle still refers to the live entity in its slot.
    pub fn is_valid(&self, entity: EntityRef) -> bool { self.world.is_valid(entity) }

    /// Repairs a stale handle through a GUID lookup.
    pub fn refresh(&self, entity: EntityRef) -> EntityRef { self.world.refresh(entity) }

    // ---- components -----------------------------------------------------

    /// Queues a component addition for the next component-update phase.
    /// The target position is computed against the future buffer while a
    /// tick runs, so the action lands consistently after the swap.
    pub fn queue_add_component<C: Component>(&self, entity: EntityRef, value: C) -> bool {
        self.world.queue_add_component_inner(entity, value)
    }

    /// Queues the removal of the entity's `nth` record of `C`.
    pub fn queue_remove_component<C: Component>(&self, entity: EntityRef, nth: u8) -> bool {
        self.world.queue_remove_component_inner::<C>(entity, nth)
    }

    /// Direct present-buffer read; see [`World::get_present`].
    pub fn get_present<C: Component>(&self, entity: EntityRef, nth: u8) -> Option<&'w C> {
        self.world.get_present(entity, nth)
    }

    /// Direct future-buffer access, bypassing authority.
    ///
    /// # Safety
    /// As [`World::get_future`].
    pub unsafe fn get_future<C: Component>(&self, entity: EntityRef, nth: u8) -> Option<&'w mut C> {
        self.world.get_future(entity, nth)
    }

    /// Number of present-buffer records of `C` the entity owns.
    pub fn count_components<C: Component>(&self, entity: EntityRef) -> u8 {
        self.world.count_components::<C>(entity)
    }

    /// Number of future-buffer records of `C` the entity owns.
    pub fn count_future_components<C: Component>(&self, entity: EntityRef) -> u8 {
        self.world.count_future_components::<C>(entity)
    }

    /// Type-erased present-buffer read keyed by the stable component id.
    pub fn raw_component(
        &self,
        entity: EntityRef,
        id: ComponentId,
        nth: u8,
    ) -> Option<&'w dyn AnyComp> {
        self.world.raw_component(entity, id, nth)
    }

    /// Type-erased future-buffer access keyed by the stable component id.
    ///
    /// # Safety
    /// As [`World::get_future`].
    pub unsafe fn raw_future_component(
        &self,
        entity: EntityRef,
        id: ComponentId,
        nth: u8,
    ) -> Option<&'w mut dyn AnyComp> {
        self.world.raw_future_component(entity, id, nth)
    }

    /// Present-buffer record count keyed by the stable component id.
    pub fn raw_component_count(&self, entity: EntityRef, id: ComponentId) -> u8 {
        self.world.raw_component_count(entity, id)
    }

    /// Future-buffer record count keyed by the stable component id.
    pub fn raw_future_component_count(&self, entity: EntityRef, id: ComponentId) -> u8 {
        self.world.raw_future_component_count(entity, id)
    }

    // ---- iterators ------------------------------------------------------

    /// Constructs an authoritative iterator, acquiring authority over
    /// every type in `A` with the same `key`. Fails with
    /// [`crate::Error::AuthorityConflict`] when another holder recorded a
    /// different (or null) key, and with
    /// [`crate::Error::InvalidProcessState`] outside a tick.
    pub fn iter<R: CompSet, A: CompSet, O: CompSet>(
        &self,
        key: Option<Key>,
    ) -> Result<CompIter<'w, R, A, O>> {
        CompIter::new_authoritative(self.world, key)
    }

    /// Like [`iter`](Self::iter), with one key per type in `A`. A list of
    /// the wrong length fails with [`crate::Error::MissingAuthority`].
    pub fn iter_with_keys<R: CompSet, A: CompSet, O: CompSet>(
        &self,
        keys: &[Option<Key>],
    ) -> Result<CompIter<'w, R, A, O>> {
        CompIter::new_authoritative_with_keys(self.world, keys)
    }

    /// Constructs a read-only iterator; legal at any time.
    pub fn read_iter<R: CompSet, O: CompSet>(&self) -> CompIter<'w, R, (), O> {
        CompIter::new_read(self.world)
    }

    // ---- miscellaneous --------------------------------------------------

    /// The opaque user slot carried by the world.
    pub fn user_data(&self) -> usize { self.world.user_data() }
}
