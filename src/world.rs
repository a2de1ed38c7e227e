//! The world: entities, component buffers, processes and the tick driver.

use std::time::Instant;

use bitvec::vec::BitVec;
use parking_lot::Mutex;

use crate::comp::{AnyComp, Component, ComponentId, Registry};
use crate::dispatch::{Dispatcher, Serial, Task};
use crate::entity::{self, next_guid, EntityRef, Guid, Index};
use crate::error::{Error, Result};
use crate::process::{GroupId, Process, ProcessId};

pub(crate) mod authority;
pub use authority::Key;

pub(crate) mod iter;
pub use iter::{CompIter, CompSet};

pub(crate) mod metrics;
pub use metrics::{ComponentMetrics, WorldMetrics};

mod migrate;

pub(crate) mod queue;
use queue::{Action, Payload, Pending};

pub(crate) mod store;
use store::{AnyStore, Buf, Store};

pub mod tracer;
use tracer::Tracer;

mod view;
pub use view::WorldView;


struct ProcessEntry {
    process: Box<dyn Process>,
    enabled: bool,
}

/// Configures and creates a [`World`].
///
/// Registration order fixes the world's component signature; worlds can
/// only exchange entities when they were built with identical signatures.
pub struct Builder {
    registry:   Registry,
    dispatcher: Box<dyn Dispatcher>,
    tracer:     Box<dyn Tracer>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            registry:   Registry::default(),
            dispatcher: Box::new(Serial::new()),
            tracer:     Box::new(tracer::Noop),
        }
    }
}

impl Builder {
    /// Registers a component type at the next type index.
    pub fn register<C: Component>(mut self) -> Self {
        self.registry.register::<C>();
        self
    }

    /// Replaces the default [`Serial`] dispatcher.
    pub fn dispatcher(mut self, dispatcher: impl Dispatcher + 'static) -> Self {
        self.dispatcher = Box::new(dispatcher);
        self
    }

    /// Replaces the default no-op tracer.
    pub fn tracer(mut self, tracer: impl Tracer + 'static) -> Self {
        self.tracer = Box::new(tracer);
        self
    }

    /// Builds the world.
    pub fn build(self) -> World {
        let type_count = self.registry.len();
        let mut metrics = WorldMetrics::default();
        metrics.reset(type_count);

        World {
            entities: entity::Table::new(type_count),
            stores: self.registry.new_stores(),
            pending: Mutex::new(Pending::new(type_count)),
            authority: authority::Table::new(type_count),
            registry: self.registry,
            groups: Vec::new(),
            disabled_groups: BitVec::new(),
            dispatcher: Some(self.dispatcher),
            tracer: self.tracer,
            metrics,
            ticking: false,
            user_data: 0,
        }
    }
}

/// A world owns its entities, component buffers, processes and dispatcher.
///
/// All structural mutation funnels through either the idle-world API
/// (`&mut self` methods, applied immediately) or the deferred queues that
/// in-tick callers reach through a [`WorldView`]. Between ticks the present
/// and internal state are identical; within a tick the world is observably
/// inconsistent and only the view surface is legal.
pub struct World {
    registry:        Registry,
    entities:        entity::Table,
    stores:          Vec<Box<dyn AnyStore>>,
    pending:         Mutex<Pending>,
    authority:       authority::Table,
    groups:          Vec<Vec<ProcessEntry>>,
    disabled_groups: BitVec,
    dispatcher:      Option<Box<dyn Dispatcher>>,
    tracer:          Box<dyn Tracer>,
    metrics:         WorldMetrics,
    ticking:         bool,
    user_data:       usize,
}

impl World {
    /// Starts configuring a new world.
    pub fn builder() -> Builder { Builder::default() }

    /// A shared view of this world, the surface processes receive.
    pub fn view(&self) -> WorldView<'_> { WorldView::new(self) }

    /// Whether a tick is currently running.
    pub fn is_ticking(&self) -> bool { self.ticking }

    // ---- entities -------------------------------------------------------

    /// Adds an entity and returns its handle.
    pub fn add_entity(&mut self) -> EntityRef { self.add_entity_with_value(0) }

    /// Adds an entity carrying an opaque user value.
    pub fn add_entity_with_value(&mut self, user_value: i64) -> EntityRef {
        self.entities.adopt(next_guid(), user_value)
    }

    /// Queues the entity for removal at the next entity-update phase.
    /// Removing an already-queued entity again is a no-op success;
    /// an unknown GUID returns `false`.
    pub fn remove_entity(&mut self, entity: EntityRef) -> bool {
        self.remove_entity_inner(entity)
    }

    pub(crate) fn remove_entity_inner(&self, entity: EntityRef) -> bool {
        match self.entities.find(entity.guid) {
            Some(found) => self.entities.queue_remove(found.guid, found.index),
            None => false,
        }
    }

    pub(crate) fn queue_add_entity_inner(&self, user_value: i64) -> EntityRef {
        self.entities.queue_add(next_guid(), user_value)
    }

    /// Pre-allocates capacity for `count` more entities.
    pub fn reserve(&mut self, count: usize) { self.entities.reserve(count); }

    /// Number of live entities.
    pub fn count(&self) -> usize { self.entities.count() }

    /// Queued additions not yet offset by queued removals.
    pub fn count_pending(&self) -> usize { self.entities.count_pending() }

    /// The handle stored in entity-table slot `index`.
    ///
    /// A free slot yields an invalid handle; an index beyond the table
    /// fails with [`Error::OutOfRange`].
    pub fn get(&self, index: usize) -> Result<EntityRef> {
        u32::try_from(index)
            .ok()
            .and_then(|index| self.entities.handle_at(Index(index)))
            .ok_or(Error::OutOfRange)
    }

    /// Looks up a live entity by GUID; returns [`EntityRef::INVALID`] when
    /// no live entity carries it.
    pub fn find(&self, guid: Guid) -> EntityRef {
        self.entities.find(guid).unwrap_or(EntityRef::INVALID)
    }

    /// Like [`find`](Self::find), but also searches entities queued for
    /// addition during the current tick.
    pub fn find_ext(&self, guid: Guid) -> EntityRef {
        self.entities.find_ext(guid).unwrap_or(EntityRef::INVALID)
    }

    /// Whether the handle still refers to the live entity in its slot.
    pub fn is_valid(&self, entity: EntityRef) -> bool {
        entity.is_valid()
            && entity.is_placed()
            && self.entities.slot(entity.index).is_some_and(|slot| slot.guid == entity.guid)
    }

    /// Repairs a stale handle through a GUID lookup. Returns
    /// [`EntityRef::INVALID`] when the entity no longer exists.
    pub fn refresh(&self, entity: EntityRef) -> EntityRef {
        if self.is_valid(entity) {
            entity
        } else {
            self.find(entity.guid)
        }
    }

    // ---- components -----------------------------------------------------

    /// Adds a component record to the entity immediately, inserting it
    /// after the entity's present-buffer run. Falls back to queueing when
    /// the entity itself is still queued for addition. Returns `false`
    /// when the entity is unknown or already holds 255 records of `C`.
    pub fn add_component<C: Component>(&mut self, entity: EntityRef, value: C) -> bool {
        let type_index = self.registry.index_of::<C>();
        let Some(owner) = self.entities.find(entity.guid) else {
            return self.queue_add_component_inner(entity, value);
        };
        if self.entities.internal_count(owner.index, type_index) == u8::MAX {
            return false;
        }

        let position = self.stores[type_index].insert_now(&value, owner.index);
        self.entities.bump_present(owner.index, type_index);
        self.entities.bump_internal(owner.index, type_index);
        // Queued actions recorded positions in the same buffer; shift the
        // ones at or after the insertion point.
        self.pending.get_mut().fix_up_insertion(type_index, position);
        true
    }

    /// Queues a component addition for the next component-update phase.
    pub fn queue_add_component<C: Component>(&mut self, entity: EntityRef, value: C) -> bool {
        self.queue_add_component_inner(entity, value)
    }

    /// Queues the removal of the entity's `nth` record of `C`. The removed
    /// record is destroyed when the action applies. Duplicate removals of
    /// the same occurrence within one tick collapse into one.
    pub fn queue_remove_component<C: Component>(&mut self, entity: EntityRef, nth: u8) -> bool {
        self.queue_remove_component_inner::<C>(entity, nth)
    }

    pub(crate) fn queue_add_component_inner<C: Component>(
        &self,
        entity: EntityRef,
        mut value: C,
    ) -> bool {
        let type_index = self.registry.index_of::<C>();
        let Some(owner) = self.entities.find_ext(entity.guid) else { return false };

        let buf = if self.ticking { Buf::Future } else { Buf::Present };
        let target = self.stores[type_index].run_end(buf, owner.index);
        value.set_owner(owner.index);

        let mut pending = self.pending.lock();
        pending.count_delta[type_index] += 1;
        pending.actions.push(Action {
            target,
            run_length: 0,
            owner_guid: owner.guid,
            owner_index: owner.index,
            type_index,
            destructive: false,
            payload: Payload::Add(Box::new(value)),
        });
        true
    }

    pub(crate) fn queue_remove_component_inner<C: Component>(
        &self,
        entity: EntityRef,
        nth: u8,
    ) -> bool {
        let type_index = self.registry.index_of::<C>();
        let Some(owner) = self.entities.find(entity.guid) else { return false };
        if nth >= self.entities.present_count(owner.index, type_index) {
            return false;
        }

        let buf = if self.ticking { Buf::Future } else { Buf::Present };
        let store = &*self.stores[type_index];
        let start = store.run_start(buf, owner.index);
        if start == store.len(buf) {
            return false;
        }
        let target = start + nth as usize;

        let mut pending = self.pending.lock();
        if pending.has_removal(target, 1, owner.guid) {
            return true;
        }
        pending.count_delta[type_index] -= 1;
        pending.actions.push(Action {
            target,
            run_length: 1,
            owner_guid: owner.guid,
            owner_index: owner.index,
            type_index,
            destructive: true,
            payload: Payload::Remove(C::ID),
        });
        true
    }

    /// Reads the entity's `nth` present-buffer record of `C` directly,
    /// without holding authority. Returns `None` when the entity is
    /// unknown or lacks the occurrence.
    pub fn get_present<C: Component>(&self, entity: EntityRef, nth: u8) -> Option<&C> {
        let (type_index, store) = self.typed_store::<C>();
        let owner = self.entities.find(entity.guid)?;
        if nth >= self.entities.present_count(owner.index, type_index) {
            return None;
        }
        let start = store.run_start(Buf::Present, owner.index);
        store.present.get(start + nth as usize)
    }

    /// Mutable access to the entity's `nth` future-buffer record of `C`.
    ///
    /// # Safety
    /// This bypasses the authority table. The caller must guarantee that
    /// no concurrently running process writes the same record.
    pub unsafe fn get_future<C: Component>(&self, entity: EntityRef, nth: u8) -> Option<&mut C> {
        let (type_index, store) = self.typed_store::<C>();
        let owner = self.entities.find(entity.guid)?;
        if nth >= self.entities.internal_count(owner.index, type_index) {
            return None;
        }
        let start = store.run_start(Buf::Future, owner.index);
        store.future_mut().get_mut(start + nth as usize)
    }

    /// Number of present-buffer records of `C` the entity owns.
    pub fn count_components<C: Component>(&self, entity: EntityRef) -> u8 {
        let type_index = self.registry.index_of::<C>();
        match self.entities.find(entity.guid) {
            Some(owner) => self.entities.present_count(owner.index, type_index),
            None => 0,
        }
    }

    /// Number of future-buffer records of `C` the entity owns, i.e. the
    /// count with applied mutations.
    pub fn count_future_components<C: Component>(&self, entity: EntityRef) -> u8 {
        let type_index = self.registry.index_of::<C>();
        match self.entities.find(entity.guid) {
            Some(owner) => self.entities.internal_count(owner.index, type_index),
            None => 0,
        }
    }

    /// Type-erased variant of [`get_present`](Self::get_present), keyed by
    /// the stable component id.
    pub fn raw_component(
        &self,
        entity: EntityRef,
        id: ComponentId,
        nth: u8,
    ) -> Option<&dyn AnyComp> {
        let type_index = self.registry.index_of_id(id)?;
        let owner = self.entities.find(entity.guid)?;
        if nth >= self.entities.present_count(owner.index, type_index) {
            return None;
        }
        let store = &*self.stores[type_index];
        let index = store.run_start(Buf::Present, owner.index) + nth as usize;
        (index < store.len(Buf::Present)).then(|| store.record_at(Buf::Present, index))
    }

    /// Type-erased variant of [`get_future`](Self::get_future).
    ///
    /// # Safety
    /// As [`get_future`](Self::get_future).
    pub unsafe fn raw_future_component(
        &self,
        entity: EntityRef,
        id: ComponentId,
        nth: u8,
    ) -> Option<&mut dyn AnyComp> {
        let type_index = self.registry.index_of_id(id)?;
        let owner = self.entities.find(entity.guid)?;
        if nth >= self.entities.internal_count(owner.index, type_index) {
            return None;
        }
        let store = &*self.stores[type_index];
        let index = store.run_start(Buf::Future, owner.index) + nth as usize;
        if index < store.len(Buf::Future) {
            Some(store.future_record_mut(index))
        } else {
            None
        }
    }

    /// Present-buffer record count keyed by the stable component id.
    /// Unknown ids count zero.
    pub fn raw_component_count(&self, entity: EntityRef, id: ComponentId) -> u8 {
        match (self.registry.index_of_id(id), self.entities.find(entity.guid)) {
            (Some(type_index), Some(owner)) => {
                self.entities.present_count(owner.index, type_index)
            }
            _ => 0,
        }
    }

    /// Future-buffer record count keyed by the stable component id.
    pub fn raw_future_component_count(&self, entity: EntityRef, id: ComponentId) -> u8 {
        match (self.registry.index_of_id(id), self.entities.find(entity.guid)) {
            (Some(type_index), Some(owner)) => {
                self.entities.internal_count(owner.index, type_index)
            }
            _ => 0,
        }
    }

    // ---- iterators ------------------------------------------------------

    /// Constructs a read-only iterator over entities carrying all of `R`,
    /// with optional access to `O`. Legal at any time.
    ///
    /// # Panics
    /// Panics when the type sets overlap or name unregistered types.
    pub fn read_iter<R: CompSet, O: CompSet>(&self) -> CompIter<'_, R, (), O> {
        CompIter::new_read(self)
    }

    // ---- processes ------------------------------------------------------

    /// Adds a process to the given group. The world takes ownership and
    /// drops the process at teardown.
    pub fn add_process(&mut self, process: Box<dyn Process>, group: GroupId) {
        while self.groups.len() <= group.0 {
            self.groups.push(Vec::new());
        }
        self.groups[group.0].push(ProcessEntry { process, enabled: true });
    }

    /// Removes and returns the first process with the given id.
    pub fn remove_process(&mut self, id: ProcessId) -> Option<Box<dyn Process>> {
        for group in &mut self.groups {
            if let Some(position) = group.iter().position(|entry| entry.process.type_id() == id) {
                return Some(group.remove(position).process);
            }
        }
        None
    }

    /// The first process with the given id.
    pub fn get_process_by_id(&self, id: ProcessId) -> Option<&dyn Process> {
        self.process_entry(id).map(|entry| entry.process.as_ref())
    }

    /// Enables or disables the first process with the given id.
    pub fn set_process_enabled(&mut self, id: ProcessId, enabled: bool) {
        for group in &mut self.groups {
            if let Some(entry) = group.iter_mut().find(|entry| entry.process.type_id() == id) {
                entry.enabled = enabled;
                return;
            }
        }
    }

    /// Whether the first process with the given id is enabled.
    /// Unknown processes report `false`.
    pub fn get_process_enabled(&self, id: ProcessId) -> bool {
        self.process_entry(id).map(|entry| entry.enabled).unwrap_or(false)
    }

    fn process_entry(&self, id: ProcessId) -> Option<&ProcessEntry> {
        self.groups
            .iter()
            .flat_map(|group| group.iter())
            .find(|entry| entry.process.type_id() == id)
    }

    /// Enables or disables a whole process group.
    pub fn set_process_group_enabled(&mut self, group: GroupId, enabled: bool) {
        if !enabled {
            if self.disabled_groups.len() <= group.0 {
                self.disabled_groups.resize(group.0 + 1, false);
            }
            self.disabled_groups.set(group.0, true);
        } else if group.0 < self.disabled_groups.len() {
            self.disabled_groups.set(group.0, false);
        }
    }

    /// Whether a process group is enabled. Groups default to enabled.
    pub fn get_process_group_enabled(&self, group: GroupId) -> bool {
        !self.disabled_groups.get(group.0).map(|bit| *bit).unwrap_or(false)
    }

    // ---- the tick -------------------------------------------------------

    /// Runs one tick: entity update, component update, process dispatch,
    /// buffer swap. `delta` is the tick delta in seconds, forwarded to
    /// every process.
    pub fn process(&mut self, delta: f64) -> Result<()> {
        if self.ticking {
            return Err(Error::InvalidProcessState);
        }
        self.ticking = true;
        self.metrics.reset(self.registry.len());
        self.tracer.start_tick(delta);

        let start = Instant::now();
        self.entity_update();
        self.metrics.entity_update = start.elapsed();
        self.tracer.entity_update(self.metrics.entity_update);

        let start = Instant::now();
        self.component_update();
        self.metrics.component_update = start.elapsed();
        self.tracer.component_update(self.metrics.component_update);

        let start = Instant::now();
        self.run_processes(delta);
        self.metrics.process_execution = start.elapsed();

        // Reserved for the external event library.
        let start = Instant::now();
        self.metrics.events = start.elapsed();
        self.tracer.events(self.metrics.events);

        self.finalize_tick();

        self.metrics.total = self.metrics.entity_update
            + self.metrics.component_update
            + self.metrics.process_execution
            + self.metrics.events;
        self.tracer.end_tick(&self.metrics);
        Ok(())
    }

    /// Applies queued entity removals, then queued additions.
    ///
    /// Removal relocates the entity's component records out of the buffers
    /// without destroying them; see the migration engine for why records
    /// must survive relocation.
    fn entity_update(&mut self) {
        let removals = std::mem::take(&mut self.entities.queues.get_mut().removals);
        for (guid, _) in removals {
            let Some(found) = self.entities.find(guid) else { continue };
            self.queue_entity_run_removals(found);
            self.entities.free_slot(found.index);
        }
        self.entities.apply_additions();
    }

    /// Queues one non-destructive removal per component type covering the
    /// entity's whole run.
    pub(crate) fn queue_entity_run_removals(&mut self, entity: EntityRef) {
        let type_count = self.registry.len();
        let pending = self.pending.get_mut();

        // The whole-run removal supersedes actions queued against this
        // entity earlier; letting them coexist would hand the apply pass
        // overlapping removal ranges.
        let mut delta_fixes = vec![0i64; type_count];
        pending.actions.retain(|action| {
            if action.owner_guid != entity.guid {
                return true;
            }
            match &action.payload {
                Payload::Add(_) => delta_fixes[action.type_index] -= 1,
                Payload::Remove(_) => delta_fixes[action.type_index] += action.run_length as i64,
            }
            false
        });
        for (type_index, fix) in delta_fixes.into_iter().enumerate() {
            pending.count_delta[type_index] += fix;
        }

        for (type_index, store) in self.stores.iter().enumerate() {
            let start = store.run_start(Buf::Present, entity.index);
            let end = store.run_end(Buf::Present, entity.index);
            if start == end {
                continue;
            }

            pending.count_delta[type_index] -= (end - start) as i64;
            pending.actions.push(Action {
                target: start,
                run_length: end - start,
                owner_guid: entity.guid,
                owner_index: entity.index,
                type_index,
                destructive: false,
                payload: Payload::Remove(store.component_id()),
            });
        }
    }

    /// Sorts the pending actions and rebuilds every type's future buffer.
    pub(crate) fn component_update(&mut self) {
        let pending = self.pending.get_mut();
        pending.sort_for_apply();

        for (type_index, store) in self.stores.iter_mut().enumerate() {
            store.apply_actions(
                type_index,
                &pending.actions,
                &mut self.entities,
                pending.count_delta[type_index],
                &mut self.metrics.components[type_index],
            );
        }
        pending.clear();
    }

    fn run_processes(&mut self, delta: f64) {
        let mut dispatcher =
            self.dispatcher.take().expect("dispatcher is present between ticks");
        let mut groups = std::mem::take(&mut self.groups);

        dispatcher.set_time(delta);
        for (ordinal, group) in groups.iter_mut().enumerate() {
            let group_id = GroupId(ordinal);
            self.tracer.start_group(group_id);
            for entry in group.iter_mut() {
                if entry.enabled && self.get_process_group_enabled(entry.process.group_id()) {
                    dispatcher.schedule(Task::new(entry.process.as_mut(), self));
                }
            }
            dispatcher.execute();
            // Successive groups start with a fresh authority table.
            self.authority.clear();
            self.tracer.end_group(group_id);
        }

        self.groups = groups;
        self.dispatcher = Some(dispatcher);
    }

    /// Swaps every type's buffers and commits the internal counts.
    pub(crate) fn finalize_tick(&mut self) {
        for store in &mut self.stores {
            store.swap();
        }
        self.entities.commit_counts();
        self.authority.clear();
        self.ticking = false;
    }

    // ---- miscellaneous --------------------------------------------------

    /// The timing snapshot of the most recent tick.
    pub fn metrics(&self) -> &WorldMetrics { &self.metrics }

    /// The opaque user slot carried by the world.
    pub fn user_data(&self) -> usize { self.user_data }

    /// Stores an opaque user value on the world.
    pub fn set_user_data(&mut self, data: usize) { self.user_data = data; }

    // ---- crate internals ------------------------------------------------

    pub(crate) fn registry(&self) -> &Registry { &self.registry }

    pub(crate) fn entities(&self) -> &entity::Table { &self.entities }

    pub(crate) fn entities_mut(&mut self) -> &mut entity::Table { &mut self.entities }

    pub(crate) fn authority(&self) -> &authority::Table { &self.authority }

    pub(crate) fn pending_mut(&mut self) -> &mut Pending { self.pending.get_mut() }

    pub(crate) fn tracer(&self) -> &dyn Tracer { self.tracer.as_ref() }

    pub(crate) fn store_at(&self, type_index: usize) -> &dyn AnyStore {
        &*self.stores[type_index]
    }

    pub(crate) fn store_at_mut(&mut self, type_index: usize) -> &mut dyn AnyStore {
        &mut *self.stores[type_index]
    }

    pub(crate) fn typed_store<C: Component>(&self) -> (usize, &Store<C>) {
        let type_index = self.registry.index_of::<C>();
        let store = self.stores[type_index]
            .as_any()
            .downcast_ref::<Store<C>>()
            .expect("store type matches the registry entry");
        (type_index, store)
    }
}

impl Drop for World {
    fn drop(&mut self) {
        for store in &mut self.stores {
            store.destroy_present();
        }
    }
}
