//! The entity-migration engine.
//!
//! Migration moves an entity and all its component records to another
//! world with the same component signature. Component types that declare
//! custom migration handling get a chance to request that further entities
//! follow (preserving referential closure) and are notified once the
//! destination state is committed.

use indexmap::IndexSet;

use crate::comp::AnyComp;
use crate::entity::{EntityRef, Guid};
use crate::error::{Error, Result};
use crate::world::store::Buf;
use crate::world::World;

impl World {
    /// Migrates the entity and, transitively, every entity its components
    /// request through their `on_migrate` hooks.
    ///
    /// Both worlds must be idle ([`Error::InvalidProcessState`] otherwise).
    /// An unknown or invalid handle migrates to [`EntityRef::INVALID`].
    /// When a component record cannot be added to the destination, the
    /// call fails with [`Error::MigrationFailure`] and the pending queues
    /// of both worlds are left as they are: the caller observes the
    /// remnants, no rollback is attempted.
    ///
    /// # Panics
    /// Panics when the component signatures of the worlds differ.
    pub fn migrate(&mut self, dest: &mut World, entity: EntityRef) -> Result<EntityRef> {
        assert!(
            self.registry().matches(dest.registry()),
            "worlds must share a component signature to exchange entities"
        );
        if self.is_ticking() || dest.is_ticking() {
            return Err(Error::InvalidProcessState);
        }

        let mut inherited = vec![entity];
        let mut performed_guids = IndexSet::<Guid>::new();
        let mut performed = Vec::new();

        let first = self.perform_migration(dest, entity, &mut inherited)?;
        performed_guids.insert(entity.guid);
        if !first.is_valid() {
            return Ok(EntityRef::INVALID);
        }
        performed.push(first);

        // Hooks may have appended more entities; migrate until the
        // performed set covers the inherited set.
        while let Some(next) = inherited
            .iter()
            .copied()
            .find(|entity| !performed_guids.contains(&entity.guid))
        {
            let migrated = self.perform_migration(dest, next, &mut inherited)?;
            performed_guids.insert(next.guid);
            if migrated.is_valid() {
                performed.push(migrated);
            }
        }

        // Commit the relocations on both sides.
        self.component_update();
        self.finalize_tick();
        dest.component_update();
        dest.finalize_tick();

        for migrated in &performed {
            dest.notify_migrated(*migrated);
            self.tracer().migrated(migrated.guid);
        }

        Ok(first)
    }

    /// Moves one entity: slot copy, non-destructive source removal, record
    /// copies with `on_migrate` hooks.
    fn perform_migration(
        &mut self,
        dest: &mut World,
        entity: EntityRef,
        inherited: &mut Vec<EntityRef>,
    ) -> Result<EntityRef> {
        let Some(source) = self.entities().find(entity.guid) else {
            return Ok(EntityRef::INVALID);
        };

        // The destination keeps the GUID; the counter is process-wide, so
        // it cannot collide with a destination entity.
        let dest_ref = dest.entities_mut().adopt(source.guid, source.user_value);

        // Relocate the source records out of the buffers without running
        // destroy: their copies live on in the destination.
        self.queue_entity_run_removals(source);

        for type_index in 0..self.registry().len() {
            let store = self.store_at(type_index);
            let (start, end) =
                (store.run_start(Buf::Present, source.index), store.run_end(Buf::Present, source.index));

            for record_index in start..end {
                let record = self
                    .store_at_mut(type_index)
                    .migrate_out(record_index, dest_ref, inherited);
                if !dest.add_erased(dest_ref, &*record) {
                    return Err(Error::MigrationFailure {
                        component: record.component_id(),
                        guid:      source.guid,
                    });
                }
            }
        }

        // The queued removals carry the now-dead GUID; their count fixups
        // resolve to nothing, the slot counts are zeroed here.
        self.entities_mut().free_slot(source.index);
        self.entities_mut().invalidate_search();

        Ok(dest_ref)
    }

    /// Type-erased immediate component addition, the destination-side
    /// half of a record transfer.
    pub(crate) fn add_erased(&mut self, entity: EntityRef, record: &dyn AnyComp) -> bool {
        let Some(type_index) = self.registry().index_of_id(record.component_id()) else {
            return false;
        };
        let Some(owner) = self.entities().find(entity.guid) else { return false };
        if self.entities().internal_count(owner.index, type_index) == u8::MAX {
            return false;
        }

        let position = self.store_at_mut(type_index).insert_now(record, owner.index);
        self.entities_mut().bump_present(owner.index, type_index);
        self.entities_mut().bump_internal(owner.index, type_index);
        self.pending_mut().fix_up_insertion(type_index, position);
        true
    }

    /// Runs `on_migrate_complete` on every record of every
    /// custom-migration type the migrated entity owns.
    fn notify_migrated(&mut self, entity: EntityRef) {
        let Some(found) = self.entities().find(entity.guid) else { return };
        for type_index in 0..self.registry().len() {
            if self.registry().entry(type_index).custom_migration {
                self.store_at_mut(type_index).notify_migrated(found.index, found);
            }
        }
    }
}
