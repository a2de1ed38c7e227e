//! Shared fixtures for unit and scenario tests.

use parking_lot::Mutex;

use crate::comp::{Component, ComponentId};
use crate::entity::{EntityRef, Guid, Index};
use crate::process::{GroupId, Process, ProcessId};
use crate::world::WorldView;

/// A kinematic test component, one record per moving entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Motion {
    owner:         Index,
    pub(crate) pos: [f32; 3],
    pub(crate) vel: [f32; 3],
}

impl Motion {
    pub(crate) fn at(vel: [f32; 3]) -> Self {
        Self { owner: Index::INVALID, pos: [0.0; 3], vel }
    }
}

impl Component for Motion {
    const ID: ComponentId = ComponentId(0);
    const NAME: &'static str = "Motion";

    fn owner(&self) -> Index { self.owner }

    fn set_owner(&mut self, owner: Index) { self.owner = owner; }
}

/// A one-value marker component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Flag {
    owner:            Index,
    pub(crate) value: i32,
}

impl Flag {
    pub(crate) fn new(value: i32) -> Self { Self { owner: Index::INVALID, value } }
}

impl Component for Flag {
    const ID: ComponentId = ComponentId(1);
    const NAME: &'static str = "Flag";

    fn owner(&self) -> Index { self.owner }

    fn set_owner(&mut self, owner: Index) { self.owner = owner; }
}

static DESTROYED_TOKENS: Mutex<Vec<i32>> = Mutex::new(Vec::new());

/// Records its token on `destroy`, so tests can count destructor calls.
/// Use a token range unique to the test; tests run concurrently.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tracked {
    owner:            Index,
    pub(crate) token: i32,
}

impl Tracked {
    pub(crate) fn new(token: i32) -> Self { Self { owner: Index::INVALID, token } }

    pub(crate) fn destroyed(token: i32) -> usize {
        DESTROYED_TOKENS.lock().iter().filter(|&&t| t == token).count()
    }
}

impl Component for Tracked {
    const ID: ComponentId = ComponentId(2);
    const NAME: &'static str = "Tracked";

    fn owner(&self) -> Index { self.owner }

    fn set_owner(&mut self, owner: Index) { self.owner = owner; }

    fn destroy(&mut self) { DESTROYED_TOKENS.lock().push(self.token); }
}

static COMPLETED_GUIDS: Mutex<Vec<Guid>> = Mutex::new(Vec::new());

/// A custom-migration component referencing a sibling entity by GUID.
///
/// Migrating a `Linked` record requests the sibling's migration through
/// `on_migrate` and records the owning entity's GUID when
/// `on_migrate_complete` fires.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Linked {
    owner:              Index,
    pub(crate) sibling: Guid,
}

impl Linked {
    pub(crate) fn to(sibling: Guid) -> Self { Self { owner: Index::INVALID, sibling } }

    pub(crate) fn completions(guid: Guid) -> usize {
        COMPLETED_GUIDS.lock().iter().filter(|&&g| g == guid).count()
    }
}

impl Component for Linked {
    const ID: ComponentId = ComponentId(3);
    const NAME: &'static str = "Linked";
    const CUSTOM_MIGRATION: bool = true;

    fn owner(&self) -> Index { self.owner }

    fn set_owner(&mut self, owner: Index) { self.owner = owner; }

    fn on_migrate(&mut self, _dest: EntityRef, inherited: &mut Vec<EntityRef>) {
        if self.sibling.is_valid() {
            inherited.push(EntityRef::from_guid(self.sibling));
        }
    }

    fn on_migrate_complete(&mut self, dest: EntityRef) {
        COMPLETED_GUIDS.lock().push(dest.guid);
    }
}

/// A process defined by a closure, for scenario tests.
pub(crate) struct FnProcess<F> {
    id:    ProcessId,
    group: GroupId,
    run:   F,
}

impl<F: FnMut(WorldView<'_>, f64) + Send> Process for FnProcess<F> {
    fn execute(&mut self, world: WorldView<'_>, time: f64) { (self.run)(world, time); }

    fn type_id(&self) -> ProcessId { self.id }

    fn group_id(&self) -> GroupId { self.group }
}

pub(crate) fn process<F: FnMut(WorldView<'_>, f64) + Send + 'static>(
    id: usize,
    group: usize,
    run: F,
) -> Box<dyn Process> {
    Box::new(FnProcess { id: ProcessId(id), group: GroupId(group), run })
}
