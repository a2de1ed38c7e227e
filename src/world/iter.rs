//! Component iterators and the tuple sets that parameterize them.

use std::any::TypeId;
use std::marker::PhantomData;

use crate::comp::{Component, ComponentId};
use crate::entity::{EntityRef, Index};
use crate::error::{Error, Result};
use crate::world::authority::Key;
use crate::world::store::Buf;
use crate::world::World;

/// Linear-probe window before positioning falls back to binary search.
///
/// Spatially coherent entity layouts mostly advance by one or two records
/// per step; this is a tunable measurement, not a contract.
const PROBE_WINDOW: usize = 5;

/// A set of component types given as a tuple, e.g. `(Motion, Health)`.
///
/// The unit type is the empty set. Sets passed to one iterator must be
/// pairwise disjoint.
pub trait CompSet: 'static {
    /// Number of component types in the set.
    const LEN: usize;

    /// Appends each member's stable id in declaration order.
    fn ids(out: &mut Vec<ComponentId>);

    /// Appends each member's `TypeId` in declaration order.
    fn type_ids(out: &mut Vec<TypeId>);

    /// The position of `C` within the set.
    fn position_of<C: Component>() -> Option<usize>;
}

macro_rules! impl_comp_set {
    (@count) => { 0 };
    (@count $head:ident $($tail:ident)*) => { 1 + impl_comp_set!(@count $($tail)*) };
    ($($ty:ident)*) => {
        impl<$($ty: Component),*> CompSet for ($($ty,)*) {
            const LEN: usize = impl_comp_set!(@count $($ty)*);

            fn ids(out: &mut Vec<ComponentId>) { out.extend_from_slice(&[$($ty::ID),*]); }

            fn type_ids(out: &mut Vec<TypeId>) {
                out.extend_from_slice(&[$(TypeId::of::<$ty>()),*]);
            }

            fn position_of<C: Component>() -> Option<usize> {
                let members: [TypeId; impl_comp_set!(@count $($ty)*)] =
                    [$(TypeId::of::<$ty>()),*];
                members.iter().position(|&ty| ty == TypeId::of::<C>())
            }
        }
    };
}

impl_comp_set!();
impl_comp_set!(T0);
impl_comp_set!(T0 T1);
impl_comp_set!(T0 T1 T2);
impl_comp_set!(T0 T1 T2 T3);
impl_comp_set!(T0 T1 T2 T3 T4);
impl_comp_set!(T0 T1 T2 T3 T4 T5);
impl_comp_set!(T0 T1 T2 T3 T4 T5 T6);
impl_comp_set!(T0 T1 T2 T3 T4 T5 T6 T7);

#[derive(Clone, Copy)]
struct Track {
    type_index: usize,
    buf:        Buf,
}

/// A cursor over the entities carrying all components of `R` and `A`.
///
/// * `R` — required types, readable from the present buffers.
/// * `A` — authority types, readable from present and writable in the
///   future buffers; authority over each is acquired at construction.
/// * `O` — optional types, accessed with explicit nullability.
///
/// The cursor walks entity slots in table order; per-type buffer indices
/// are refreshed lazily on access, probing linearly from the previous
/// position before binary-searching. Obtain instances from
/// [`WorldView::iter`](super::WorldView::iter) or
/// [`World::read_iter`](super::World::read_iter), then drive them with
/// [`advance`](Self::advance):
///
/// ```ignore
/// let mut iter = world.iter::<(), (Motion,), ()>(Some(key))?;
/// while iter.advance() {
///     let motion = iter.edit::<Motion>(0)?;
///     // ...
/// }
/// ```
pub struct CompIter<'w, R: CompSet, A: CompSet, O: CompSet> {
    world:    &'w World,
    /// Tracked buffer positions, laid out
    /// `[R | A present | A future | O present | O future]`.
    tracks:   Vec<Track>,
    indices:  Vec<usize>,
    /// Registry indices of `R ∪ A`: the visit filter.
    filter:   Vec<usize>,
    /// Registry indices of `O`, gating optional index refreshes.
    optional: Vec<usize>,
    pos:      Option<usize>,
    started:  bool,
    skip:     usize,
    outdated: bool,
    _ph:      PhantomData<(R, A, O)>,
}

impl<'w, R: CompSet, O: CompSet> CompIter<'w, R, (), O> {
    pub(crate) fn new_read(world: &'w World) -> Self { Self::construct(world) }
}

impl<'w, R: CompSet, A: CompSet, O: CompSet> CompIter<'w, R, A, O> {
    /// Builds an authoritative iterator sharing one key across all of `A`.
    pub(crate) fn new_authoritative(world: &'w World, key: Option<Key>) -> Result<Self> {
        if !world.is_ticking() {
            return Err(Error::InvalidProcessState);
        }

        let iter = Self::construct(world);
        world
            .authority()
            .acquire(iter.authority_types(), std::iter::repeat(&key))?;
        Ok(iter)
    }

    /// Builds an authoritative iterator with one key per type in `A`.
    pub(crate) fn new_authoritative_with_keys(
        world: &'w World,
        keys: &[Option<Key>],
    ) -> Result<Self> {
        if !world.is_ticking() {
            return Err(Error::InvalidProcessState);
        }
        if keys.len() != A::LEN {
            return Err(Error::MissingAuthority);
        }

        let iter = Self::construct(world);
        world.authority().acquire(iter.authority_types(), keys.iter())?;
        Ok(iter)
    }

    fn construct(world: &'w World) -> Self {
        let mut type_ids = Vec::new();
        R::type_ids(&mut type_ids);
        A::type_ids(&mut type_ids);
        O::type_ids(&mut type_ids);
        for (i, ty) in type_ids.iter().enumerate() {
            assert!(!type_ids[..i].contains(ty), "iterator type sets must be disjoint");
        }

        let mut ids = Vec::new();
        R::ids(&mut ids);
        A::ids(&mut ids);
        O::ids(&mut ids);
        let resolved: Vec<usize> = ids
            .iter()
            .map(|&id| {
                world.registry().index_of_id(id).unwrap_or_else(|| {
                    panic!("component id {id:?} is not part of this world's signature")
                })
            })
            .collect();
        let (required, rest) = resolved.split_at(R::LEN);
        let (auth, optional) = rest.split_at(A::LEN);

        let mut tracks = Vec::with_capacity(R::LEN + 2 * A::LEN + 2 * O::LEN);
        tracks.extend(required.iter().map(|&type_index| Track { type_index, buf: Buf::Present }));
        tracks.extend(auth.iter().map(|&type_index| Track { type_index, buf: Buf::Present }));
        tracks.extend(auth.iter().map(|&type_index| Track { type_index, buf: Buf::Future }));
        tracks.extend(optional.iter().map(|&type_index| Track { type_index, buf: Buf::Present }));
        tracks.extend(optional.iter().map(|&type_index| Track { type_index, buf: Buf::Future }));

        Self {
            world,
            indices: vec![0; tracks.len()],
            filter: [required, auth].concat(),
            optional: optional.to_vec(),
            tracks,
            pos: None,
            started: false,
            skip: 0,
            outdated: true,
            _ph: PhantomData,
        }
    }

    fn authority_types(&self) -> impl Iterator<Item = usize> + '_ {
        self.tracks[R::LEN..R::LEN + A::LEN].iter().map(|track| track.type_index)
    }

    /// Positions the cursor on the next entity that is live and carries
    /// every type of `R` and `A`. Returns `false` when the table is
    /// exhausted.
    pub fn advance(&mut self) -> bool {
        let entities = self.world.entities();
        let len = entities.slot_count();

        let mut next = match self.pos {
            Some(current) => current + 1,
            None if !self.started => {
                self.started = true;
                0
            }
            None => return false,
        };

        loop {
            if next >= len {
                self.pos = None;
                self.outdated = true;
                return false;
            }

            self.skip += 1;
            let index = Index(next as u32);
            if entities.is_live(index)
                && self.filter.iter().all(|&ti| entities.present_count(index, ti) > 0)
            {
                break;
            }
            next += 1;
        }

        self.pos = Some(next);
        self.outdated = true;
        true
    }

    /// Advances `count` times; returns whether the cursor is positioned.
    pub fn advance_by(&mut self, count: usize) -> bool {
        for _ in 0..count {
            if !self.advance() {
                return false;
            }
        }
        self.outdated = true;
        self.pos.is_some()
    }

    /// The handle of the entity under the cursor.
    pub fn entity_ref(&self) -> Result<EntityRef> {
        let pos = self.position()?;
        Ok(self
            .world
            .entities()
            .handle_at(Index(pos as u32))
            .expect("cursor stays within the entity table"))
    }

    /// Reads the entity's `nth` present-buffer record of `C`.
    ///
    /// # Panics
    /// Panics when `C` is in neither `R` nor `A`.
    pub fn get<C: Component>(&mut self, nth: u8) -> Result<&C> {
        let owner = self.prepare()?;
        let slot = R::position_of::<C>()
            .or_else(|| A::position_of::<C>().map(|position| R::LEN + position))
            .expect("component type must be in the iterator's required or authority set");

        let (_, store) = self.world.typed_store::<C>();
        match store.present.get(self.indices[slot] + nth as usize) {
            Some(record) if Component::owner(record) == owner => Ok(record),
            _ => Err(Error::OutOfRange),
        }
    }

    /// Mutably accesses the entity's `nth` future-buffer record of `C`.
    ///
    /// # Panics
    /// Panics when `C` is not in `A`.
    pub fn edit<C: Component>(&mut self, nth: u8) -> Result<&mut C> {
        let owner = self.prepare()?;
        let position = A::position_of::<C>()
            .expect("component type must be in the iterator's authority set");
        let slot = R::LEN + A::LEN + position;
        let index = self.indices[slot] + nth as usize;

        let (_, store) = self.world.typed_store::<C>();
        // Safety: authority over C was acquired at construction, and
        // `&mut self` serializes access through this iterator; writers
        // under other iterators are bound by the matching-key contract.
        let future = unsafe { store.future_mut() };
        match future.get_mut(index) {
            Some(record) if Component::owner(record) == owner => Ok(record),
            _ => Err(Error::OutOfRange),
        }
    }

    /// Reads the entity's `nth` present-buffer record of the optional
    /// type `C`; `None` when the entity lacks the occurrence.
    ///
    /// # Panics
    /// Panics when `C` is not in `O`.
    pub fn get_optional<C: Component>(&mut self, nth: u8) -> Result<Option<&C>> {
        let owner = self.prepare()?;
        let position = O::position_of::<C>()
            .expect("component type must be in the iterator's optional set");
        let slot = R::LEN + 2 * A::LEN + position;

        let (_, store) = self.world.typed_store::<C>();
        Ok(match store.present.get(self.indices[slot] + nth as usize) {
            Some(record) if Component::owner(record) == owner => Some(record),
            _ => None,
        })
    }

    /// Mutably accesses the entity's `nth` future-buffer record of the
    /// optional type `C`; `None` when the entity lacks the occurrence.
    /// Optional edits are not arbitrated by the authority table; callers
    /// coordinate them out of band.
    ///
    /// # Panics
    /// Panics when `C` is not in `O`.
    pub fn edit_optional<C: Component>(&mut self, nth: u8) -> Result<Option<&mut C>> {
        let owner = self.prepare()?;
        let position = O::position_of::<C>()
            .expect("component type must be in the iterator's optional set");
        let slot = R::LEN + 2 * A::LEN + O::LEN + position;
        let index = self.indices[slot] + nth as usize;

        let (_, store) = self.world.typed_store::<C>();
        // Safety: see the method docs; exclusivity over optional records
        // is delegated to the caller, matching the raw future accessors.
        let future = unsafe { store.future_mut() };
        Ok(match future.get_mut(index) {
            Some(record) if Component::owner(record) == owner => Some(record),
            _ => None,
        })
    }

    /// Present-buffer record count of `C` on the entity under the cursor.
    pub fn count<C: Component>(&self) -> Result<u8> {
        let pos = self.position()?;
        let type_index = self.world.registry().index_of::<C>();
        Ok(self.world.entities().present_count(Index(pos as u32), type_index))
    }

    /// Future-buffer record count of `C` on the entity under the cursor.
    pub fn count_edit<C: Component>(&self) -> Result<u8> {
        let pos = self.position()?;
        let type_index = self.world.registry().index_of::<C>();
        Ok(self.world.entities().internal_count(Index(pos as u32), type_index))
    }

    fn position(&self) -> Result<usize> { self.pos.ok_or(Error::InvalidIteratorState) }

    fn prepare(&mut self) -> Result<Index> {
        let pos = self.position()?;
        if self.outdated {
            self.refresh_indices();
        }
        Ok(Index(pos as u32))
    }

    fn refresh_indices(&mut self) {
        let pos = self.pos.expect("iterator is positioned");
        let owner = Index(pos as u32);
        let entities = self.world.entities();
        let core = R::LEN + 2 * A::LEN;

        for slot in 0..core {
            self.update_index(slot, owner);
        }
        if O::LEN > 0 {
            // Stale optional indices are harmless: the owner check on
            // access turns them into None.
            if self.optional.iter().any(|&ti| entities.present_count(owner, ti) > 0) {
                for slot in core..core + O::LEN {
                    self.update_index(slot, owner);
                }
            }
            if self.optional.iter().any(|&ti| entities.internal_count(owner, ti) > 0) {
                for slot in core + O::LEN..core + 2 * O::LEN {
                    self.update_index(slot, owner);
                }
            }
        }

        self.outdated = false;
        self.skip = 0;
    }

    fn update_index(&mut self, slot: usize, owner: Index) {
        let track = self.tracks[slot];
        let store = self.world.store_at(track.type_index);

        if self.skip < PROBE_WINDOW {
            for step in 0..=self.skip {
                let candidate = self.indices[slot] + step;
                if candidate >= store.len(track.buf) {
                    break;
                }
                if store.owner_at(track.buf, candidate) == owner {
                    self.indices[slot] = candidate;
                    return;
                }
            }
        }

        self.indices[slot] = store.run_start(track.buf, owner);
    }
}
