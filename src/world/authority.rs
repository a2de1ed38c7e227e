//! The per-type authority (cooperative borrow) table.

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// An opaque authority key, compared by address.
///
/// Processes that agree to co-write one component type's future buffer
/// anchor their keys on the same object; the table only verifies key
/// equality, never that the holders actually touch disjoint fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key(usize);

impl Key {
    /// Derives a key from the address of an anchor value.
    ///
    /// The anchor must outlive the tick; a `static` is the usual choice.
    pub fn of<T>(anchor: &T) -> Self { Self(anchor as *const T as usize) }
}

#[derive(Clone, Copy, Default)]
struct Slot {
    requested: bool,
    key:       Option<Key>,
}

/// One `(requested, key)` record per component type.
///
/// Requests arrive from iterator construction inside concurrently running
/// processes, so the slots live behind a mutex; the tick driver clears the
/// table at every group boundary and at end of tick.
pub(crate) struct Table {
    slots: Mutex<Vec<Slot>>,
}

impl Table {
    pub(crate) fn new(type_count: usize) -> Self {
        Self { slots: Mutex::new(vec![Slot::default(); type_count]) }
    }

    /// Requests authority over the given types, one key per type.
    ///
    /// A type nobody holds is granted and records the key. A held type is
    /// only re-granted when the incoming key is non-null and equal to the
    /// recorded one. On conflict the request fails with
    /// [`Error::AuthorityConflict`]; grants made earlier in the same
    /// request stand until the next table clear.
    pub(crate) fn acquire<'k>(
        &self,
        types: impl Iterator<Item = usize>,
        mut keys: impl Iterator<Item = &'k Option<Key>>,
    ) -> Result<()> {
        let mut slots = self.slots.lock();
        for type_index in types {
            let key = *keys.next().ok_or(Error::MissingAuthority)?;
            let slot = &mut slots[type_index];

            if slot.requested && (key.is_none() || slot.key != key) {
                return Err(Error::AuthorityConflict);
            }
            *slot = Slot { requested: true, key };
        }
        Ok(())
    }

    pub(crate) fn clear(&self) {
        for slot in self.slots.lock().iter_mut() {
            *slot = Slot::default();
        }
    }
}
