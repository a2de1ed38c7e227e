//! The pending component-mutation queue.
//!
//! Structural component changes are never applied to the buffers directly
//! during a tick. They are recorded here and merged into each type's
//! future buffer during the component-update phase; see
//! [`super::store`] for the merge itself.

use crate::comp::{AnyComp, ComponentId};
use crate::entity::{Guid, Index};

/// The payload of one queued action: a component value to add, or a
/// removal tagged with the component id.
pub(crate) enum Payload {
    Add(Box<dyn AnyComp>),
    Remove(ComponentId),
}

/// One queued add or removal.
///
/// `target` is the position inside the affected type's buffer *at the
/// moment of queuing* — the future buffer when queued during a tick, the
/// present buffer otherwise; both designate the same buffer by the time
/// the action is applied. The owner fields are a snapshot; the apply pass
/// re-resolves the entity by GUID because its slot may have changed.
pub(crate) struct Action {
    pub(crate) target:      usize,
    /// 0 for adds; the number of removed records for removals.
    pub(crate) run_length:  usize,
    pub(crate) owner_guid:  Guid,
    pub(crate) owner_index: Index,
    /// Registry index of the affected component type.
    pub(crate) type_index:  usize,
    /// Whether a removal runs `destroy` on the removed records.
    pub(crate) destructive: bool,
    pub(crate) payload:     Payload,
}

/// The queue state, plus the per-type record-count deltas used to pre-size
/// the future buffers.
pub(crate) struct Pending {
    pub(crate) actions:     Vec<Action>,
    pub(crate) count_delta: Vec<i64>,
}

impl Pending {
    pub(crate) fn new(type_count: usize) -> Self {
        Self { actions: Vec::new(), count_delta: vec![0; type_count] }
    }

    /// Sorts the queue into application order.
    ///
    /// The apply pass walks each buffer front to back, so actions must be
    /// ordered by target position, with the owner fields as tiebreakers to
    /// keep same-position actions deterministic.
    pub(crate) fn sort_for_apply(&mut self) {
        self.actions
            .sort_by_key(|action| (action.target, action.owner_index, action.owner_guid));
    }

    /// Whether an equivalent destructive removal is already queued.
    pub(crate) fn has_removal(&self, target: usize, run_length: usize, owner: Guid) -> bool {
        self.actions.iter().any(|action| {
            action.destructive
                && action.target == target
                && action.run_length == run_length
                && action.owner_guid == owner
        })
    }

    /// Shifts queued targets after an immediate insertion into the present
    /// buffer of `type_index` at `position`.
    pub(crate) fn fix_up_insertion(&mut self, type_index: usize, position: usize) {
        for action in &mut self.actions {
            if action.type_index == type_index && action.target >= position {
                action.target += 1;
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.actions.clear();
        self.count_delta.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comp::Component;
    use crate::test_util::Flag;

    fn removal(target: usize, owner_index: u32, owner_guid: u64) -> Action {
        Action {
            target,
            run_length: 1,
            owner_guid: Guid(owner_guid),
            owner_index: Index(owner_index),
            type_index: 0,
            destructive: true,
            payload: Payload::Remove(Flag::ID),
        }
    }

    #[test]
    fn sort_orders_by_target_then_owner() {
        let mut pending = Pending::new(1);
        pending.actions.push(removal(4, 1, 10));
        pending.actions.push(removal(2, 9, 11));
        pending.actions.push(removal(4, 0, 12));
        pending.sort_for_apply();

        let order: Vec<_> =
            pending.actions.iter().map(|a| (a.target, a.owner_index.0)).collect();
        assert_eq!(order, vec![(2, 9), (4, 0), (4, 1)]);
    }

    #[test]
    fn fix_up_only_shifts_same_type_at_or_after_position() {
        let mut pending = Pending::new(2);
        pending.actions.push(removal(3, 0, 1));
        let mut other_type = removal(5, 0, 2);
        other_type.type_index = 1;
        pending.actions.push(other_type);
        pending.actions.push(removal(2, 0, 3));

        pending.fix_up_insertion(0, 3);
        let targets: Vec<_> = pending.actions.iter().map(|a| a.target).collect();
        assert_eq!(targets, vec![4, 5, 2]);
    }

    #[test]
    fn removal_deduplication_matches_on_all_fields() {
        let mut pending = Pending::new(1);
        pending.actions.push(removal(3, 0, 7));

        assert!(pending.has_removal(3, 1, Guid(7)));
        assert!(!pending.has_removal(3, 2, Guid(7)));
        assert!(!pending.has_removal(4, 1, Guid(7)));
        assert!(!pending.has_removal(3, 1, Guid(8)));
    }
}
