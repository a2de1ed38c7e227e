//! The per-tick unit of work and its identity.

use crate::world::WorldView;

/// The stable numeric identifier of a process type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub usize);

/// The ordinal of a process group.
///
/// Groups execute in ascending order with a full barrier and an
/// authority-table clear between them; group ids are expected to be
/// small, since they index the world's group list directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub usize);

/// A user object invoked once per tick.
///
/// Processes are owned by the world and destroyed with it. They read the
/// present buffers and write the future buffers through iterators obtained
/// from the [`WorldView`] passed to [`execute`](Self::execute).
///
/// Processes in the same group may run concurrently on worker threads;
/// ordering within a group is unspecified. A process must return — there
/// is no cancellation. A panic escaping `execute` tears down the worker it
/// runs on and, through it, the tick; implementations that host untrusted
/// process code should catch and convert such faults themselves.
pub trait Process: Send {
    /// Runs one tick worth of work. `time` is the tick delta in seconds.
    fn execute(&mut self, world: WorldView<'_>, time: f64);

    /// The stable id of this process, used for lookup and enablement.
    fn type_id(&self) -> ProcessId;

    /// The ordinal group this process declares itself part of.
    /// Group enablement checks consult this value.
    fn group_id(&self) -> GroupId;
}
