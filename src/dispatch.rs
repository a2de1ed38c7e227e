//! Process dispatch: the interface the tick driver requires, plus the two
//! reference dispatchers.

use crate::process::Process;
use crate::world::{World, WorldView};

mod pool;
pub use pool::Pool;
mod serial;
pub use serial::Serial;

/// Executes the processes of one group.
///
/// The tick driver drives a dispatcher in three steps per group:
/// [`set_time`](Self::set_time) once per tick, [`schedule`](Self::schedule)
/// for every enabled process of the group, then [`execute`](Self::execute),
/// which must block until every scheduled process has finished. The core
/// treats dispatch as opaque; anything satisfying this contract can be
/// plugged into [`crate::Builder::dispatcher`].
///
/// # Contract
/// Scheduled [`Task`]s borrow the world and the process they wrap.
/// A dispatcher must run every task before `execute` returns and must not
/// retain tasks beyond that point; the world reclaims both borrows as soon
/// as the call returns.
pub trait Dispatcher: Send {
    /// Records the tick delta passed to every process this tick.
    fn set_time(&mut self, time: f64);

    /// Accepts a process for execution. Implementations may run the task
    /// inline or defer it until [`execute`](Self::execute).
    fn schedule(&mut self, task: Task);

    /// Blocks until all scheduled processes have finished, then drops the
    /// scheduled tasks.
    fn execute(&mut self);
}

/// One scheduled process execution, bound to the world it runs against.
///
/// The pointers inside are raw because a dispatcher stores tasks across
/// the `schedule`/`execute` boundary while the borrows formally live in
/// the tick driver's stack frame. [`run`](Self::run) is only sound within
/// the dispatcher contract above.
pub struct Task {
    process: *mut dyn Process,
    world:   *const World,
}

impl Task {
    pub(crate) fn new(process: &mut dyn Process, world: &World) -> Self {
        // Safety: erasing the borrow lifetimes here only affects the type
        // used to compute the raw pointers below; the dispatcher contract
        // documented above is what actually keeps them valid.
        let process: &mut (dyn Process + 'static) = unsafe { std::mem::transmute(process) };
        let world: &'static World = unsafe { std::mem::transmute(world) };
        Self { process: process as *mut dyn Process, world: world as *const World }
    }

    /// Runs the wrapped process with the given tick delta.
    ///
    /// Each task is run at most once per tick; concurrent claimants must
    /// arbitrate (see [`Pool`]) so that only one of them calls `run`.
    pub fn run(&self, time: f64) {
        // Safety: the tick driver keeps the process and the world alive
        // until Dispatcher::execute returns, and the dispatcher contract
        // forbids running tasks after that. Exclusivity of the &mut
        // process reference is the single-runner rule above.
        let (process, world) = unsafe { (&mut *self.process, &*self.world) };
        process.execute(WorldView::new(world), time);
    }
}

// Safety: Process is Send, and the world surface reachable from a task —
// WorldView — confines shared mutation to lock-protected queues and to
// authority-arbitrated future-buffer cells. The raw pointers themselves
// never outlive the tick (dispatcher contract).
unsafe impl Send for Task {}
// Safety: run takes &self and the claim protocol guarantees one runner;
// everything else reachable through &Task is read-only.
unsafe impl Sync for Task {}
