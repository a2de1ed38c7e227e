//! A double-buffered ECS runtime for simulation-style workloads.
//!
//! tandem stores plain-data components in per-type sorted buffers and runs a
//! scheduled set of "processes" every tick. Each component type owns *two*
//! buffers: the **present** buffer, which processes read, and the **future**
//! buffer, which processes write. Structural mutations (entity and component
//! adds/removes) requested during a tick are queued and merged into the
//! future buffers at the start of the next tick; the buffers are swapped
//! when the tick ends. A process therefore always observes the world state
//! committed by the previous tick, and its writes only become visible after
//! the swap.
//!
//! # Processes, groups and authority
//! Processes are grouped; groups execute in ascending order with a full
//! barrier between them, while processes *within* a group may run
//! concurrently on the configured [`Dispatcher`]. Write access to a
//! component type's future buffer is arbitrated by an *authority* table:
//! the first iterator to request a type records its [`Key`], and further
//! requests in the same group are only granted when they carry the same
//! non-null key. Matching keys are a promise that the holders touch
//! disjoint fields; the runtime verifies the keys, not the promise.
//!
//! # Worlds
//! A [`World`] owns its entities, component buffers, processes and
//! dispatcher. Entities are lightweight handles ([`EntityRef`]) resolved by
//! GUID; they can be migrated, together with all their component records,
//! to another world with the same component signature.

#![warn(missing_docs)]

pub mod comp;
pub use comp::{AnyComp, Component, ComponentId, Registry};

pub mod data_queue;
pub use data_queue::DataQueue;

pub mod dispatch;
pub use dispatch::{Dispatcher, Pool, Serial, Task};

pub mod entity;
pub use entity::{EntityRef, Guid, Index};

mod error;
pub use error::{Error, Result};

pub mod process;
pub use process::{GroupId, Process, ProcessId};

#[cfg(test)]
pub(crate) mod test_util;

pub(crate) mod util;

pub mod world;
pub use world::{Builder, CompIter, Key, World, WorldMetrics, WorldView};
