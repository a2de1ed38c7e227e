//! Exposes testing, profiling and tracing capabilities.

use std::time::Duration;

use crate::entity::Guid;
use crate::process::GroupId;
use crate::world::WorldMetrics;

/// A handler that receives the events of a tick and of migrations.
///
/// All methods default to no-ops; implement the ones of interest.
/// Can be used for profiling and testing.
pub trait Tracer: Send + Sync {
    /// A tick starts with the given delta.
    fn start_tick(&self, delta: f64) { let _ = delta; }

    /// A tick ends; the metrics are final for this tick.
    fn end_tick(&self, metrics: &WorldMetrics) { let _ = metrics; }

    /// The entity-update phase finished.
    fn entity_update(&self, duration: Duration) { let _ = duration; }

    /// The component-update phase finished.
    fn component_update(&self, duration: Duration) { let _ = duration; }

    /// A process group is about to be dispatched.
    fn start_group(&self, group: GroupId) { let _ = group; }

    /// A process group completed and its authority grants were cleared.
    fn end_group(&self, group: GroupId) { let _ = group; }

    /// The reserved event-handling phase finished.
    fn events(&self, duration: Duration) { let _ = duration; }

    /// An entity finished migrating to another world.
    fn migrated(&self, guid: Guid) { let _ = guid; }
}

/// An empty tracer.
pub struct Noop;

impl Tracer for Noop {}

/// A tracer that logs all events.
pub struct Log(
    /// The log level to log events with.
    pub log::Level,
);

impl Tracer for Log {
    fn start_tick(&self, delta: f64) {
        log::log!(self.0, "start_tick(delta = {delta})");
    }

    fn end_tick(&self, metrics: &WorldMetrics) {
        log::log!(self.0, "end_tick(total = {:?})", metrics.total);
    }

    fn entity_update(&self, duration: Duration) {
        log::log!(self.0, "entity_update(duration = {duration:?})");
    }

    fn component_update(&self, duration: Duration) {
        log::log!(self.0, "component_update(duration = {duration:?})");
    }

    fn start_group(&self, group: GroupId) {
        log::log!(self.0, "start_group(group = {group:?})");
    }

    fn end_group(&self, group: GroupId) {
        log::log!(self.0, "end_group(group = {group:?})");
    }

    fn events(&self, duration: Duration) {
        log::log!(self.0, "events(duration = {duration:?})");
    }

    fn migrated(&self, guid: Guid) {
        log::log!(self.0, "migrated(guid = {guid:?})");
    }
}
