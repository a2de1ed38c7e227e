use crate::comp::ComponentId;
use crate::entity::Guid;

/// The errors surfaced by fallible world operations.
///
/// Not-found conditions (unknown GUID, absent component occurrence) are
/// reported through `bool` or `Option` return values instead; they are
/// never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An entity-table index exceeded the table size.
    #[error("index exceeds entity count")]
    OutOfRange,

    /// An iterator access was attempted while the iterator is not
    /// positioned on an entity.
    #[error("the iterator is not positioned on a live entity")]
    InvalidIteratorState,

    /// The operation is not allowed in the current process state,
    /// e.g. constructing an authoritative iterator outside a tick.
    #[error("this operation is not allowed in the current process state")]
    InvalidProcessState,

    /// Another iterator is the current authority for one or more of the
    /// requested component types.
    #[error("another iterator is the current authority for one or more of the requested types")]
    AuthorityConflict,

    /// An authority key list did not provide one key per requested type.
    #[error("insufficient authority keys")]
    MissingAuthority,

    /// A component record could not be added to the destination world
    /// during migration. The pending queues of both worlds are left in
    /// place for inspection; no rollback is performed.
    #[error("could not migrate component {component:?} of entity {guid:?}")]
    MigrationFailure {
        /// The component type that failed to transfer.
        component: ComponentId,
        /// The GUID of the entity being migrated.
        guid:      Guid,
    },
}

/// Result alias for world operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
