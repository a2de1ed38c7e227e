use std::cell::UnsafeCell;

/// An [`UnsafeCell`] that may be shared across threads.
///
/// This is the stable equivalent of `std::cell::SyncUnsafeCell`.
/// All accesses through [`get`](Self::get) are unchecked;
/// every call site must justify why the access cannot data-race.
#[derive(Default)]
pub(crate) struct SyncCell<T>(UnsafeCell<T>);

// Safety: SyncCell only forwards the Sync obligation to its users,
// exactly like SyncUnsafeCell. T: Send + Sync keeps the usual bounds.
unsafe impl<T: Send + Sync> Sync for SyncCell<T> {}

impl<T> SyncCell<T> {
    pub(crate) fn new(value: T) -> Self { Self(UnsafeCell::new(value)) }

    /// Returns the raw pointer to the wrapped value.
    pub(crate) fn get(&self) -> *mut T { self.0.get() }

    /// Returns a mutable reference through unique ownership.
    /// This never races because `&mut self` proves exclusivity.
    pub(crate) fn get_mut(&mut self) -> &mut T { self.0.get_mut() }
}
