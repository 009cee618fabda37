//! Replaceable holder for a host handle
//!
//! The host may replace a long-lived handle (a listener callback, a tunnel
//! context) while native threads are still using the old one. `CallbackSlot`
//! keeps every handle alive while a `SlotLease` on it exists and releases it
//! through `release_object` once it has been replaced and the last lease is
//! gone.

use crate::callbacks::HostCallbacks;
use crate::types::ObjectHandle;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Any handle that is released through `release_object`
pub trait HostHandle: Copy + Into<ObjectHandle> + fmt::Debug + Send + Sync + 'static {}

impl<T> HostHandle for T where T: Copy + Into<ObjectHandle> + fmt::Debug + Send + Sync + 'static {}

struct Held<H: HostHandle> {
    handle: H,
    callbacks: HostCallbacks,
}

impl<H: HostHandle> Drop for Held<H> {
    fn drop(&mut self) {
        log::debug!("Releasing host handle {:?}", self.handle);
        self.callbacks.release_object(self.handle);
    }
}

/// A handle borrowed from a `CallbackSlot`
///
/// The handle stays valid until the lease is dropped, even if the slot is
/// replaced in the meantime.
pub struct SlotLease<H: HostHandle> {
    held: Arc<Held<H>>,
}

impl<H: HostHandle> SlotLease<H> {
    pub fn handle(&self) -> H {
        self.held.handle
    }
}

impl<H: HostHandle> fmt::Debug for SlotLease<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SlotLease").field(&self.held.handle).finish()
    }
}

/// Holds at most one host handle at a time
pub struct CallbackSlot<H: HostHandle> {
    callbacks: HostCallbacks,
    current: Mutex<Option<Arc<Held<H>>>>,
}

impl<H: HostHandle> CallbackSlot<H> {
    /// Create an empty slot that releases handles through `callbacks`
    pub fn new(callbacks: HostCallbacks) -> Self {
        Self {
            callbacks,
            current: Mutex::new(None),
        }
    }

    /// Replace the current handle
    ///
    /// `None` or a null handle empties the slot. The previous handle is
    /// released right away unless a lease on it is still alive, in which case
    /// the last lease releases it.
    pub fn store(&self, handle: Option<H>) {
        let next = handle
            .filter(|h| !Into::<ObjectHandle>::into(*h).is_null())
            .map(|handle| {
                Arc::new(Held {
                    handle,
                    callbacks: self.callbacks.clone(),
                })
            });

        let previous = std::mem::replace(&mut *self.lock(), next);
        if let Some(previous) = previous {
            log::debug!("Retiring host handle {:?}", previous.handle);
            // Dropped outside the lock; releases now if nobody holds a lease.
            drop(previous);
        }
    }

    /// Borrow the current handle, if any
    pub fn acquire(&self) -> Option<SlotLease<H>> {
        self.lock().as_ref().map(|held| SlotLease {
            held: Arc::clone(held),
        })
    }

    pub fn is_set(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<Held<H>>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<H: HostHandle> fmt::Debug for CallbackSlot<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.lock().as_ref().map(|held| held.handle);
        f.debug_struct("CallbackSlot").field("current", &current).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CallbackHandle;

    fn recording_callbacks() -> (HostCallbacks, Arc<Mutex<Vec<usize>>>) {
        let released = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&released);
        let callbacks =
            HostCallbacks::new().with_release_object(move |obj| log.lock().unwrap().push(obj.addr()));
        (callbacks, released)
    }

    #[test]
    fn test_replace_releases_previous() {
        let (callbacks, released) = recording_callbacks();
        let slot = CallbackSlot::new(callbacks);

        slot.store(Some(CallbackHandle::from_addr(1)));
        assert!(released.lock().unwrap().is_empty());

        slot.store(Some(CallbackHandle::from_addr(2)));
        assert_eq!(*released.lock().unwrap(), vec![1]);

        slot.store(None);
        assert_eq!(*released.lock().unwrap(), vec![1, 2]);
        assert!(!slot.is_set());
    }

    #[test]
    fn test_release_deferred_while_leased() {
        let (callbacks, released) = recording_callbacks();
        let slot = CallbackSlot::new(callbacks);

        slot.store(Some(CallbackHandle::from_addr(1)));
        let lease = slot.acquire().unwrap();
        let second = slot.acquire().unwrap();

        slot.store(Some(CallbackHandle::from_addr(2)));
        assert!(released.lock().unwrap().is_empty());
        assert_eq!(lease.handle().addr(), 1);

        drop(lease);
        assert!(released.lock().unwrap().is_empty());
        drop(second);
        assert_eq!(*released.lock().unwrap(), vec![1]);

        assert_eq!(slot.acquire().unwrap().handle().addr(), 2);
        assert_eq!(*released.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_null_handle_empties_slot() {
        let (callbacks, released) = recording_callbacks();
        let slot = CallbackSlot::new(callbacks);

        slot.store(Some(CallbackHandle::NULL));
        assert!(slot.acquire().is_none());
        assert!(released.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dropping_slot_releases_current() {
        let (callbacks, released) = recording_callbacks();
        let slot = CallbackSlot::new(callbacks);
        slot.store(Some(CallbackHandle::from_addr(9)));

        let lease = slot.acquire().unwrap();
        drop(slot);
        assert!(released.lock().unwrap().is_empty());
        drop(lease);
        assert_eq!(*released.lock().unwrap(), vec![9]);
    }

    #[test]
    fn test_concurrent_use_releases_each_handle_once() {
        let (callbacks, released) = recording_callbacks();
        let slot: CallbackSlot<CallbackHandle> = CallbackSlot::new(callbacks);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..200 {
                        if let Some(lease) = slot.acquire() {
                            assert!(!lease.handle().is_null());
                        }
                    }
                });
            }
            s.spawn(|| {
                for addr in 1..=50 {
                    slot.store(Some(CallbackHandle::from_addr(addr)));
                }
            });
        });
        slot.store(None);

        let mut released = released.lock().unwrap().clone();
        released.sort_unstable();
        assert_eq!(released, (1..=50).collect::<Vec<_>>());
    }
}
