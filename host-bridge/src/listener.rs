//! Event listener registered by the host
//!
//! The host registers one listener callback for unsolicited events (logs,
//! delay results, memory, connections). Replacing it while an event is being
//! delivered is safe: the old handle is released after the delivery finishes.

use crate::callbacks::HostCallbacks;
use crate::result::{ActionResult, Message};
use crate::slot::CallbackSlot;
use crate::types::CallbackHandle;

pub struct EventListener {
    callbacks: HostCallbacks,
    slot: CallbackSlot<CallbackHandle>,
}

impl EventListener {
    pub fn new(callbacks: HostCallbacks) -> Self {
        Self {
            slot: CallbackSlot::new(callbacks.clone()),
            callbacks,
        }
    }

    /// Replace the listener; `None` removes it
    pub fn set(&self, listener: Option<CallbackHandle>) {
        self.slot.store(listener);
    }

    pub fn is_set(&self) -> bool {
        self.slot.is_set()
    }

    /// Deliver `message` to the current listener
    ///
    /// Returns false when no listener is registered.
    pub fn emit(&self, message: &Message) -> bool {
        let Some(lease) = self.slot.acquire() else {
            return false;
        };
        ActionResult::event(message).send(&self.callbacks, lease.handle());
        true
    }
}

impl std::fmt::Debug for EventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListener").field("slot", &self.slot).finish()
    }
}
