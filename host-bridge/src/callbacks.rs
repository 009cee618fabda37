//! Callback registry and dispatch
//!
//! `HostCallbacks` is the capability table the host hands to the native side.
//! Each capability is an optional handler; the dispatch methods forward to the
//! handler when it is present and otherwise return the neutral result (nothing,
//! or `None`). They never fail and never log.
//!
//! # Example
//!
//! ```
//! use host_bridge::{HostCallbacks, TunnelContext};
//!
//! let callbacks = HostCallbacks::new()
//!     .with_protect_socket(|ctx, fd| println!("protect {:?} fd={}", ctx, fd));
//!
//! callbacks.protect_socket(TunnelContext::from_addr(0x10), 42);
//!
//! // Not installed: absent, nothing invoked
//! let ctx = TunnelContext::from_addr(0x10);
//! assert!(callbacks.resolve_process(ctx, 6, "10.0.0.1:443", "93.1.1.1:443", 1000).is_none());
//! ```

use crate::types::{
    BridgeError, CallbackHandle, Capability, HostString, ObjectHandle, Result, TunnelContext,
};
use std::fmt;
use std::sync::Arc;

/// Releases a host-owned object
pub type ReleaseObjectFn = dyn Fn(ObjectHandle) + Send + Sync;

/// Frees a host-allocated string
pub type FreeStringFn = dyn Fn(HostString) + Send + Sync;

/// Resolves the package owning a flow: `(ctx, protocol, source, target, uid)`
pub type ResolveProcessFn =
    dyn Fn(TunnelContext, i32, &str, &str, i32) -> Option<HostString> + Send + Sync;

/// Excludes a socket from tunnel routing
pub type ProtectSocketFn = dyn Fn(TunnelContext, i32) + Send + Sync;

/// Delivers a result payload to a host callback object
pub type InvokeResultFn = dyn Fn(CallbackHandle, &str) + Send + Sync;

/// Host capability table
///
/// Cheap to clone; clones share the same handlers.
#[derive(Clone, Default)]
pub struct HostCallbacks {
    release_object: Option<Arc<ReleaseObjectFn>>,
    free_string: Option<Arc<FreeStringFn>>,
    resolve_process: Option<Arc<ResolveProcessFn>>,
    protect_socket: Option<Arc<ProtectSocketFn>>,
    invoke_result: Option<Arc<InvokeResultFn>>,
}

impl HostCallbacks {
    /// Create a table with no capabilities installed
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: install the object release handler
    pub fn with_release_object<F>(mut self, f: F) -> Self
    where
        F: Fn(ObjectHandle) + Send + Sync + 'static,
    {
        self.release_object = Some(Arc::new(f));
        self
    }

    /// Builder method: install the string free handler
    pub fn with_free_string<F>(mut self, f: F) -> Self
    where
        F: Fn(HostString) + Send + Sync + 'static,
    {
        self.free_string = Some(Arc::new(f));
        self
    }

    /// Builder method: install the process resolver
    pub fn with_resolve_process<F>(mut self, f: F) -> Self
    where
        F: Fn(TunnelContext, i32, &str, &str, i32) -> Option<HostString> + Send + Sync + 'static,
    {
        self.resolve_process = Some(Arc::new(f));
        self
    }

    /// Builder method: install the socket protector
    pub fn with_protect_socket<F>(mut self, f: F) -> Self
    where
        F: Fn(TunnelContext, i32) + Send + Sync + 'static,
    {
        self.protect_socket = Some(Arc::new(f));
        self
    }

    /// Builder method: install the result sink
    pub fn with_invoke_result<F>(mut self, f: F) -> Self
    where
        F: Fn(CallbackHandle, &str) + Send + Sync + 'static,
    {
        self.invoke_result = Some(Arc::new(f));
        self
    }

    /// Release a host-owned object. The handle must not be used afterwards.
    pub fn release_object(&self, handle: impl Into<ObjectHandle>) {
        if let Some(f) = &self.release_object {
            f(handle.into());
        }
    }

    /// Free a host-allocated string
    ///
    /// Without a handler the buffer is left alone: it is never handed to any
    /// other allocator.
    pub fn free_string(&self, s: HostString) {
        if let Some(f) = &self.free_string {
            f(s);
        }
    }

    /// Ask the host which package owns a flow
    ///
    /// `None` both when the host has no resolver and when the flow could not
    /// be resolved. A returned string must go back through `free_string`.
    pub fn resolve_process(
        &self,
        ctx: TunnelContext,
        protocol: i32,
        source: &str,
        target: &str,
        uid: i32,
    ) -> Option<HostString> {
        let f = self.resolve_process.as_ref()?;
        f(ctx, protocol, source, target, uid)
    }

    /// Ask the host to exclude `fd` from tunnel routing
    pub fn protect_socket(&self, ctx: TunnelContext, fd: i32) {
        if let Some(f) = &self.protect_socket {
            f(ctx, fd);
        }
    }

    /// Deliver `data` to a host callback object
    ///
    /// Each call delivers once. Calling it at most once per operation is up
    /// to the caller.
    pub fn invoke_result(&self, callback: CallbackHandle, data: &str) {
        if let Some(f) = &self.invoke_result {
            f(callback, data);
        }
    }

    /// Copy a host string into a Rust `String` and free the host buffer
    pub fn take_string(&self, s: HostString) -> String {
        let value = s.to_string_lossy().into_owned();
        self.free_string(s);
        value
    }

    /// `resolve_process` followed by `take_string`
    pub fn resolve_process_name(
        &self,
        ctx: TunnelContext,
        protocol: i32,
        source: &str,
        target: &str,
        uid: i32,
    ) -> Option<String> {
        self.resolve_process(ctx, protocol, source, target, uid)
            .map(|s| self.take_string(s))
    }

    /// Check whether a capability is installed
    pub fn is_available(&self, capability: Capability) -> bool {
        match capability {
            Capability::ReleaseObject => self.release_object.is_some(),
            Capability::FreeString => self.free_string.is_some(),
            Capability::ResolveProcess => self.resolve_process.is_some(),
            Capability::ProtectSocket => self.protect_socket.is_some(),
            Capability::InvokeResult => self.invoke_result.is_some(),
        }
    }

    /// All installed capabilities, in table order
    pub fn available(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.is_available(*c))
            .collect()
    }

    /// For callers that cannot work without a capability
    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.is_available(capability) {
            Ok(())
        } else {
            Err(BridgeError::CapabilityUnavailable(capability))
        }
    }
}

impl fmt::Debug for HostCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCallbacks")
            .field("release_object", &self.release_object.is_some())
            .field("free_string", &self.free_string.is_some())
            .field("resolve_process", &self.resolve_process.is_some())
            .field("protect_socket", &self.protect_socket.is_some())
            .field("invoke_result", &self.invoke_result.is_some())
            .finish()
    }
}
