//! Host Bridge Library
//!
//! The boundary between a native tunnel engine and the managed host application
//! that embeds it (typically an Android VPN service). The native side cannot
//! free host memory, look up which app owns a connection, or exclude sockets
//! from the VPN by itself, so the host hands it a table of capabilities.
//!
//! # Architecture
//!
//! - `HostCallbacks` holds five optional handlers: release an object, free a
//!   string, resolve the process behind a flow, protect a socket, and deliver a
//!   result. Calling a missing one is a no-op (or `None`).
//! - `ffi` turns a C function-pointer table into `HostCallbacks` and offers a
//!   write-once installation entry point for C hosts.
//! - `CallbackSlot` keeps replaceable host handles alive while in use and
//!   releases them afterwards.
//! - `ActionResult`/`EventListener` format and deliver JSON replies and events;
//!   `invoke_action` decodes host requests and guarantees one reply each.
//! - `SocketProtector`/`TunConfig` wire the protect capability to a TUN session.
//!
//! The library does NOT implement the tunnel, the host side of any callback, or
//! JNI marshalling.
//!
//! # Example Usage
//!
//! ```
//! use host_bridge::{HostCallbacks, Protocol, SocketProtector, TunnelContext};
//!
//! let callbacks = HostCallbacks::new()
//!     .with_protect_socket(|ctx, fd| println!("protect fd {} for {:?}", fd, ctx));
//!
//! let protector = SocketProtector::new(callbacks.clone());
//! protector.bind(TunnelContext::from_addr(0x1000));
//! assert!(protector.protect_fd(42));
//!
//! // No resolver installed: absent
//! let owner = callbacks.resolve_process_name(
//!     TunnelContext::from_addr(0x1000),
//!     Protocol::Tcp.as_raw(),
//!     "10.0.0.1:443",
//!     "93.1.1.1:443",
//!     1000,
//! );
//! assert_eq!(owner, None);
//! ```

// Public modules
pub mod action;
pub mod callbacks;
pub mod ffi;
pub mod listener;
pub mod protect;
pub mod result;
pub mod slot;
pub mod tun;
pub mod types;

// Re-export main types for convenience
pub use action::{invoke_action, Action, Dispatched};
pub use callbacks::HostCallbacks;
pub use ffi::HostCallbackTable;
pub use listener::EventListener;
pub use protect::SocketProtector;
pub use result::{ActionResult, Message, MessageType, Method};
pub use slot::{CallbackSlot, SlotLease};
pub use tun::{TunConfig, TunStack};
pub use types::{
    BridgeError, CallbackHandle, Capability, HostString, ObjectHandle, Protocol, Result,
    TunnelContext,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
