//! Core types for the host bridge
//!
//! This module defines the values that cross the host boundary: opaque handles
//! the native side passes through unexamined, strings allocated by the host,
//! and the error type used by everything around the dispatch wrappers.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::ffi::{c_char, c_void, CStr};
use std::fmt;
use std::ptr::NonNull;
use std::str::FromStr;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(usize);

        impl $name {
            /// The null handle
            pub const NULL: Self = Self(0);

            /// Wrap a raw address handed over by the host
            pub const fn from_addr(addr: usize) -> Self {
                Self(addr)
            }

            /// Wrap a raw pointer handed over by the host
            pub fn from_ptr(ptr: *mut c_void) -> Self {
                Self(ptr as usize)
            }

            /// Raw address of the handle
            pub const fn addr(self) -> usize {
                self.0
            }

            /// Raw pointer form, for passing the handle back to the host
            pub fn as_ptr(self) -> *mut c_void {
                self.0 as *mut c_void
            }

            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }
    };
}

opaque_handle!(
    /// Handle to a host-owned object. Must go back through `release_object`.
    ObjectHandle
);

opaque_handle!(
    /// Identifies one tunnel instance on the host side
    TunnelContext
);

opaque_handle!(
    /// Host-side callback/continuation object that receives results
    CallbackHandle
);

impl From<TunnelContext> for ObjectHandle {
    fn from(ctx: TunnelContext) -> Self {
        ObjectHandle(ctx.0)
    }
}

impl From<CallbackHandle> for ObjectHandle {
    fn from(callback: CallbackHandle) -> Self {
        ObjectHandle(callback.0)
    }
}

/// A NUL-terminated string allocated by the host
///
/// The buffer belongs to the host allocator. Dropping a `HostString` leaks it;
/// the only way to free it is `HostCallbacks::free_string` (or `take_string`).
#[must_use = "host strings must be returned through HostCallbacks::free_string"]
pub struct HostString {
    ptr: NonNull<c_char>,
}

// The buffer is immutable from our side and owned by whoever holds the value.
unsafe impl Send for HostString {}
unsafe impl Sync for HostString {}

impl HostString {
    /// Take ownership of a host-allocated buffer. Returns `None` for null.
    ///
    /// # Safety
    /// `ptr` must be null or point to a NUL-terminated buffer that stays valid
    /// and unmodified until it is handed back to the host's free function.
    pub unsafe fn from_raw(ptr: *mut c_char) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr })
    }

    /// Borrow the content as a C string
    pub fn as_c_str(&self) -> &CStr {
        // SAFETY: upheld by the contract of `from_raw`.
        unsafe { CStr::from_ptr(self.ptr.as_ptr()) }
    }

    /// Content decoded as UTF-8, replacing invalid sequences
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        self.as_c_str().to_string_lossy()
    }

    pub fn as_ptr(&self) -> *const c_char {
        self.ptr.as_ptr()
    }

    /// Give the buffer back as a raw pointer without freeing it
    pub fn into_raw(self) -> *mut c_char {
        self.ptr.as_ptr()
    }
}

impl fmt::Debug for HostString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostString").field(&self.to_string_lossy()).finish()
    }
}

/// The five capabilities a host can install
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ReleaseObject,
    FreeString,
    ResolveProcess,
    ProtectSocket,
    InvokeResult,
}

impl Capability {
    /// All capabilities, in table order
    pub const ALL: [Capability; 5] = [
        Capability::ReleaseObject,
        Capability::FreeString,
        Capability::ResolveProcess,
        Capability::ProtectSocket,
        Capability::InvokeResult,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Capability::ReleaseObject => "release_object",
            Capability::FreeString => "free_string",
            Capability::ResolveProcess => "resolve_process",
            Capability::ProtectSocket => "protect_socket",
            Capability::InvokeResult => "invoke_result",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// IP protocol of a flow
///
/// The bridge forwards the raw number unchanged; this type only helps callers
/// build and print it. Serialised as its name, or as a number for `Other`;
/// deserialised from either form like `FromStr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Icmp,
    Tcp,
    Udp,
    Other(i32),
}

impl Protocol {
    pub fn as_raw(self) -> i32 {
        match self {
            Protocol::Icmp => 1,
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Other(n) => n,
        }
    }

    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Protocol::Icmp,
            6 => Protocol::Tcp,
            17 => Protocol::Udp,
            n => Protocol::Other(n),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Icmp => write!(f, "icmp"),
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Other(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for Protocol {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "icmp" => Ok(Protocol::Icmp),
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => other
                .parse::<i32>()
                .map(Protocol::from_raw)
                .map_err(|_| BridgeError::InvalidProtocol(s.to_string())),
        }
    }
}

impl Serialize for Protocol {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Protocol::Other(n) => serializer.serialize_i32(*n),
            named => serializer.collect_str(named),
        }
    }
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ProtocolVisitor;

        impl<'de> Visitor<'de> for ProtocolVisitor {
            type Value = Protocol;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a protocol name or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Protocol, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Protocol, E> {
                i32::try_from(v)
                    .map(Protocol::from_raw)
                    .map_err(|_| E::custom(BridgeError::InvalidProtocol(v.to_string())))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Protocol, E> {
                i32::try_from(v)
                    .map(Protocol::from_raw)
                    .map_err(|_| E::custom(BridgeError::InvalidProtocol(v.to_string())))
            }
        }

        deserializer.deserialize_any(ProtocolVisitor)
    }
}

/// Errors raised around the host boundary
///
/// The dispatch wrappers never return these; absence of a capability is
/// always a no-op or an absent result there.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Host capability not installed: {0}")]
    CapabilityUnavailable(Capability),

    #[error("Null pointer passed for {0}")]
    NullPointer(&'static str),

    #[error("Host callbacks are already installed")]
    AlreadyInstalled,

    #[error("String contains an interior NUL byte: {0}")]
    InvalidString(#[from] std::ffi::NulError),

    #[error("Invalid protocol: {0}")]
    InvalidProtocol(String),

    #[error("Invalid TUN configuration: {0}")]
    InvalidTunConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
