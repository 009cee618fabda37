//! C installation surface
//!
//! Hosts that talk C hand over a `HostCallbackTable` of nullable function
//! pointers. `HostCallbacks::from_table` wraps each present pointer in a
//! marshalling closure; `host_bridge_install_callbacks` stores the result in a
//! write-once cell so installation happens before any dispatch through
//! `installed()`. A second installation is rejected.

use crate::callbacks::HostCallbacks;
use crate::types::{BridgeError, HostString, Result};
use std::ffi::{c_char, c_int, c_void, CString};
use std::sync::OnceLock;

/// `void release_object(void *obj)`
pub type ReleaseObjectCallback = Option<unsafe extern "C" fn(obj: *mut c_void)>;

/// `void free_string(char *data)`
pub type FreeStringCallback = Option<unsafe extern "C" fn(data: *mut c_char)>;

/// `char *resolve_process(void *tun_ctx, int protocol, const char *source, const char *target, int uid)`
pub type ResolveProcessCallback = Option<
    unsafe extern "C" fn(
        tun_ctx: *mut c_void,
        protocol: c_int,
        source: *const c_char,
        target: *const c_char,
        uid: c_int,
    ) -> *mut c_char,
>;

/// `void protect_socket(void *tun_ctx, int fd)`
pub type ProtectSocketCallback = Option<unsafe extern "C" fn(tun_ctx: *mut c_void, fd: c_int)>;

/// `void invoke_result(void *callback, const char *data)`
pub type InvokeResultCallback =
    Option<unsafe extern "C" fn(callback: *mut c_void, data: *const c_char)>;

/// Function table filled in by the host. Null entries are absent capabilities.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct HostCallbackTable {
    pub release_object: ReleaseObjectCallback,
    pub free_string: FreeStringCallback,
    pub resolve_process: ResolveProcessCallback,
    pub protect_socket: ProtectSocketCallback,
    pub invoke_result: InvokeResultCallback,
}

/// Installation succeeded
pub const INSTALL_OK: c_int = 0;
/// The table pointer was null
pub const INSTALL_NULL_TABLE: c_int = 1;
/// Callbacks were installed earlier; the new table was ignored
pub const INSTALL_ALREADY_INSTALLED: c_int = 2;

static INSTALLED: OnceLock<HostCallbacks> = OnceLock::new();

impl HostCallbacks {
    /// Build a capability table from C function pointers
    ///
    /// Strings passed to the host are copied into temporary C strings that live
    /// for the duration of the call only; a string with an interior NUL cannot
    /// be represented and the call is skipped.
    ///
    /// # Safety
    /// Every non-null entry must remain callable for as long as the returned
    /// value or any clone of it is alive, and must be safe to call from any
    /// thread the native side dispatches on.
    pub unsafe fn from_table(table: &HostCallbackTable) -> Self {
        let mut callbacks = HostCallbacks::new();

        if let Some(f) = table.release_object {
            callbacks = callbacks.with_release_object(move |obj| unsafe { f(obj.as_ptr()) });
        }

        if let Some(f) = table.free_string {
            callbacks = callbacks.with_free_string(move |s| unsafe { f(s.into_raw()) });
        }

        if let Some(f) = table.resolve_process {
            callbacks = callbacks.with_resolve_process(move |ctx, protocol, source, target, uid| {
                let source = to_c_string(source, "resolve_process")?;
                let target = to_c_string(target, "resolve_process")?;
                unsafe {
                    let raw = f(ctx.as_ptr(), protocol, source.as_ptr(), target.as_ptr(), uid);
                    HostString::from_raw(raw)
                }
            });
        }

        if let Some(f) = table.protect_socket {
            callbacks = callbacks.with_protect_socket(move |ctx, fd| unsafe { f(ctx.as_ptr(), fd) });
        }

        if let Some(f) = table.invoke_result {
            callbacks = callbacks.with_invoke_result(move |callback, data| {
                if let Some(data) = to_c_string(data, "invoke_result") {
                    unsafe { f(callback.as_ptr(), data.as_ptr()) }
                }
            });
        }

        callbacks
    }
}

fn c_string(s: &str) -> Result<CString> {
    Ok(CString::new(s)?)
}

fn to_c_string(s: &str, capability: &str) -> Option<CString> {
    match c_string(s) {
        Ok(c) => Some(c),
        Err(e) => {
            log::warn!("Skipping {} call: {}", capability, e);
            None
        }
    }
}

/// Install the process-wide capability table
///
/// The first installation wins. Later calls return `AlreadyInstalled`.
pub fn install(callbacks: HostCallbacks) -> Result<()> {
    let available = callbacks.available();
    INSTALLED.set(callbacks).map_err(|_| {
        log::warn!("Host callbacks already installed, ignoring new table");
        BridgeError::AlreadyInstalled
    })?;
    log::info!("Host callbacks installed: {:?}", available);
    Ok(())
}

/// The process-wide capability table, if the host installed one
pub fn installed() -> Option<&'static HostCallbacks> {
    INSTALLED.get()
}

/// Copy a C table and install it
///
/// # Safety
/// Same contract as `host_bridge_install_callbacks`.
pub unsafe fn install_table(table: *const HostCallbackTable) -> Result<()> {
    let table = unsafe { table.as_ref() }.ok_or(BridgeError::NullPointer("callback table"))?;
    install(unsafe { HostCallbacks::from_table(table) })
}

/// Install host callbacks from C
///
/// Returns `INSTALL_OK`, `INSTALL_NULL_TABLE` or `INSTALL_ALREADY_INSTALLED`.
/// The table is copied; the pointer need not outlive the call.
///
/// # Safety
/// `table` must be null or point to a valid `HostCallbackTable` whose entries
/// satisfy the contract of `HostCallbacks::from_table` for the rest of the
/// process lifetime.
#[no_mangle]
pub unsafe extern "C" fn host_bridge_install_callbacks(table: *const HostCallbackTable) -> c_int {
    match unsafe { install_table(table) } {
        Ok(()) => INSTALL_OK,
        Err(BridgeError::NullPointer(what)) => {
            log::warn!("host_bridge_install_callbacks called with a null {}", what);
            INSTALL_NULL_TABLE
        }
        Err(_) => INSTALL_ALREADY_INSTALLED,
    }
}

/// Library version as a static NUL-terminated string. Never free it.
#[no_mangle]
pub extern "C" fn host_bridge_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}
