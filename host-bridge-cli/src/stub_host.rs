//! Recording stub host
//!
//! Stands in for the managed host: installs the capabilities the profile
//! enables, answers process lookups from the profile table, and records every
//! call it receives.

use crate::config::HostProfile;
use host_bridge::{HostCallbacks, HostString};
use std::ffi::CString;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A call observed by the stub host
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    ReleaseObject(usize),
    FreeString(String),
    ResolveProcess {
        ctx: usize,
        protocol: i32,
        source: String,
        target: String,
        uid: i32,
        answer: Option<String>,
    },
    ProtectSocket {
        ctx: usize,
        fd: i32,
    },
    InvokeResult {
        callback: usize,
        data: String,
    },
}

impl fmt::Display for HostCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostCall::ReleaseObject(obj) => write!(f, "release_object({:#x})", obj),
            HostCall::FreeString(s) => write!(f, "free_string({:?})", s),
            HostCall::ResolveProcess {
                ctx,
                protocol,
                source,
                target,
                uid,
                answer,
            } => write!(
                f,
                "resolve_process({:#x}, {}, {:?}, {:?}, {}) -> {:?}",
                ctx, protocol, source, target, uid, answer
            ),
            HostCall::ProtectSocket { ctx, fd } => write!(f, "protect_socket({:#x}, {})", ctx, fd),
            HostCall::InvokeResult { callback, data } => {
                write!(f, "invoke_result({:#x}, {:?})", callback, data)
            }
        }
    }
}

pub struct StubHost {
    profile: Arc<HostProfile>,
    calls: Arc<Mutex<Vec<HostCall>>>,
}

impl StubHost {
    pub fn new(profile: HostProfile) -> Self {
        Self {
            profile: Arc::new(profile),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Capability table backed by this stub
    pub fn callbacks(&self) -> HostCallbacks {
        let switches = &self.profile.host;
        let mut callbacks = HostCallbacks::new();

        if switches.release_object {
            let calls = Arc::clone(&self.calls);
            callbacks = callbacks.with_release_object(move |obj| {
                push(&calls, HostCall::ReleaseObject(obj.addr()));
            });
        }

        if switches.free_string {
            let calls = Arc::clone(&self.calls);
            callbacks = callbacks.with_free_string(move |s| {
                // SAFETY: every HostString this stub hands out comes from
                // CString::into_raw in the resolver below.
                let owned = unsafe { CString::from_raw(s.into_raw()) };
                push(&calls, HostCall::FreeString(owned.to_string_lossy().into_owned()));
            });
        }

        if switches.resolve_process {
            let calls = Arc::clone(&self.calls);
            let profile = Arc::clone(&self.profile);
            callbacks = callbacks.with_resolve_process(move |ctx, protocol, source, target, uid| {
                let answer = profile
                    .lookup(protocol, source, target, uid)
                    .map(str::to_string);
                push(
                    &calls,
                    HostCall::ResolveProcess {
                        ctx: ctx.addr(),
                        protocol,
                        source: source.to_string(),
                        target: target.to_string(),
                        uid,
                        answer: answer.clone(),
                    },
                );
                let raw = CString::new(answer?).ok()?.into_raw();
                // SAFETY: freshly allocated, NUL-terminated, freed by free_string above.
                unsafe { HostString::from_raw(raw) }
            });
        }

        if switches.protect_socket {
            let calls = Arc::clone(&self.calls);
            callbacks = callbacks.with_protect_socket(move |ctx, fd| {
                push(&calls, HostCall::ProtectSocket { ctx: ctx.addr(), fd });
            });
        }

        if switches.invoke_result {
            let calls = Arc::clone(&self.calls);
            callbacks = callbacks.with_invoke_result(move |callback, data| {
                push(
                    &calls,
                    HostCall::InvokeResult {
                        callback: callback.addr(),
                        data: data.to_string(),
                    },
                );
            });
        }

        callbacks
    }

    /// Calls observed so far, in order
    pub fn calls(&self) -> Vec<HostCall> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

fn push(calls: &Mutex<Vec<HostCall>>, call: HostCall) {
    log::debug!("Host received {}", call);
    calls
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .push(call);
}
