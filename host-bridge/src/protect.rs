//! Socket protection hook
//!
//! Outbound sockets the engine opens itself must bypass the tunnel, or their
//! traffic would loop back into it. `SocketProtector` remembers the tunnel
//! context of the running TUN session and asks the host to protect each
//! socket before it connects.

use crate::callbacks::HostCallbacks;
use crate::slot::CallbackSlot;
use crate::tun::TunConfig;
use crate::types::{Result, TunnelContext};

#[cfg(unix)]
use std::os::fd::AsRawFd;

pub struct SocketProtector {
    callbacks: HostCallbacks,
    tunnel: CallbackSlot<TunnelContext>,
}

impl SocketProtector {
    pub fn new(callbacks: HostCallbacks) -> Self {
        Self {
            tunnel: CallbackSlot::new(callbacks.clone()),
            callbacks,
        }
    }

    /// Start protecting sockets for a TUN session
    ///
    /// Builds the TUN configuration from the host parameters and binds `ctx`.
    /// If the parameters are invalid the context is released and not bound.
    pub fn start(
        &self,
        ctx: TunnelContext,
        fd: i32,
        stack: &str,
        addresses: &str,
        dns: &str,
    ) -> Result<TunConfig> {
        self.stop();

        let config = match TunConfig::build(fd, stack, addresses, dns) {
            Ok(config) => config,
            Err(e) => {
                if !ctx.is_null() {
                    self.callbacks.release_object(ctx);
                }
                return Err(e);
            }
        };

        self.bind(ctx);
        log::info!("TUN session started on fd {}", fd);
        Ok(config)
    }

    /// End the TUN session and release its context
    pub fn stop(&self) {
        self.unbind();
    }

    /// Use `ctx` for subsequent protect calls; the previous context is released
    pub fn bind(&self, ctx: TunnelContext) {
        self.tunnel.store(Some(ctx));
    }

    pub fn unbind(&self) {
        self.tunnel.store(None);
    }

    pub fn is_bound(&self) -> bool {
        self.tunnel.is_set()
    }

    /// Ask the host to protect `fd`
    ///
    /// Returns false when no tunnel is bound. Whether the host managed to
    /// protect the socket is not observable here.
    pub fn protect_fd(&self, fd: i32) -> bool {
        let Some(lease) = self.tunnel.acquire() else {
            return false;
        };
        self.callbacks.protect_socket(lease.handle(), fd);
        true
    }

    #[cfg(unix)]
    pub fn protect(&self, socket: &impl AsRawFd) -> bool {
        self.protect_fd(socket.as_raw_fd())
    }
}

impl std::fmt::Debug for SocketProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketProtector")
            .field("tunnel", &self.tunnel)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, PartialEq)]
    enum Call {
        Protect(usize, i32),
        Release(usize),
    }

    fn recording_callbacks() -> (HostCallbacks, Arc<Mutex<Vec<Call>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let protects = Arc::clone(&calls);
        let releases = Arc::clone(&calls);
        let callbacks = HostCallbacks::new()
            .with_protect_socket(move |ctx, fd| {
                protects.lock().unwrap().push(Call::Protect(ctx.addr(), fd))
            })
            .with_release_object(move |obj| releases.lock().unwrap().push(Call::Release(obj.addr())));
        (callbacks, calls)
    }

    #[test]
    fn test_unbound_protect_is_noop() {
        let (callbacks, calls) = recording_callbacks();
        let protector = SocketProtector::new(callbacks);
        assert!(!protector.protect_fd(42));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_protect_forwards_bound_context() {
        let (callbacks, calls) = recording_callbacks();
        let protector = SocketProtector::new(callbacks);
        protector.bind(TunnelContext::from_addr(0x99));

        assert!(protector.protect_fd(42));
        assert_eq!(*calls.lock().unwrap(), vec![Call::Protect(0x99, 42)]);
    }

    #[test]
    fn test_start_and_stop_session() {
        let (callbacks, calls) = recording_callbacks();
        let protector = SocketProtector::new(callbacks);

        let config = protector
            .start(TunnelContext::from_addr(0x1), 7, "system", "172.19.0.1/30", "172.19.0.2")
            .unwrap();
        assert_eq!(config.file_descriptor, 7);
        assert!(protector.is_bound());

        protector.protect_fd(11);
        protector.stop();
        assert!(!protector.protect_fd(12));

        assert_eq!(
            *calls.lock().unwrap(),
            vec![Call::Protect(0x1, 11), Call::Release(0x1)]
        );
    }

    #[test]
    fn test_failed_start_releases_context() {
        let (callbacks, calls) = recording_callbacks();
        let protector = SocketProtector::new(callbacks);
        protector.bind(TunnelContext::from_addr(0x1));

        let result = protector.start(TunnelContext::from_addr(0x2), 0, "system", "", "");
        assert!(result.is_err());
        assert!(!protector.is_bound());
        assert_eq!(
            *calls.lock().unwrap(),
            vec![Call::Release(0x1), Call::Release(0x2)]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_protect_real_socket() {
        let (callbacks, calls) = recording_callbacks();
        let protector = SocketProtector::new(callbacks);
        protector.bind(TunnelContext::from_addr(0x5));

        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        assert!(protector.protect(&socket));
        assert_eq!(
            *calls.lock().unwrap(),
            vec![Call::Protect(0x5, socket.as_raw_fd())]
        );
    }
}
