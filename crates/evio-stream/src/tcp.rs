//! TCP stream specialization.

use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
use std::ops::Deref;
use std::os::fd::BorrowedFd;
use std::rc::Rc;

use nix::sys::socket::{self, sockopt, AddressFamily, SockFlag, SockType, SockaddrStorage};

use evio_core::state::StreamState;
use evio_core::{EvioError, EvioResult};
use evio_reactor::EventLoop;

use crate::resource::{StreamKind, StreamResource};

/// A TCP stream endpoint.
///
/// Wraps a [`StreamResource`] of kind `Tcp` and adds address binding and
/// connection establishment. All generic stream operations (`listen`,
/// `accept`, `read`, `write`, `shutdown`, ...) come from the resource via
/// `Deref`.
pub struct TcpSocket {
    res: Rc<StreamResource>,
}

impl TcpSocket {
    /// Factory: an uninitialized TCP resource bound to `eloop`. The OS
    /// socket is created lazily on `bind`/`connect`, which keeps a fresh
    /// instance a valid `accept` target.
    pub fn new(eloop: &Rc<EventLoop>) -> Self {
        Self {
            res: StreamResource::new(eloop, StreamKind::Tcp),
        }
    }

    /// The underlying shared resource, e.g. for `accept` targets.
    pub fn resource(&self) -> &Rc<StreamResource> {
        &self.res
    }

    fn ensure_fd(&self, family: AddressFamily) -> EvioResult<()> {
        if self.res.raw_fd().is_some() {
            return Ok(());
        }
        let fd = socket::socket(
            family,
            SockType::Stream,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(|e| EvioError::Os(e as i32))?;
        self.res.install_fd(fd, StreamState::Open)
    }

    /// Bind the socket to a local address (with `SO_REUSEADDR`).
    pub fn bind(&self, addr: SocketAddr) -> EvioResult<()> {
        self.ensure_fd(family_of(&addr))?;
        let raw = self.res.raw_fd().ok_or(EvioError::NotRegistered)?;
        // Safety: raw comes from our still-held OwnedFd.
        let borrowed = unsafe { BorrowedFd::borrow_raw(raw) };
        socket::setsockopt(&borrowed, sockopt::ReuseAddr, &true)
            .map_err(|e| EvioError::Os(e as i32))?;
        let ss = SockaddrStorage::from(addr);
        socket::bind(raw, &ss).map_err(|e| EvioError::Os(e as i32))
    }

    /// Issue an asynchronous connect. Exactly one `Connect` or `Error`
    /// event is published on the resource.
    pub fn connect(&self, addr: SocketAddr) -> EvioResult<()> {
        self.ensure_fd(family_of(&addr))?;
        let ss = SockaddrStorage::from(addr);
        self.res.issue_connect(&ss)
    }

    /// The locally bound address (useful after binding port 0).
    pub fn local_addr(&self) -> EvioResult<SocketAddr> {
        let raw = self.res.raw_fd().ok_or(EvioError::NotRegistered)?;
        let ss: SockaddrStorage =
            socket::getsockname(raw).map_err(|e| EvioError::Os(e as i32))?;
        sockaddr_to_std(&ss).ok_or(EvioError::InvalidState)
    }
}

impl Deref for TcpSocket {
    type Target = StreamResource;

    fn deref(&self) -> &StreamResource {
        &self.res
    }
}

fn family_of(addr: &SocketAddr) -> AddressFamily {
    match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    }
}

fn sockaddr_to_std(ss: &SockaddrStorage) -> Option<SocketAddr> {
    if let Some(sin) = ss.as_sockaddr_in() {
        return Some(SocketAddr::V4(SocketAddrV4::new(sin.ip(), sin.port())));
    }
    if let Some(sin6) = ss.as_sockaddr_in6() {
        return Some(SocketAddr::V6(SocketAddrV6::new(
            sin6.ip(),
            sin6.port(),
            sin6.flowinfo(),
            sin6.scope_id(),
        )));
    }
    None
}
