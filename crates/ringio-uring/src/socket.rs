//! Synchronous socket setup.
//!
//! Creating, configuring, binding and listening never block, so they run
//! inline on the calling thread instead of going through the ring.

use std::mem;
use std::net::SocketAddr;
use std::ops::BitOr;

use ringio_core::{FileDescriptor, IoResult, SystemError};

use crate::sockaddr;

/// Socket address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Inet,
    Inet6,
}

impl AddressFamily {
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => AddressFamily::Inet,
            SocketAddr::V6(_) => AddressFamily::Inet6,
        }
    }

    fn raw(self) -> libc::c_int {
        match self {
            AddressFamily::Inet => libc::AF_INET,
            AddressFamily::Inet6 => libc::AF_INET6,
        }
    }

    fn descriptor(self, fd: libc::c_int) -> FileDescriptor {
        match self {
            AddressFamily::Inet => FileDescriptor::socket4(fd),
            AddressFamily::Inet6 => FileDescriptor::socket6(fd),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
    Stream,
    Datagram,
}

impl SocketType {
    fn raw(self) -> libc::c_int {
        match self {
            SocketType::Stream => libc::SOCK_STREAM,
            SocketType::Datagram => libc::SOCK_DGRAM,
        }
    }
}

/// `socket(2)` type flags.
pub mod socket_flags {
    pub const NONBLOCK: i32 = libc::SOCK_NONBLOCK;
    pub const CLOEXEC: i32 = libc::SOCK_CLOEXEC;
}

/// Socket options applied right after creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SocketOptions(u8);

impl SocketOptions {
    pub const NONE: Self = Self(0);
    pub const REUSE_ADDR: Self = Self(1 << 0);
    pub const REUSE_PORT: Self = Self(1 << 1);
    pub const KEEP_ALIVE: Self = Self(1 << 2);
    pub const TCP_NO_DELAY: Self = Self(1 << 3);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Options typical for a listening TCP socket.
    pub const fn listener() -> Self {
        Self(Self::REUSE_ADDR.0 | Self::REUSE_PORT.0)
    }
}

impl BitOr for SocketOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A bound, listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenContext {
    pub socket: FileDescriptor,
    /// Bound address as reported by the kernel (ephemeral port resolved).
    pub address: SocketAddr,
    pub backlog: i32,
}

/// An accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionContext {
    pub socket: FileDescriptor,
    pub peer: Option<SocketAddr>,
}

fn check(rc: libc::c_int) -> IoResult<libc::c_int> {
    if rc < 0 {
        SystemError::last_os_error().result()
    } else {
        Ok(rc)
    }
}

fn set_flag(fd: libc::c_int, level: libc::c_int, name: libc::c_int) -> IoResult<()> {
    let one: libc::c_int = 1;
    // Safety: option value is a live c_int of the advertised size
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &one as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    check(rc).map(drop)
}

fn apply(fd: libc::c_int, ty: SocketType, options: SocketOptions) -> IoResult<()> {
    if options.contains(SocketOptions::REUSE_ADDR) {
        set_flag(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR)?;
    }
    if options.contains(SocketOptions::REUSE_PORT) {
        set_flag(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT)?;
    }
    if options.contains(SocketOptions::KEEP_ALIVE) {
        set_flag(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE)?;
    }
    if options.contains(SocketOptions::TCP_NO_DELAY) && ty == SocketType::Stream {
        set_flag(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY)?;
    }
    Ok(())
}

/// Create and configure a socket.
pub fn open_socket(
    family: AddressFamily,
    ty: SocketType,
    flags: i32,
    options: SocketOptions,
) -> IoResult<FileDescriptor> {
    // Safety: plain syscall
    let fd = check(unsafe { libc::socket(family.raw(), ty.raw() | flags, 0) })?;
    if let Err(e) = apply(fd, ty, options) {
        // Safety: fd was created above and not shared
        unsafe { libc::close(fd) };
        return Err(e);
    }
    Ok(family.descriptor(fd))
}

/// Address the socket is bound to.
pub fn local_addr(socket: FileDescriptor) -> IoResult<SocketAddr> {
    // Safety: zeroed sockaddr_storage is valid
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    // Safety: storage/len are valid for writes of the advertised size
    check(unsafe {
        libc::getsockname(
            socket.fd(),
            &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
            &mut len,
        )
    })?;
    sockaddr::decode(&storage, len).ok_or_else(|| SystemError::EAFNOSUPPORT.into())
}

/// Create a socket, bind it to `address` and (for streams) listen.
pub fn bind_listen(
    address: SocketAddr,
    ty: SocketType,
    flags: i32,
    options: SocketOptions,
    backlog: i32,
) -> IoResult<ListenContext> {
    let socket = open_socket(AddressFamily::of(&address), ty, flags, options)?;

    let bound = (|| {
        // Safety: zeroed sockaddr_storage is valid
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let len = sockaddr::encode(&address, &mut storage);
        // Safety: storage holds an encoded address of length `len`
        check(unsafe {
            libc::bind(
                socket.fd(),
                &storage as *const libc::sockaddr_storage as *const libc::sockaddr,
                len,
            )
        })?;
        if ty == SocketType::Stream {
            check(unsafe { libc::listen(socket.fd(), backlog) })?;
        }
        local_addr(socket)
    })();

    match bound {
        Ok(address) => Ok(ListenContext { socket, address, backlog }),
        Err(e) => {
            unsafe { libc::close(socket.fd()) };
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options() {
        let opts = SocketOptions::REUSE_ADDR | SocketOptions::TCP_NO_DELAY;
        assert!(opts.contains(SocketOptions::REUSE_ADDR));
        assert!(!opts.contains(SocketOptions::KEEP_ALIVE));
        assert!(SocketOptions::listener().contains(SocketOptions::REUSE_PORT));
    }

    #[test]
    fn test_listen_resolves_ephemeral_port() {
        let ctx = bind_listen(
            "127.0.0.1:0".parse().unwrap(),
            SocketType::Stream,
            socket_flags::CLOEXEC,
            SocketOptions::listener(),
            16,
        )
        .unwrap();
        assert!(ctx.socket.is_socket());
        assert_ne!(ctx.address.port(), 0);
        assert_eq!(ctx.backlog, 16);
        unsafe { libc::close(ctx.socket.fd()) };
    }

    #[test]
    fn test_bind_conflict_reports_errno() {
        let first = bind_listen(
            "127.0.0.1:0".parse().unwrap(),
            SocketType::Stream,
            0,
            SocketOptions::NONE,
            4,
        )
        .unwrap();
        let second = bind_listen(first.address, SocketType::Stream, 0, SocketOptions::NONE, 4);
        assert_eq!(second.unwrap_err(), SystemError::EADDRINUSE.into());
        unsafe { libc::close(first.socket.fd()) };
    }
}
