//! Descriptor handle passed to and returned from ring operations.

use std::fmt;
use std::os::fd::RawFd;

/// What a descriptor refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    /// Regular file, pipe, or anything that is not a socket.
    File,
    /// IPv4 socket.
    Socket4,
    /// IPv6 socket.
    Socket6,
}

/// A raw descriptor tagged with its kind.
///
/// This is a plain value: it does not close the descriptor on drop.
/// Closing goes through the proactor like every other operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileDescriptor {
    fd: RawFd,
    kind: DescriptorKind,
}

impl FileDescriptor {
    pub const STDIN: Self = Self::file(0);
    pub const STDOUT: Self = Self::file(1);
    pub const STDERR: Self = Self::file(2);

    #[inline]
    pub const fn file(fd: RawFd) -> Self {
        Self { fd, kind: DescriptorKind::File }
    }

    #[inline]
    pub const fn socket4(fd: RawFd) -> Self {
        Self { fd, kind: DescriptorKind::Socket4 }
    }

    #[inline]
    pub const fn socket6(fd: RawFd) -> Self {
        Self { fd, kind: DescriptorKind::Socket6 }
    }

    #[inline]
    pub const fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub const fn kind(&self) -> DescriptorKind {
        self.kind
    }

    #[inline]
    pub fn is_socket(&self) -> bool {
        self.kind != DescriptorKind::File
    }

    /// Socket address family (`AF_INET`/`AF_INET6`), if a socket.
    pub fn family(&self) -> Option<libc::c_int> {
        match self.kind {
            DescriptorKind::File => None,
            DescriptorKind::Socket4 => Some(libc::AF_INET),
            DescriptorKind::Socket6 => Some(libc::AF_INET6),
        }
    }
}

impl fmt::Display for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DescriptorKind::File => write!(f, "fd({})", self.fd),
            DescriptorKind::Socket4 => write!(f, "sock4({})", self.fd),
            DescriptorKind::Socket6 => write!(f, "sock6({})", self.fd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert!(!FileDescriptor::file(3).is_socket());
        assert!(FileDescriptor::socket4(4).is_socket());
        assert_eq!(FileDescriptor::socket6(5).family(), Some(libc::AF_INET6));
        assert_eq!(FileDescriptor::STDOUT.fd(), 1);
    }

    #[test]
    fn test_display() {
        assert_eq!(FileDescriptor::socket4(7).to_string(), "sock4(7)");
        assert_eq!(FileDescriptor::file(3).to_string(), "fd(3)");
    }
}
