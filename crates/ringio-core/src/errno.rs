//! Kernel error codes as a closed enumeration.
//!
//! Every negative result reported by the ring is converted into a
//! `SystemError` before it reaches user code. Codes that have no named
//! variant are preserved in `SystemError::Unknown`.

macro_rules! system_errors {
    ($($name:ident = $code:path, $msg:literal;)*) => {
        /// A kernel error code.
        #[allow(clippy::upper_case_acronyms)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
        pub enum SystemError {
            $(
                #[doc = $msg]
                #[error($msg)]
                $name,
            )*
            /// Any code without a named variant.
            #[error("unknown errno {0}")]
            Unknown(i32),
        }

        impl SystemError {
            /// Map an errno to its variant. Accepts both `-EIO` (ring
            /// result convention) and `EIO`.
            pub fn from_code(code: i32) -> Self {
                match code.saturating_abs() {
                    $(c if c == $code => SystemError::$name,)*
                    other => SystemError::Unknown(other),
                }
            }

            /// The positive errno value.
            pub fn code(self) -> i32 {
                match self {
                    $(SystemError::$name => $code,)*
                    SystemError::Unknown(c) => c,
                }
            }

            /// Symbolic name, e.g. `"ENODATA"`.
            pub fn name(self) -> &'static str {
                match self {
                    $(SystemError::$name => stringify!($name),)*
                    SystemError::Unknown(_) => "UNKNOWN",
                }
            }
        }
    };
}

system_errors! {
    EPERM = libc::EPERM, "operation not permitted";
    ENOENT = libc::ENOENT, "no such file or directory";
    ESRCH = libc::ESRCH, "no such process";
    EINTR = libc::EINTR, "interrupted system call";
    EIO = libc::EIO, "i/o error";
    ENXIO = libc::ENXIO, "no such device or address";
    E2BIG = libc::E2BIG, "argument list too long";
    EBADF = libc::EBADF, "bad file descriptor";
    EAGAIN = libc::EAGAIN, "resource temporarily unavailable";
    ENOMEM = libc::ENOMEM, "out of memory";
    EACCES = libc::EACCES, "permission denied";
    EFAULT = libc::EFAULT, "bad address";
    EBUSY = libc::EBUSY, "device or resource busy";
    EEXIST = libc::EEXIST, "file exists";
    EXDEV = libc::EXDEV, "invalid cross-device link";
    ENODEV = libc::ENODEV, "no such device";
    ENOTDIR = libc::ENOTDIR, "not a directory";
    EISDIR = libc::EISDIR, "is a directory";
    EINVAL = libc::EINVAL, "invalid argument";
    ENFILE = libc::ENFILE, "too many open files in system";
    EMFILE = libc::EMFILE, "too many open files";
    ENOTTY = libc::ENOTTY, "inappropriate ioctl for device";
    EFBIG = libc::EFBIG, "file too large";
    ENOSPC = libc::ENOSPC, "no space left on device";
    ESPIPE = libc::ESPIPE, "illegal seek";
    EROFS = libc::EROFS, "read-only file system";
    EPIPE = libc::EPIPE, "broken pipe";
    ERANGE = libc::ERANGE, "result out of range";
    ENAMETOOLONG = libc::ENAMETOOLONG, "file name too long";
    ENOSYS = libc::ENOSYS, "function not implemented";
    ENOTEMPTY = libc::ENOTEMPTY, "directory not empty";
    ELOOP = libc::ELOOP, "too many levels of symbolic links";
    ENODATA = libc::ENODATA, "no data available";
    ETIME = libc::ETIME, "timer expired";
    EOVERFLOW = libc::EOVERFLOW, "value too large for defined data type";
    EBADFD = libc::EBADFD, "file descriptor in bad state";
    ENOTSOCK = libc::ENOTSOCK, "socket operation on non-socket";
    EDESTADDRREQ = libc::EDESTADDRREQ, "destination address required";
    EMSGSIZE = libc::EMSGSIZE, "message too long";
    EPROTOTYPE = libc::EPROTOTYPE, "protocol wrong type for socket";
    ENOPROTOOPT = libc::ENOPROTOOPT, "protocol not available";
    EPROTONOSUPPORT = libc::EPROTONOSUPPORT, "protocol not supported";
    EOPNOTSUPP = libc::EOPNOTSUPP, "operation not supported";
    EPFNOSUPPORT = libc::EPFNOSUPPORT, "protocol family not supported";
    EAFNOSUPPORT = libc::EAFNOSUPPORT, "address family not supported by protocol";
    EADDRINUSE = libc::EADDRINUSE, "address already in use";
    EADDRNOTAVAIL = libc::EADDRNOTAVAIL, "cannot assign requested address";
    ENETDOWN = libc::ENETDOWN, "network is down";
    ENETUNREACH = libc::ENETUNREACH, "network is unreachable";
    ECONNABORTED = libc::ECONNABORTED, "software caused connection abort";
    ECONNRESET = libc::ECONNRESET, "connection reset by peer";
    ENOBUFS = libc::ENOBUFS, "no buffer space available";
    EISCONN = libc::EISCONN, "transport endpoint is already connected";
    ENOTCONN = libc::ENOTCONN, "transport endpoint is not connected";
    ETIMEDOUT = libc::ETIMEDOUT, "connection timed out";
    ECONNREFUSED = libc::ECONNREFUSED, "connection refused";
    EHOSTUNREACH = libc::EHOSTUNREACH, "no route to host";
    EALREADY = libc::EALREADY, "operation already in progress";
    EINPROGRESS = libc::EINPROGRESS, "operation now in progress";
    ECANCELED = libc::ECANCELED, "operation canceled";
}

impl SystemError {
    /// The calling thread's last OS error.
    pub fn last_os_error() -> Self {
        let code = std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
        Self::from_code(code)
    }
}

impl From<std::io::Error> for SystemError {
    fn from(err: std::io::Error) -> Self {
        Self::from_code(err.raw_os_error().unwrap_or(libc::EIO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code_accepts_both_signs() {
        assert_eq!(SystemError::from_code(-libc::ENODATA), SystemError::ENODATA);
        assert_eq!(SystemError::from_code(libc::ENODATA), SystemError::ENODATA);
        assert_eq!(SystemError::from_code(-libc::ECANCELED), SystemError::ECANCELED);
    }

    #[test]
    fn test_code_round_trip() {
        for e in [SystemError::ETIME, SystemError::EPFNOSUPPORT, SystemError::EBADF] {
            assert_eq!(SystemError::from_code(e.code()), e);
        }
    }

    #[test]
    fn test_unknown_code_preserved() {
        let e = SystemError::from_code(-4000);
        assert_eq!(e, SystemError::Unknown(4000));
        assert_eq!(e.code(), 4000);
        assert_eq!(e.to_string(), "unknown errno 4000");
    }

    #[test]
    fn test_min_code_does_not_overflow() {
        assert!(matches!(SystemError::from_code(i32::MIN), SystemError::Unknown(_)));
    }

    #[test]
    fn test_display_and_name() {
        assert_eq!(SystemError::ENODATA.to_string(), "no data available");
        assert_eq!(SystemError::ENODATA.name(), "ENODATA");
    }

    #[test]
    fn test_from_io_error() {
        let err = std::io::Error::from_raw_os_error(libc::ENOENT);
        assert_eq!(SystemError::from(err), SystemError::ENOENT);
    }
}
