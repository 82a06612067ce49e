//! Flag constants for proactor operations.

/// `open(2)` flags.
pub mod open_flags {
    pub const READ_ONLY: i32 = libc::O_RDONLY;
    pub const WRITE_ONLY: i32 = libc::O_WRONLY;
    pub const READ_WRITE: i32 = libc::O_RDWR;
    pub const CREATE: i32 = libc::O_CREAT;
    pub const TRUNCATE: i32 = libc::O_TRUNC;
    pub const APPEND: i32 = libc::O_APPEND;
    pub const EXCLUSIVE: i32 = libc::O_EXCL;
    pub const CLOEXEC: i32 = libc::O_CLOEXEC;
    pub const DIRECT: i32 = libc::O_DIRECT;
    pub const DSYNC: i32 = libc::O_DSYNC;
    pub const NOFOLLOW: i32 = libc::O_NOFOLLOW;
    pub const DIRECTORY: i32 = libc::O_DIRECTORY;
}

/// `send(2)`/`recv(2)` flags.
pub mod msg_flags {
    pub const DONT_WAIT: i32 = libc::MSG_DONTWAIT;
    pub const NO_SIGNAL: i32 = libc::MSG_NOSIGNAL;
    pub const WAIT_ALL: i32 = libc::MSG_WAITALL;
    pub const PEEK: i32 = libc::MSG_PEEK;
    pub const MORE: i32 = libc::MSG_MORE;
}

/// `splice(2)` flags.
pub mod splice_flags {
    pub const MOVE: u32 = libc::SPLICE_F_MOVE;
    pub const NONBLOCK: u32 = libc::SPLICE_F_NONBLOCK;
    pub const MORE: u32 = libc::SPLICE_F_MORE;
}

/// `fallocate(2)` modes.
pub mod fallocate_mode {
    pub const ALLOCATE: i32 = 0;
    pub const KEEP_SIZE: i32 = libc::FALLOC_FL_KEEP_SIZE;
    pub const PUNCH_HOLE: i32 = libc::FALLOC_FL_PUNCH_HOLE;
    pub const ZERO_RANGE: i32 = libc::FALLOC_FL_ZERO_RANGE;
}
