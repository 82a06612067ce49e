//! Submission and completion slot types.
//!
//! A `SubmitSlot` is the ring-independent description of one SQE. The
//! exchange entries fill slots; the driver translates them into the
//! kernel layout. Pointer fields are addresses of memory owned by the
//! filling entry, which must stay put until the matching completion.

/// `user_data` carried by linked timeout SQEs. Their completions are
/// consumed by the proactor and never dispatched to an entry.
pub const LINK_TIMEOUT_KEY: u64 = u64::MAX;

/// `user_data` carried by cancellation SQEs. Like linked timeouts, their
/// completions never reach an entry.
pub const CANCEL_KEY: u64 = u64::MAX - 1;

/// Operation kinds understood by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Opcode {
    #[default]
    Nop,
    Timeout,
    LinkTimeout,
    Read,
    Write,
    Readv,
    Writev,
    ReadFixed,
    WriteFixed,
    OpenAt,
    Close,
    Statx,
    Accept,
    Connect,
    Splice,
    Fsync,
    Fallocate,
    Send,
    Recv,
    AsyncCancel,
}

/// SQE flags (subset of `IOSQE_*`).
pub mod sqe_flags {
    /// Wait for every previously submitted entry before starting.
    pub const IO_DRAIN: u8 = 1 << 1;
    /// The next entry depends on this one; used to pair an operation
    /// with its linked timeout.
    pub const IO_LINK: u8 = 1 << 2;
    /// Always punt to the async worker pool.
    pub const ASYNC: u8 = 1 << 4;
}

/// One submission.
///
/// Field use per opcode:
///
/// | Opcode            | fd      | addr          | len      | off            | op_flags      | aux        |
/// |-------------------|---------|---------------|----------|----------------|---------------|------------|
/// | Timeout           | -       | `*Timespec`   | -        | -              | timeout flags | count      |
/// | LinkTimeout       | -       | `*Timespec`   | -        | -              | timeout flags | -          |
/// | Read/Write        | fd      | buffer        | bytes    | file offset    | -             | -          |
/// | Readv/Writev      | fd      | `*iovec`      | iov count| file offset    | -             | -          |
/// | Read/WriteFixed   | fd      | buffer        | bytes    | file offset    | -             | buf index  |
/// | OpenAt            | dirfd   | `*c_char`     | -        | -              | open flags    | mode       |
/// | Close             | fd      | -             | -        | -              | -             | -          |
/// | Statx             | dirfd   | `*c_char`     | -        | `*statx`       | AT_* flags    | STATX mask |
/// | Accept            | fd      | `*sockaddr`   | -        | `*socklen_t`   | accept4 flags | -          |
/// | Connect           | fd      | `*sockaddr`   | addr len | -              | -             | -          |
/// | Splice            | fd out  | -             | bytes    | out offset     | splice flags  | -          |
/// | Fsync             | fd      | -             | -        | -              | fsync flags   | -          |
/// | Fallocate         | fd      | length        | -        | file offset    | mode          | -          |
/// | Send/Recv         | fd      | buffer        | bytes    | -              | msg flags     | -          |
/// | AsyncCancel       | -       | target key    | -        | -              | -             | -          |
///
/// Splice also uses `fd_in`/`off_in` for its source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SubmitSlot {
    pub user_data: u64,
    pub opcode: Opcode,
    /// `sqe_flags::*`
    pub flags: u8,
    pub fd: i32,
    pub addr: u64,
    pub len: u32,
    pub off: u64,
    pub op_flags: u32,
    pub aux: u32,
    pub fd_in: i32,
    pub off_in: i64,
}

impl SubmitSlot {
    /// Slot for `opcode` tagged with `user_data`, all other fields zero.
    #[inline]
    pub fn new(opcode: Opcode, user_data: u64) -> Self {
        Self { opcode, user_data, ..Self::default() }
    }

    #[inline]
    pub fn is_linked(&self) -> bool {
        self.flags & sqe_flags::IO_LINK != 0
    }
}

/// One completion as reported by the kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct CompletionSlot {
    pub user_data: u64,
    /// Non-negative result or negated errno.
    pub result: i32,
    pub flags: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_slot_zeroed() {
        let slot = SubmitSlot::new(Opcode::Read, 42);
        assert_eq!(slot.user_data, 42);
        assert_eq!(slot.opcode, Opcode::Read);
        assert_eq!(slot.fd, 0);
        assert!(!slot.is_linked());
    }

    #[test]
    fn test_reserved_keys_outside_key_range() {
        assert_ne!(CANCEL_KEY, LINK_TIMEOUT_KEY);
        assert!(u32::try_from(CANCEL_KEY).is_err());
        assert!(u32::try_from(LINK_TIMEOUT_KEY).is_err());
    }

    #[test]
    fn test_link_flag_matches_kernel_value() {
        // IOSQE_IO_LINK_BIT == 2
        assert_eq!(sqe_flags::IO_LINK, 4);
        let slot = SubmitSlot { flags: sqe_flags::IO_LINK, ..SubmitSlot::new(Opcode::Recv, 1) };
        assert!(slot.is_linked());
    }
}
