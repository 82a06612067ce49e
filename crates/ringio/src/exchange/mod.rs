//! Exchange entries - the per-operation records behind ring `user_data`.
//!
//! An entry is identified by its pool key, which is also the `user_data`
//! of its SQE. It owns everything the kernel may read or write while the
//! operation is in flight (timespecs, `statx` output, socket addresses,
//! iovec arrays, path strings, buffer handles) so those addresses stay
//! put until the completion arrives.
//!
//! Lifecycle: `prepare` (free -> queued), `fill` (queued -> submitted),
//! `complete` or `abandon` (-> free, yielding a `Delivery`). The pool
//! recycles the entry as soon as the delivery has been taken, before the
//! user callback runs.

pub mod pool;

use std::ffi::CString;
use std::mem;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use ringio_core::{Cause, FileDescriptor, IoResult, SystemError};
use ringio_uring::{
    sockaddr, sqe_flags, ConnectionContext, FileStat, IoBuffer, Opcode, SubmitSlot, Timespec,
    LINK_TIMEOUT_KEY,
};

use crate::proactor::{Proactor, SpliceDescriptor};

pub use pool::ExchangeEntryPool;

/// Completion callback of an operation yielding `T`.
pub type Callback<T> = Box<dyn FnOnce(IoResult<T>, &mut Proactor) + Send>;

/// io_uring treats an offset of -1 as "current file position".
const CURRENT_POSITION: u64 = u64::MAX;

const IORING_FSYNC_DATASYNC: u32 = 1;

/// One requested operation with its inputs and callback.
pub(crate) enum Operation {
    Nop {
        done: Callback<()>,
    },
    Delay {
        interval: Duration,
        started: Instant,
        done: Callback<Duration>,
    },
    Read {
        fd: FileDescriptor,
        buffer: IoBuffer,
        offset: Option<u64>,
        done: Callback<usize>,
    },
    Write {
        fd: FileDescriptor,
        buffer: IoBuffer,
        offset: Option<u64>,
        done: Callback<usize>,
    },
    ReadVector {
        fd: FileDescriptor,
        buffers: Vec<IoBuffer>,
        offset: Option<u64>,
        done: Callback<usize>,
    },
    WriteVector {
        fd: FileDescriptor,
        buffers: Vec<IoBuffer>,
        offset: Option<u64>,
        done: Callback<usize>,
    },
    ReadFixed {
        fd: FileDescriptor,
        buffer: IoBuffer,
        offset: Option<u64>,
        done: Callback<usize>,
    },
    WriteFixed {
        fd: FileDescriptor,
        buffer: IoBuffer,
        offset: Option<u64>,
        done: Callback<usize>,
    },
    Recv {
        fd: FileDescriptor,
        buffer: IoBuffer,
        flags: i32,
        done: Callback<usize>,
    },
    Send {
        fd: FileDescriptor,
        buffer: IoBuffer,
        flags: i32,
        done: Callback<usize>,
    },
    Open {
        path: CString,
        flags: i32,
        mode: u32,
        done: Callback<FileDescriptor>,
    },
    Close {
        fd: FileDescriptor,
        done: Callback<()>,
    },
    Stat {
        dirfd: i32,
        path: CString,
        flags: i32,
        mask: u32,
        done: Callback<FileStat>,
    },
    Accept {
        fd: FileDescriptor,
        flags: i32,
        done: Callback<ConnectionContext>,
    },
    Connect {
        fd: FileDescriptor,
        address: SocketAddr,
        done: Callback<FileDescriptor>,
    },
    Splice {
        splice: SpliceDescriptor,
        done: Callback<usize>,
    },
    FileSync {
        fd: FileDescriptor,
        sync_metadata: bool,
        done: Callback<()>,
    },
    FileAlloc {
        fd: FileDescriptor,
        mode: i32,
        offset: u64,
        length: u64,
        done: Callback<()>,
    },
}

impl Operation {
    /// Reject requests that must never reach the kernel.
    pub(crate) fn validate(&self) -> Result<(), Cause> {
        match self {
            Operation::Write { buffer, .. } | Operation::Send { buffer, .. } if buffer.used() == 0 => {
                SystemError::ENODATA.result()
            }
            Operation::WriteFixed { buffer, .. } if buffer.used() == 0 => SystemError::ENODATA.result(),
            Operation::WriteVector { buffers, .. } if buffers.iter().all(|b| b.used() == 0) => {
                SystemError::ENODATA.result()
            }
            Operation::ReadVector { buffers, .. } if buffers.is_empty() => SystemError::EINVAL.result(),
            Operation::ReadFixed { buffer, .. } | Operation::WriteFixed { buffer, .. }
                if buffer.fixed_index().is_none() =>
            {
                SystemError::EINVAL.result()
            }
            Operation::Accept { fd, .. } if !fd.is_socket() => SystemError::ENOTSOCK.result(),
            Operation::Connect { fd, address, .. } => {
                if !fd.is_socket() {
                    SystemError::ENOTSOCK.result()
                } else if fd.family() != Some(sockaddr::family(address)) {
                    SystemError::EAFNOSUPPORT.result()
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    fn buffers(&self) -> &[IoBuffer] {
        match self {
            Operation::Read { buffer, .. }
            | Operation::Write { buffer, .. }
            | Operation::ReadFixed { buffer, .. }
            | Operation::WriteFixed { buffer, .. }
            | Operation::Recv { buffer, .. }
            | Operation::Send { buffer, .. } => std::slice::from_ref(buffer),
            Operation::ReadVector { buffers, .. } | Operation::WriteVector { buffers, .. } => buffers,
            _ => &[],
        }
    }

    /// Mark every buffer busy for the kernel. `EBUSY`, with nothing
    /// claimed, if any of them already is.
    pub(crate) fn claim(&self) -> Result<(), Cause> {
        let buffers = self.buffers();
        for (i, buffer) in buffers.iter().enumerate() {
            if !buffer.try_claim() {
                buffers[..i].iter().for_each(IoBuffer::unclaim);
                return SystemError::EBUSY.result();
            }
        }
        Ok(())
    }

    pub(crate) fn unclaim(&self) {
        self.buffers().iter().for_each(IoBuffer::unclaim);
    }

    /// Deliver `cause` without touching the ring.
    pub(crate) fn fail(self, cause: Cause) -> Delivery {
        match self {
            Operation::Nop { done } | Operation::Close { done, .. } => Delivery::Unit(done, Err(cause)),
            Operation::FileSync { done, .. } | Operation::FileAlloc { done, .. } => {
                Delivery::Unit(done, Err(cause))
            }
            Operation::Delay { done, .. } => Delivery::Elapsed(done, Err(cause)),
            Operation::Read { done, .. }
            | Operation::Write { done, .. }
            | Operation::ReadVector { done, .. }
            | Operation::WriteVector { done, .. }
            | Operation::ReadFixed { done, .. }
            | Operation::WriteFixed { done, .. }
            | Operation::Recv { done, .. }
            | Operation::Send { done, .. }
            | Operation::Splice { done, .. } => Delivery::Size(done, Err(cause)),
            Operation::Open { done, .. } | Operation::Connect { done, .. } => {
                Delivery::Descriptor(done, Err(cause))
            }
            Operation::Stat { done, .. } => Delivery::Stat(done, Err(cause)),
            Operation::Accept { done, .. } => Delivery::Connection(done, Err(cause)),
        }
    }

    /// Build the SQE. Pointers target `scratch` or memory owned by `self`.
    fn fill(&self, key: u32, scratch: &mut Scratch) -> SubmitSlot {
        let user_data = u64::from(key);
        match self {
            Operation::Nop { .. } => SubmitSlot::new(Opcode::Nop, user_data),
            Operation::Delay { interval, .. } => {
                scratch.timespec = Timespec::from(*interval);
                SubmitSlot {
                    addr: &scratch.timespec as *const Timespec as u64,
                    // pure timer: completes only by expiry
                    aux: 0,
                    ..SubmitSlot::new(Opcode::Timeout, user_data)
                }
            }
            Operation::Read { fd, buffer, offset, .. } => {
                buffer_slot(Opcode::Read, user_data, *fd, buffer, buffer.capacity(), *offset)
            }
            Operation::Write { fd, buffer, offset, .. } => {
                buffer_slot(Opcode::Write, user_data, *fd, buffer, buffer.used(), *offset)
            }
            Operation::ReadFixed { fd, buffer, offset, .. } => SubmitSlot {
                aux: u32::from(buffer.fixed_index().unwrap_or_default()),
                ..buffer_slot(Opcode::ReadFixed, user_data, *fd, buffer, buffer.capacity(), *offset)
            },
            Operation::WriteFixed { fd, buffer, offset, .. } => SubmitSlot {
                aux: u32::from(buffer.fixed_index().unwrap_or_default()),
                ..buffer_slot(Opcode::WriteFixed, user_data, *fd, buffer, buffer.used(), *offset)
            },
            Operation::ReadVector { fd, buffers, offset, .. } => {
                scratch.set_iovecs(buffers, IoBuffer::capacity);
                vector_slot(Opcode::Readv, user_data, *fd, scratch, *offset)
            }
            Operation::WriteVector { fd, buffers, offset, .. } => {
                scratch.set_iovecs(buffers, IoBuffer::used);
                vector_slot(Opcode::Writev, user_data, *fd, scratch, *offset)
            }
            Operation::Recv { fd, buffer, flags, .. } => SubmitSlot {
                op_flags: *flags as u32,
                ..buffer_slot(Opcode::Recv, user_data, *fd, buffer, buffer.capacity(), None)
            },
            Operation::Send { fd, buffer, flags, .. } => SubmitSlot {
                op_flags: *flags as u32,
                ..buffer_slot(Opcode::Send, user_data, *fd, buffer, buffer.used(), None)
            },
            Operation::Open { path, flags, mode, .. } => SubmitSlot {
                fd: libc::AT_FDCWD,
                addr: path.as_ptr() as u64,
                op_flags: *flags as u32,
                aux: *mode,
                ..SubmitSlot::new(Opcode::OpenAt, user_data)
            },
            Operation::Close { fd, .. } => SubmitSlot {
                fd: fd.fd(),
                ..SubmitSlot::new(Opcode::Close, user_data)
            },
            Operation::Stat { dirfd, path, flags, mask, .. } => SubmitSlot {
                fd: *dirfd,
                addr: path.as_ptr() as u64,
                off: &mut scratch.statx as *mut libc::statx as u64,
                op_flags: *flags as u32,
                aux: *mask,
                ..SubmitSlot::new(Opcode::Statx, user_data)
            },
            Operation::Accept { fd, flags, .. } => {
                scratch.addr_len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
                SubmitSlot {
                    fd: fd.fd(),
                    addr: &mut scratch.addr as *mut libc::sockaddr_storage as u64,
                    off: &mut scratch.addr_len as *mut libc::socklen_t as u64,
                    op_flags: *flags as u32,
                    ..SubmitSlot::new(Opcode::Accept, user_data)
                }
            }
            Operation::Connect { fd, address, .. } => {
                scratch.addr_len = sockaddr::encode(address, &mut scratch.addr);
                SubmitSlot {
                    fd: fd.fd(),
                    addr: &scratch.addr as *const libc::sockaddr_storage as u64,
                    len: scratch.addr_len,
                    ..SubmitSlot::new(Opcode::Connect, user_data)
                }
            }
            Operation::Splice { splice, .. } => SubmitSlot {
                fd: splice.to.fd(),
                off: splice.to_offset.unwrap_or(CURRENT_POSITION),
                fd_in: splice.from.fd(),
                off_in: splice.from_offset.map_or(-1, |o| o as i64),
                len: splice.length,
                op_flags: splice.flags,
                ..SubmitSlot::new(Opcode::Splice, user_data)
            },
            Operation::FileSync { fd, sync_metadata, .. } => SubmitSlot {
                fd: fd.fd(),
                op_flags: if *sync_metadata { 0 } else { IORING_FSYNC_DATASYNC },
                ..SubmitSlot::new(Opcode::Fsync, user_data)
            },
            Operation::FileAlloc { fd, mode, offset, length, .. } => SubmitSlot {
                fd: fd.fd(),
                addr: *length,
                off: *offset,
                op_flags: *mode as u32,
                ..SubmitSlot::new(Opcode::Fallocate, user_data)
            },
        }
    }

    /// Turn a raw completion into a typed delivery.
    fn decode(self, res: i32, scratch: &Scratch) -> Delivery {
        match self {
            Operation::Nop { done }
            | Operation::Close { done, .. }
            | Operation::FileSync { done, .. }
            | Operation::FileAlloc { done, .. } => Delivery::Unit(done, unit(res)),
            Operation::Delay { started, done, .. } => {
                let r = if res == -libc::ETIME {
                    Ok(started.elapsed())
                } else {
                    Err(Cause::from_code(res))
                };
                Delivery::Elapsed(done, r)
            }
            Operation::Read { buffer, done, .. }
            | Operation::ReadFixed { buffer, done, .. }
            | Operation::Recv { buffer, done, .. } => {
                let r = bytes_read(res);
                if let Ok(n) = r {
                    buffer.mark_used(n);
                }
                Delivery::Size(done, r)
            }
            Operation::ReadVector { buffers, done, .. } => {
                let r = bytes_read(res);
                if let Ok(n) = r {
                    let mut left = n;
                    for buffer in &buffers {
                        let take = left.min(buffer.capacity());
                        buffer.mark_used(take);
                        left -= take;
                    }
                }
                Delivery::Size(done, r)
            }
            Operation::Write { done, .. }
            | Operation::WriteVector { done, .. }
            | Operation::WriteFixed { done, .. }
            | Operation::Send { done, .. }
            | Operation::Splice { done, .. } => Delivery::Size(done, bytes_written(res)),
            Operation::Open { done, .. } => {
                let r = if res >= 0 { Ok(FileDescriptor::file(res)) } else { Err(Cause::from_code(res)) };
                Delivery::Descriptor(done, r)
            }
            Operation::Stat { done, .. } => {
                let r = if res >= 0 { Ok(FileStat::from(&scratch.statx)) } else { Err(Cause::from_code(res)) };
                Delivery::Stat(done, r)
            }
            Operation::Accept { fd, done, .. } => {
                let r = if res >= 0 {
                    let socket = match fd.family() {
                        Some(libc::AF_INET6) => FileDescriptor::socket6(res),
                        _ => FileDescriptor::socket4(res),
                    };
                    Ok(ConnectionContext {
                        socket,
                        peer: sockaddr::decode(&scratch.addr, scratch.addr_len),
                    })
                } else {
                    Err(Cause::from_code(res))
                };
                Delivery::Connection(done, r)
            }
            Operation::Connect { fd, done, .. } => {
                let r = if res == 0 { Ok(fd) } else { Err(Cause::from_code(res)) };
                Delivery::Descriptor(done, r)
            }
        }
    }
}

fn buffer_slot(
    opcode: Opcode,
    user_data: u64,
    fd: FileDescriptor,
    buffer: &IoBuffer,
    len: usize,
    offset: Option<u64>,
) -> SubmitSlot {
    SubmitSlot {
        fd: fd.fd(),
        addr: buffer.as_mut_ptr() as u64,
        len: len.min(u32::MAX as usize) as u32,
        off: offset.unwrap_or(CURRENT_POSITION),
        ..SubmitSlot::new(opcode, user_data)
    }
}

fn vector_slot(opcode: Opcode, user_data: u64, fd: FileDescriptor, scratch: &Scratch, offset: Option<u64>) -> SubmitSlot {
    SubmitSlot {
        fd: fd.fd(),
        addr: scratch.iovecs.as_ptr() as u64,
        len: scratch.iovecs.len() as u32,
        off: offset.unwrap_or(CURRENT_POSITION),
        ..SubmitSlot::new(opcode, user_data)
    }
}

fn unit(res: i32) -> IoResult<()> {
    if res >= 0 {
        Ok(())
    } else {
        Err(Cause::from_code(res))
    }
}

/// 0 bytes read means end of data.
fn bytes_read(res: i32) -> IoResult<usize> {
    match res {
        0 => SystemError::ENODATA.result(),
        n if n > 0 => Ok(n as usize),
        e => Err(Cause::from_code(e)),
    }
}

fn bytes_written(res: i32) -> IoResult<usize> {
    bytes_read(res)
}

/// A decided result paired with the callback that receives it.
pub(crate) enum Delivery {
    Unit(Callback<()>, IoResult<()>),
    Size(Callback<usize>, IoResult<usize>),
    Elapsed(Callback<Duration>, IoResult<Duration>),
    Descriptor(Callback<FileDescriptor>, IoResult<FileDescriptor>),
    Stat(Callback<FileStat>, IoResult<FileStat>),
    Connection(Callback<ConnectionContext>, IoResult<ConnectionContext>),
}

impl Delivery {
    pub(crate) fn run(self, proactor: &mut Proactor) {
        match self {
            Delivery::Unit(done, r) => done(r, proactor),
            Delivery::Size(done, r) => done(r, proactor),
            Delivery::Elapsed(done, r) => done(r, proactor),
            Delivery::Descriptor(done, r) => done(r, proactor),
            Delivery::Stat(done, r) => done(r, proactor),
            Delivery::Connection(done, r) => done(r, proactor),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_ok(&self) -> bool {
        match self {
            Delivery::Unit(_, r) => r.is_ok(),
            Delivery::Size(_, r) => r.is_ok(),
            Delivery::Elapsed(_, r) => r.is_ok(),
            Delivery::Descriptor(_, r) => r.is_ok(),
            Delivery::Stat(_, r) => r.is_ok(),
            Delivery::Connection(_, r) => r.is_ok(),
        }
    }
}

/// Kernel-visible memory owned by an entry.
struct Scratch {
    timespec: Timespec,
    link_timespec: Timespec,
    statx: libc::statx,
    addr: libc::sockaddr_storage,
    addr_len: libc::socklen_t,
    iovecs: Vec<libc::iovec>,
}

impl Scratch {
    fn new() -> Self {
        Self {
            timespec: Timespec::new(),
            link_timespec: Timespec::new(),
            // Safety: plain C structs, all-zero is a valid value
            statx: unsafe { mem::zeroed() },
            addr: unsafe { mem::zeroed() },
            addr_len: 0,
            iovecs: Vec::new(),
        }
    }

    fn set_iovecs(&mut self, buffers: &[IoBuffer], len: fn(&IoBuffer) -> usize) {
        self.iovecs.clear();
        self.iovecs.extend(buffers.iter().map(|b| libc::iovec {
            iov_base: b.as_mut_ptr().cast(),
            iov_len: len(b),
        }));
    }
}

/// Pooled operation record; see the module docs.
pub struct ExchangeEntry {
    key: u32,
    op: Option<Operation>,
    timeout: Option<Duration>,
    scratch: Scratch,
}

// Safety: raw pointers in `scratch` point into the entry itself or into
// buffers it holds; the entry is only touched by its owning proactor.
unsafe impl Send for ExchangeEntry {}

impl ExchangeEntry {
    pub(crate) fn new(key: u32) -> Self {
        Self {
            key,
            op: None,
            timeout: None,
            scratch: Scratch::new(),
        }
    }

    #[inline]
    pub fn key(&self) -> u32 {
        self.key
    }

    /// True between `prepare` and completion.
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        self.op.is_some()
    }

    /// True if submission needs a second slot for a linked timeout.
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.timeout.is_some()
    }

    /// Load an operation. Hands it back if the entry is busy.
    pub(crate) fn prepare(&mut self, op: Operation, timeout: Option<Duration>) -> Result<(), Operation> {
        if self.op.is_some() {
            return Err(op);
        }
        self.op = Some(op);
        self.timeout = timeout;
        Ok(())
    }

    /// SQE for the loaded operation, plus its linked timeout SQE if a
    /// timeout was requested.
    pub(crate) fn fill(&mut self) -> Option<(SubmitSlot, Option<SubmitSlot>)> {
        let op = self.op.as_ref()?;
        let mut primary = op.fill(self.key, &mut self.scratch);
        let link = self.timeout.map(|limit| {
            primary.flags |= sqe_flags::IO_LINK;
            self.scratch.link_timespec = Timespec::from(limit);
            SubmitSlot {
                addr: &self.scratch.link_timespec as *const Timespec as u64,
                ..SubmitSlot::new(Opcode::LinkTimeout, LINK_TIMEOUT_KEY)
            }
        });
        Some((primary, link))
    }

    /// Consume a completion. `None` if nothing was in flight.
    pub(crate) fn complete(&mut self, res: i32) -> Option<Delivery> {
        let op = self.op.take()?;
        self.timeout = None;
        op.unclaim();
        Some(op.decode(res, &self.scratch))
    }

    /// Give up on the loaded operation with `cause`.
    pub(crate) fn abandon(&mut self, cause: Cause) -> Option<Delivery> {
        let op = self.op.take()?;
        self.timeout = None;
        op.unclaim();
        Some(op.fail(cause))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size_cb() -> Callback<usize> {
        Box::new(|_, _| {})
    }

    #[test]
    fn test_zero_length_write_rejected() {
        let op = Operation::Write {
            fd: FileDescriptor::STDOUT,
            buffer: IoBuffer::new(8),
            offset: None,
            done: size_cb(),
        };
        assert_eq!(op.validate(), SystemError::ENODATA.result());
    }

    #[test]
    fn test_connect_checks_socket_and_family() {
        let v4: SocketAddr = "127.0.0.1:80".parse().unwrap();
        let file = Operation::Connect {
            fd: FileDescriptor::file(5),
            address: v4,
            done: Box::new(|_, _| {}),
        };
        assert_eq!(file.validate(), SystemError::ENOTSOCK.result());

        let v6_socket = Operation::Connect {
            fd: FileDescriptor::socket6(5),
            address: v4,
            done: Box::new(|_, _| {}),
        };
        assert_eq!(v6_socket.validate(), SystemError::EAFNOSUPPORT.result());
    }

    #[test]
    fn test_fixed_op_needs_fixed_buffer() {
        let op = Operation::ReadFixed {
            fd: FileDescriptor::file(3),
            buffer: IoBuffer::new(8),
            offset: Some(0),
            done: size_cb(),
        };
        assert_eq!(op.validate(), SystemError::EINVAL.result());
    }

    #[test]
    fn test_claim_is_all_or_nothing() {
        let a = IoBuffer::new(4);
        let b = IoBuffer::new(4);
        assert!(b.try_claim());
        let op = Operation::ReadVector {
            fd: FileDescriptor::file(3),
            buffers: vec![a.clone(), b.clone()],
            offset: None,
            done: size_cb(),
        };
        assert_eq!(op.claim(), SystemError::EBUSY.result());
        assert!(!a.is_busy());
        b.unclaim();
        assert!(op.claim().is_ok());
        assert!(a.is_busy() && b.is_busy());
        op.unclaim();
        assert!(!a.is_busy());
    }

    #[test]
    fn test_fill_with_linked_timeout() {
        let buffer = IoBuffer::new(64);
        let mut entry = ExchangeEntry::new(7);
        let op = Operation::Read {
            fd: FileDescriptor::file(3),
            buffer: buffer.clone(),
            offset: None,
            done: size_cb(),
        };
        assert!(entry.prepare(op, Some(Duration::from_millis(5))).is_ok());
        assert!(entry.is_linked());

        let (primary, link) = entry.fill().unwrap();
        assert_eq!(primary.user_data, 7);
        assert_eq!(primary.opcode, Opcode::Read);
        assert_eq!(primary.len, 64);
        assert_eq!(primary.off, CURRENT_POSITION);
        assert_eq!(primary.addr, buffer.as_mut_ptr() as u64);
        assert!(primary.is_linked());

        let link = link.unwrap();
        assert_eq!(link.opcode, Opcode::LinkTimeout);
        assert_eq!(link.user_data, LINK_TIMEOUT_KEY);
        assert!(!link.is_linked());
    }

    #[test]
    fn test_prepare_rejects_busy_entry() {
        let mut entry = ExchangeEntry::new(0);
        assert!(entry.prepare(Operation::Nop { done: Box::new(|_, _| {}) }, None).is_ok());
        assert!(entry.prepare(Operation::Nop { done: Box::new(|_, _| {}) }, None).is_err());
    }

    #[test]
    fn test_read_completion_marks_used() {
        let buffer = IoBuffer::new(16);
        let mut entry = ExchangeEntry::new(1);
        let op = Operation::Read {
            fd: FileDescriptor::file(3),
            buffer: buffer.clone(),
            offset: Some(0),
            done: size_cb(),
        };
        op.claim().unwrap();
        entry.prepare(op, None).ok();
        let delivery = entry.complete(5).unwrap();
        assert!(delivery.is_ok());
        assert_eq!(buffer.used(), 5);
        assert!(!buffer.is_busy());
        assert!(!entry.is_in_flight());
        assert!(entry.complete(5).is_none());
    }

    #[test]
    fn test_decode_table() {
        assert_eq!(bytes_read(0), SystemError::ENODATA.result());
        assert_eq!(bytes_read(12), Ok(12));
        assert_eq!(bytes_read(-libc::EBADF), SystemError::EBADF.result());
        assert_eq!(bytes_written(0), SystemError::ENODATA.result());
        assert_eq!(unit(0), Ok(()));
        assert_eq!(unit(-libc::ECANCELED), SystemError::ECANCELED.result());
    }

    #[test]
    fn test_delay_expiry_is_success() {
        let mut entry = ExchangeEntry::new(2);
        let op = Operation::Delay {
            interval: Duration::from_millis(1),
            started: Instant::now(),
            done: Box::new(|_, _| {}),
        };
        entry.prepare(op, None).ok();
        let (slot, link) = entry.fill().unwrap();
        assert_eq!(slot.opcode, Opcode::Timeout);
        assert_eq!(slot.aux, 0);
        assert!(link.is_none());
        assert!(entry.complete(-libc::ETIME).unwrap().is_ok());
    }

    #[test]
    fn test_writev_iovecs_use_data_length() {
        let a = IoBuffer::from_slice(b"abc");
        let b = IoBuffer::from_slice(b"defgh");
        let mut entry = ExchangeEntry::new(3);
        let op = Operation::WriteVector {
            fd: FileDescriptor::file(4),
            buffers: vec![a, b],
            offset: Some(10),
            done: size_cb(),
        };
        entry.prepare(op, None).ok();
        let (slot, _) = entry.fill().unwrap();
        assert_eq!(slot.opcode, Opcode::Writev);
        assert_eq!(slot.len, 2);
        assert_eq!(slot.off, 10);
        let lens: Vec<usize> = entry.scratch.iovecs.iter().map(|v| v.iov_len).collect();
        assert_eq!(lens, vec![3, 5]);
    }
}
