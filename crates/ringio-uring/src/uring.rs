//! `UringDriver` - `RingDriver` over the `io-uring` crate.
//!
//! One `io_uring` instance per proactor. Submission is batched: the
//! proactor pushes any number of slots and calls `submit` once per
//! drive step (one `io_uring_enter`).

use std::io;
use std::time::Duration;

use io_uring::{opcode, squeue, types, IoUring};
use ringio_core::SystemError;
use tracing::{debug, info};

use crate::driver::{DriverError, RingDriver};
use crate::entry::{CompletionSlot, Opcode, SubmitSlot};

/// Smallest ring the driver will create.
pub const MIN_QUEUE_SIZE: u32 = 128;

/// Configuration for `UringDriver`.
#[derive(Debug, Clone)]
pub struct UringConfig {
    /// Submission ring entries. Rounded up to a power of two, at least
    /// `MIN_QUEUE_SIZE`.
    pub entries: u32,
    /// Kernel-side submission polling with this idle time, if set.
    pub sqpoll_idle: Option<Duration>,
}

impl Default for UringConfig {
    fn default() -> Self {
        Self {
            entries: MIN_QUEUE_SIZE,
            sqpoll_idle: None,
        }
    }
}

impl UringConfig {
    /// Ring size actually requested from the kernel.
    pub fn ring_size(&self) -> u32 {
        self.entries.max(MIN_QUEUE_SIZE).checked_next_power_of_two().unwrap_or(1 << 15)
    }
}

/// io_uring backed ring driver.
pub struct UringDriver {
    ring: Option<IoUring>,
    entries: u32,
}

fn os_error(err: &io::Error) -> SystemError {
    SystemError::from_code(err.raw_os_error().unwrap_or(libc::EIO))
}

impl UringDriver {
    pub fn new(config: &UringConfig) -> Result<Self, DriverError> {
        let entries = config.ring_size();
        let mut builder = IoUring::builder();
        if let Some(idle) = config.sqpoll_idle {
            builder.setup_sqpoll(idle.as_millis().min(u32::MAX as u128) as u32);
        }
        let ring = builder
            .build(entries)
            .map_err(|e| DriverError::Setup(os_error(&e)))?;

        debug!(entries, sqpoll = config.sqpoll_idle.is_some(), "io_uring created");
        Ok(Self {
            ring: Some(ring),
            entries,
        })
    }

    fn ring(&mut self) -> Result<&mut IoUring, DriverError> {
        self.ring.as_mut().ok_or(DriverError::Closed)
    }
}

/// Translate a slot into an SQE.
fn build_sqe(slot: &SubmitSlot) -> squeue::Entry {
    let fd = types::Fd(slot.fd);

    let sqe = match slot.opcode {
        Opcode::Nop => opcode::Nop::new().build(),
        Opcode::Timeout => opcode::Timeout::new(slot.addr as *const types::Timespec)
            .count(slot.aux)
            .flags(types::TimeoutFlags::from_bits_truncate(slot.op_flags))
            .build(),
        Opcode::LinkTimeout => opcode::LinkTimeout::new(slot.addr as *const types::Timespec)
            .flags(types::TimeoutFlags::from_bits_truncate(slot.op_flags))
            .build(),
        Opcode::Read => opcode::Read::new(fd, slot.addr as *mut u8, slot.len)
            .offset(slot.off)
            .build(),
        Opcode::Write => opcode::Write::new(fd, slot.addr as *const u8, slot.len)
            .offset(slot.off)
            .build(),
        Opcode::Readv => opcode::Readv::new(fd, slot.addr as *const libc::iovec, slot.len)
            .offset(slot.off)
            .build(),
        Opcode::Writev => opcode::Writev::new(fd, slot.addr as *const libc::iovec, slot.len)
            .offset(slot.off)
            .build(),
        Opcode::ReadFixed => opcode::ReadFixed::new(fd, slot.addr as *mut u8, slot.len, slot.aux as u16)
            .offset(slot.off)
            .build(),
        Opcode::WriteFixed => opcode::WriteFixed::new(fd, slot.addr as *const u8, slot.len, slot.aux as u16)
            .offset(slot.off)
            .build(),
        Opcode::OpenAt => opcode::OpenAt::new(fd, slot.addr as *const libc::c_char)
            .flags(slot.op_flags as i32)
            .mode(slot.aux)
            .build(),
        Opcode::Close => opcode::Close::new(fd).build(),
        Opcode::Statx => opcode::Statx::new(
            fd,
            slot.addr as *const libc::c_char,
            slot.off as *mut types::statx,
        )
        .flags(slot.op_flags as i32)
        .mask(slot.aux)
        .build(),
        Opcode::Accept => opcode::Accept::new(
            fd,
            slot.addr as *mut libc::sockaddr,
            slot.off as *mut libc::socklen_t,
        )
        .flags(slot.op_flags as i32)
        .build(),
        Opcode::Connect => opcode::Connect::new(fd, slot.addr as *const libc::sockaddr, slot.len).build(),
        Opcode::Splice => opcode::Splice::new(types::Fd(slot.fd_in), slot.off_in, fd, slot.off as i64, slot.len)
            .flags(slot.op_flags)
            .build(),
        Opcode::Fsync => opcode::Fsync::new(fd)
            .flags(types::FsyncFlags::from_bits_truncate(slot.op_flags))
            .build(),
        // fallocate(2) length travels in the address field
        Opcode::Fallocate => opcode::Fallocate::new(fd, slot.addr)
            .offset(slot.off)
            .mode(slot.op_flags as i32)
            .build(),
        Opcode::Send => opcode::Send::new(fd, slot.addr as *const u8, slot.len)
            .flags(slot.op_flags as i32)
            .build(),
        Opcode::Recv => opcode::Recv::new(fd, slot.addr as *mut u8, slot.len)
            .flags(slot.op_flags as i32)
            .build(),
        Opcode::AsyncCancel => opcode::AsyncCancel::new(slot.addr).build(),
    };

    sqe.user_data(slot.user_data)
        .flags(squeue::Flags::from_bits_truncate(slot.flags))
}

impl RingDriver for UringDriver {
    fn available(&mut self) -> usize {
        match self.ring.as_mut() {
            Some(ring) => {
                let sq = ring.submission();
                sq.capacity() - sq.len()
            }
            None => 0,
        }
    }

    fn push(&mut self, slot: &SubmitSlot) -> Result<(), DriverError> {
        let sqe = build_sqe(slot);
        let ring = self.ring()?;
        // Safety: the slot's pointers refer to memory owned by the
        // submitting exchange entry, which outlives the operation.
        unsafe { ring.submission().push(&sqe).map_err(|_| DriverError::RingFull) }
    }

    fn submit(&mut self, min_complete: u32, timeout: Option<Duration>) -> Result<usize, DriverError> {
        let ring = self.ring()?;
        let submitter = ring.submitter();
        let outcome = match timeout {
            Some(limit) if min_complete > 0 => {
                let ts = types::Timespec::from(limit);
                let args = types::SubmitArgs::new().timespec(&ts);
                submitter.submit_with_args(min_complete as usize, &args)
            }
            _ => submitter.submit_and_wait(min_complete as usize),
        };

        match outcome {
            Ok(n) => Ok(n),
            Err(e) => match e.raw_os_error() {
                // wait expired, interrupted, or completion ring overflowing:
                // the caller reaps and retries
                Some(libc::ETIME) | Some(libc::EINTR) | Some(libc::EBUSY) => Ok(0),
                _ => Err(DriverError::Submit(os_error(&e))),
            },
        }
    }

    fn reap(&mut self, buf: &mut [CompletionSlot]) -> usize {
        let Some(ring) = self.ring.as_mut() else {
            return 0;
        };
        let mut count = 0;
        for (dst, cqe) in buf.iter_mut().zip(ring.completion()) {
            *dst = CompletionSlot {
                user_data: cqe.user_data(),
                result: cqe.result(),
                flags: cqe.flags(),
            };
            count += 1;
        }
        count
    }

    unsafe fn register_buffers(&mut self, iovecs: &[libc::iovec]) -> Result<(), DriverError> {
        let ring = self.ring()?;
        ring.submitter()
            .register_buffers(iovecs)
            .map_err(|e| DriverError::Register(os_error(&e)))
    }

    fn capacity(&self) -> usize {
        self.entries as usize
    }

    fn shutdown(&mut self) {
        // Dropping the ring closes the fd and unmaps SQ/CQ
        if self.ring.take().is_some() {
            info!(entries = self.entries, "io_uring closed");
        }
    }
}
