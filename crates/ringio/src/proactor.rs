//! # Proactor - one ring, one thread
//!
//! A `Proactor` owns a ring driver, an exchange entry pool and a queue of
//! prepared-but-unsubmitted entries. Every operation method validates
//! its arguments, loads an entry and queues its key; nothing reaches the
//! kernel until the owner drives the proactor:
//!
//! 1. `process_submissions` writes as many queued entries as fit into
//!    the submission ring (two slots for an entry with a linked timeout)
//! 2. the driver publishes them with one `io_uring_enter`
//! 3. `process_completions` reaps a batch of completions and, for each,
//!    decodes the result, releases the entry and runs the callback
//!
//! A proactor is not synchronized. It is created and driven by one
//! thread; `ProactorPool` gives each runner thread its own.
//!
//! Callbacks receive `&mut Proactor`, so a completion handler can issue
//! the next operation directly.

use std::collections::VecDeque;
use std::ffi::CString;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, Instant};

use ringio_core::{Cause, FileDescriptor, IoResult, SystemError};
use ringio_uring::socket::{bind_listen, open_socket};
use ringio_uring::{
    stat_flags, AddressFamily, CompletionSlot, ConnectionContext, FileStat, FixedBufferArena,
    IoBuffer, ListenContext, Opcode, RingDriver, SocketOptions, SocketType, SubmitSlot, UringDriver,
    CANCEL_KEY, LINK_TIMEOUT_KEY,
};
use tracing::{debug, info, trace, warn};

use crate::config::ProactorConfig;
use crate::exchange::{Delivery, ExchangeEntryPool, Operation};

/// Source and destination of a `splice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceDescriptor {
    pub from: FileDescriptor,
    /// `None` reads from the current position (required for pipes).
    pub from_offset: Option<u64>,
    pub to: FileDescriptor,
    pub to_offset: Option<u64>,
    pub length: u32,
    /// `splice_flags::*`
    pub flags: u32,
}

pub struct Proactor {
    driver: Box<dyn RingDriver>,
    pool: ExchangeEntryPool,
    /// Keys of prepared entries not yet in the ring.
    queue: VecDeque<u32>,
    completions: Vec<CompletionSlot>,
    /// Entries written to the ring and not yet completed.
    in_flight: usize,
    fixed: Option<FixedBufferArena>,
    shutdown_grace: Duration,
    closed: bool,
    /// Set while shutdown waits for cancellation requests.
    cancelling: bool,
}

impl Proactor {
    /// Proactor over a fresh io_uring.
    pub fn new(config: &ProactorConfig) -> IoResult<Self> {
        let driver = UringDriver::new(&config.uring())?;
        Ok(Self::with_driver(Box::new(driver), config))
    }

    /// Proactor over any ring driver.
    pub fn with_driver(driver: Box<dyn RingDriver>, config: &ProactorConfig) -> Self {
        Self {
            driver,
            pool: ExchangeEntryPool::new(config.pool_size),
            queue: VecDeque::with_capacity(config.queue_size as usize),
            completions: vec![CompletionSlot::default(); config.completion_batch.max(1)],
            in_flight: 0,
            fixed: None,
            shutdown_grace: config.shutdown_grace,
            closed: false,
            cancelling: false,
        }
    }

    /// Register `arena` as fixed buffer index 0 of this ring.
    pub fn register_fixed(&mut self, arena: &FixedBufferArena) -> IoResult<()> {
        let iovec = arena.iovec();
        // Safety: the proactor keeps a clone of the arena, so the mapping
        // outlives the registration
        unsafe { self.driver.register_buffers(std::slice::from_ref(&iovec))? };
        self.fixed = Some(arena.clone());
        debug!(bytes = arena.size(), "fixed buffers registered");
        Ok(())
    }

    /// Carve a buffer from the registered arena. `ENXIO` if none is
    /// registered.
    pub fn allocate_fixed_buffer(&self, size: usize) -> IoResult<IoBuffer> {
        match &self.fixed {
            Some(arena) => arena.allocate(size),
            None => SystemError::ENXIO.result(),
        }
    }

    /// Prepared operations waiting for ring space.
    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Operations handed to the kernel and not yet completed.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight == 0
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // ── Drive ──

    /// One non-blocking drive step. Returns completions delivered.
    pub fn process_io(&mut self) -> usize {
        if self.process_submissions() > 0 {
            if let Err(e) = self.driver.submit(0, None) {
                warn!(error = %e, "ring submit failed");
            }
        }
        self.process_completions()
    }

    /// Drive step that blocks up to `timeout` for a completion when
    /// anything is in flight.
    pub fn wait_io(&mut self, timeout: Duration) -> usize {
        let pushed = self.process_submissions();
        let min_complete = u32::from(self.in_flight > 0);
        if pushed > 0 || min_complete > 0 {
            if let Err(e) = self.driver.submit(min_complete, Some(timeout)) {
                warn!(error = %e, "ring submit failed");
            }
        }
        self.process_completions()
    }

    /// Move queued entries into the submission ring. Returns entries
    /// written.
    pub fn process_submissions(&mut self) -> usize {
        let mut pushed = 0;
        while let Some(&key) = self.queue.front() {
            let Some(entry) = self.pool.lookup(key) else {
                self.queue.pop_front();
                continue;
            };
            let needed = if entry.is_linked() { 2 } else { 1 };
            if self.driver.available() < needed {
                break;
            }
            let Some((primary, link)) = entry.fill() else {
                self.queue.pop_front();
                continue;
            };
            if self.driver.push(&primary).is_err() {
                break;
            }
            if let Some(link) = link {
                if let Err(e) = self.driver.push(&link) {
                    // slot count was checked above
                    warn!(key, error = %e, "linked timeout not queued");
                }
            }
            self.queue.pop_front();
            self.in_flight += 1;
            pushed += 1;
        }
        if pushed > 0 {
            trace!(pushed, queued = self.queue.len(), "submissions written");
        }
        pushed
    }

    /// Reap one batch of completions and deliver them. Returns
    /// completions delivered.
    pub fn process_completions(&mut self) -> usize {
        let mut batch = mem::take(&mut self.completions);
        let reaped = self.driver.reap(&mut batch);
        let mut delivered = 0;
        for slot in &batch[..reaped] {
            if self.dispatch(slot) {
                delivered += 1;
            }
        }
        if reaped > 0 {
            trace!(reaped, delivered, in_flight = self.in_flight, "completions drained");
        }
        self.completions = batch;
        delivered
    }

    fn dispatch(&mut self, slot: &CompletionSlot) -> bool {
        if slot.user_data == LINK_TIMEOUT_KEY || slot.user_data == CANCEL_KEY {
            return false;
        }
        let cancelled = self.cancelling && slot.result == -libc::ECANCELED;
        let delivery = u32::try_from(slot.user_data).ok().and_then(|key| {
            let entry = self.pool.lookup(key)?;
            let delivery = if cancelled {
                entry.abandon(Cause::Shutdown)
            } else {
                entry.complete(slot.result)
            };
            Some((key, delivery?))
        });
        match delivery {
            Some((key, delivery)) => {
                self.pool.release(key);
                self.in_flight = self.in_flight.saturating_sub(1);
                delivery.run(self);
                true
            }
            None => {
                warn!(user_data = slot.user_data, result = slot.result, "completion for unknown key");
                false
            }
        }
    }

    /// Validate, claim buffers and queue. Failures are delivered to the
    /// callback right away and never touch the ring.
    fn enqueue(&mut self, op: Operation, timeout: Option<Duration>) {
        if self.closed {
            return op.fail(Cause::Shutdown).run(self);
        }
        if let Err(cause) = op.validate() {
            return op.fail(cause).run(self);
        }
        if let Err(cause) = op.claim() {
            return op.fail(cause).run(self);
        }
        let Some(entry) = self.pool.acquire() else {
            op.unclaim();
            return op.fail(SystemError::ENOMEM.into()).run(self);
        };
        let key = entry.key();
        if let Err(op) = entry.prepare(op, timeout) {
            self.pool.release(key);
            op.unclaim();
            return op.fail(SystemError::EBUSY.into()).run(self);
        }
        self.queue.push_back(key);
    }

    // ── Operations ──

    /// No-op round trip through the ring.
    pub fn nop<F>(&mut self, done: F)
    where
        F: FnOnce(IoResult<()>, &mut Proactor) + Send + 'static,
    {
        self.enqueue(Operation::Nop { done: Box::new(done) }, None);
    }

    /// Kernel timer. Succeeds with the time elapsed since the call.
    pub fn delay<F>(&mut self, interval: Duration, done: F)
    where
        F: FnOnce(IoResult<Duration>, &mut Proactor) + Send + 'static,
    {
        let op = Operation::Delay {
            interval,
            started: Instant::now(),
            done: Box::new(done),
        };
        self.enqueue(op, None);
    }

    /// Read into `buffer` (up to its capacity). `offset` `None` reads at
    /// the current position.
    pub fn read<F>(&mut self, fd: FileDescriptor, buffer: IoBuffer, offset: Option<u64>, timeout: Option<Duration>, done: F)
    where
        F: FnOnce(IoResult<usize>, &mut Proactor) + Send + 'static,
    {
        self.enqueue(Operation::Read { fd, buffer, offset, done: Box::new(done) }, timeout);
    }

    /// Write the used bytes of `buffer`.
    pub fn write<F>(&mut self, fd: FileDescriptor, buffer: IoBuffer, offset: Option<u64>, timeout: Option<Duration>, done: F)
    where
        F: FnOnce(IoResult<usize>, &mut Proactor) + Send + 'static,
    {
        self.enqueue(Operation::Write { fd, buffer, offset, done: Box::new(done) }, timeout);
    }

    /// Scatter read; bytes fill the buffers in order.
    pub fn read_vector<F>(
        &mut self,
        fd: FileDescriptor,
        buffers: Vec<IoBuffer>,
        offset: Option<u64>,
        timeout: Option<Duration>,
        done: F,
    ) where
        F: FnOnce(IoResult<usize>, &mut Proactor) + Send + 'static,
    {
        self.enqueue(Operation::ReadVector { fd, buffers, offset, done: Box::new(done) }, timeout);
    }

    /// Gather write of the used bytes of every buffer.
    pub fn write_vector<F>(
        &mut self,
        fd: FileDescriptor,
        buffers: Vec<IoBuffer>,
        offset: Option<u64>,
        timeout: Option<Duration>,
        done: F,
    ) where
        F: FnOnce(IoResult<usize>, &mut Proactor) + Send + 'static,
    {
        self.enqueue(Operation::WriteVector { fd, buffers, offset, done: Box::new(done) }, timeout);
    }

    /// `read` into a buffer from `allocate_fixed_buffer`.
    pub fn read_fixed<F>(
        &mut self,
        fd: FileDescriptor,
        buffer: IoBuffer,
        offset: Option<u64>,
        timeout: Option<Duration>,
        done: F,
    ) where
        F: FnOnce(IoResult<usize>, &mut Proactor) + Send + 'static,
    {
        self.enqueue(Operation::ReadFixed { fd, buffer, offset, done: Box::new(done) }, timeout);
    }

    /// `write` from a buffer from `allocate_fixed_buffer`.
    pub fn write_fixed<F>(
        &mut self,
        fd: FileDescriptor,
        buffer: IoBuffer,
        offset: Option<u64>,
        timeout: Option<Duration>,
        done: F,
    ) where
        F: FnOnce(IoResult<usize>, &mut Proactor) + Send + 'static,
    {
        self.enqueue(Operation::WriteFixed { fd, buffer, offset, done: Box::new(done) }, timeout);
    }

    pub fn recv<F>(&mut self, fd: FileDescriptor, buffer: IoBuffer, flags: i32, timeout: Option<Duration>, done: F)
    where
        F: FnOnce(IoResult<usize>, &mut Proactor) + Send + 'static,
    {
        self.enqueue(Operation::Recv { fd, buffer, flags, done: Box::new(done) }, timeout);
    }

    pub fn send<F>(&mut self, fd: FileDescriptor, buffer: IoBuffer, flags: i32, timeout: Option<Duration>, done: F)
    where
        F: FnOnce(IoResult<usize>, &mut Proactor) + Send + 'static,
    {
        self.enqueue(Operation::Send { fd, buffer, flags, done: Box::new(done) }, timeout);
    }

    /// Open `path` relative to the working directory.
    pub fn open<F>(&mut self, path: &Path, flags: i32, mode: u32, timeout: Option<Duration>, done: F)
    where
        F: FnOnce(IoResult<FileDescriptor>, &mut Proactor) + Send + 'static,
    {
        match c_path(path) {
            Ok(path) => self.enqueue(Operation::Open { path, flags, mode, done: Box::new(done) }, timeout),
            Err(cause) => done(Err(cause), self),
        }
    }

    pub fn close<F>(&mut self, fd: FileDescriptor, timeout: Option<Duration>, done: F)
    where
        F: FnOnce(IoResult<()>, &mut Proactor) + Send + 'static,
    {
        self.enqueue(Operation::Close { fd, done: Box::new(done) }, timeout);
    }

    /// `statx` by path. `mask` is `stat_mask::*`, `flags` `stat_flags::*`.
    pub fn stat<F>(&mut self, path: &Path, flags: i32, mask: u32, timeout: Option<Duration>, done: F)
    where
        F: FnOnce(IoResult<FileStat>, &mut Proactor) + Send + 'static,
    {
        match c_path(path) {
            Ok(path) => {
                let op = Operation::Stat {
                    dirfd: libc::AT_FDCWD,
                    path,
                    flags: flags & !stat_flags::EMPTY_PATH,
                    mask,
                    done: Box::new(done),
                };
                self.enqueue(op, timeout)
            }
            Err(cause) => done(Err(cause), self),
        }
    }

    /// `statx` of an open descriptor.
    pub fn stat_fd<F>(&mut self, fd: FileDescriptor, flags: i32, mask: u32, timeout: Option<Duration>, done: F)
    where
        F: FnOnce(IoResult<FileStat>, &mut Proactor) + Send + 'static,
    {
        let op = Operation::Stat {
            dirfd: fd.fd(),
            path: CString::default(),
            flags: flags | stat_flags::EMPTY_PATH,
            mask,
            done: Box::new(done),
        };
        self.enqueue(op, timeout);
    }

    /// Create a socket. Runs synchronously; `done` is called before
    /// returning.
    pub fn socket<F>(&mut self, family: AddressFamily, ty: SocketType, flags: i32, options: SocketOptions, done: F)
    where
        F: FnOnce(IoResult<FileDescriptor>, &mut Proactor),
    {
        let result = if self.closed { Err(Cause::Shutdown) } else { open_socket(family, ty, flags, options) };
        done(result, self);
    }

    /// Create, bind and listen. Runs synchronously; `done` is called
    /// before returning.
    pub fn listen<F>(
        &mut self,
        address: SocketAddr,
        ty: SocketType,
        flags: i32,
        options: SocketOptions,
        backlog: i32,
        done: F,
    ) where
        F: FnOnce(IoResult<ListenContext>, &mut Proactor),
    {
        let result = if self.closed {
            Err(Cause::Shutdown)
        } else {
            bind_listen(address, ty, flags, options, backlog)
        };
        done(result, self);
    }

    /// Accept one connection on a listening socket.
    pub fn accept<F>(&mut self, fd: FileDescriptor, flags: i32, timeout: Option<Duration>, done: F)
    where
        F: FnOnce(IoResult<ConnectionContext>, &mut Proactor) + Send + 'static,
    {
        self.enqueue(Operation::Accept { fd, flags, done: Box::new(done) }, timeout);
    }

    /// Connect `fd` to `address`. The socket family must match.
    pub fn connect<F>(&mut self, fd: FileDescriptor, address: SocketAddr, timeout: Option<Duration>, done: F)
    where
        F: FnOnce(IoResult<FileDescriptor>, &mut Proactor) + Send + 'static,
    {
        self.enqueue(Operation::Connect { fd, address, done: Box::new(done) }, timeout);
    }

    /// Move bytes between descriptors, one of which must be a pipe.
    pub fn splice<F>(&mut self, splice: SpliceDescriptor, timeout: Option<Duration>, done: F)
    where
        F: FnOnce(IoResult<usize>, &mut Proactor) + Send + 'static,
    {
        self.enqueue(Operation::Splice { splice, done: Box::new(done) }, timeout);
    }

    /// `fsync`, or `fdatasync` without `sync_metadata`.
    pub fn file_sync<F>(&mut self, fd: FileDescriptor, sync_metadata: bool, timeout: Option<Duration>, done: F)
    where
        F: FnOnce(IoResult<()>, &mut Proactor) + Send + 'static,
    {
        self.enqueue(Operation::FileSync { fd, sync_metadata, done: Box::new(done) }, timeout);
    }

    /// `fallocate`; `mode` is `fallocate_mode::*`.
    pub fn file_alloc<F>(
        &mut self,
        fd: FileDescriptor,
        mode: i32,
        offset: u64,
        length: u64,
        timeout: Option<Duration>,
        done: F,
    ) where
        F: FnOnce(IoResult<()>, &mut Proactor) + Send + 'static,
    {
        self.enqueue(Operation::FileAlloc { fd, mode, offset, length, done: Box::new(done) }, timeout);
    }

    // ── Shutdown ──

    /// Stop accepting work and close the ring.
    ///
    /// Queued operations fail with `Cause::Shutdown` at once. Operations
    /// already in the kernel get `shutdown_grace` to complete. The rest
    /// are cancelled in the kernel and reaped for up to another
    /// `shutdown_grace` before the ring closes, so no kernel worker is
    /// left writing into entry memory; they fail with `Cause::Shutdown`.
    /// Later operations fail the same way without touching the ring.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        while let Some(key) = self.queue.pop_front() {
            self.abandon(key);
        }

        let deadline = Instant::now() + self.shutdown_grace;
        while self.in_flight > 0 && Instant::now() < deadline {
            self.wait_io(Duration::from_millis(1));
        }
        let stranded = self.in_flight;
        if stranded > 0 {
            self.cancel_in_flight();
        }

        if self.in_flight > 0 {
            warn!(remaining = self.in_flight, "in-flight operations survived cancellation");
        }
        self.driver.shutdown();
        for key in self.pool.in_flight_keys() {
            self.abandon(key);
        }
        self.in_flight = 0;
        self.pool.shutdown();
        self.fixed = None;

        info!(stranded, "proactor shut down");
    }

    /// Request kernel cancellation of every in-flight entry, then reap
    /// at least once and until `shutdown_grace` runs out.
    fn cancel_in_flight(&mut self) {
        self.cancelling = true;
        let mut requested = 0;
        for key in self.pool.in_flight_keys() {
            if self.driver.available() == 0 {
                if let Err(e) = self.driver.submit(0, None) {
                    warn!(error = %e, "ring submit failed");
                    break;
                }
            }
            let cancel = SubmitSlot {
                addr: u64::from(key),
                ..SubmitSlot::new(Opcode::AsyncCancel, CANCEL_KEY)
            };
            if self.driver.push(&cancel).is_err() {
                break;
            }
            requested += 1;
        }

        let deadline = Instant::now() + self.shutdown_grace;
        loop {
            self.wait_io(Duration::from_millis(1));
            if self.in_flight == 0 || Instant::now() >= deadline {
                break;
            }
        }
        self.cancelling = false;
        debug!(requested, remaining = self.in_flight, "in-flight operations cancelled");
    }

    fn abandon(&mut self, key: u32) {
        let delivery: Option<Delivery> = self.pool.lookup(key).and_then(|e| e.abandon(Cause::Shutdown));
        if let Some(delivery) = delivery {
            self.pool.release(key);
            delivery.run(self);
        }
    }
}

impl Drop for Proactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn c_path(path: &Path) -> IoResult<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| SystemError::EINVAL.into())
}
