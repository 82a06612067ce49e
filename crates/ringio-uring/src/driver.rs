//! `RingDriver` - the narrow boundary between the proactor and the kernel ring.
//!
//! The proactor never touches io_uring directly. It writes `SubmitSlot`s
//! into the driver, asks it to submit (optionally waiting for
//! completions), and reaps `CompletionSlot`s back out. Swapping the
//! driver (e.g. for a recording mock in tests) changes nothing above it.

use std::time::Duration;

use ringio_core::{Cause, SystemError};

use crate::entry::{CompletionSlot, SubmitSlot};

/// Driver failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// No free submission slot.
    #[error("submission ring full")]
    RingFull,
    /// Ring creation failed.
    #[error("io_uring setup: {0}")]
    Setup(SystemError),
    /// `io_uring_enter` failed.
    #[error("io_uring submit: {0}")]
    Submit(SystemError),
    /// Buffer registration failed.
    #[error("io_uring register: {0}")]
    Register(SystemError),
    /// The ring has been shut down.
    #[error("ring closed")]
    Closed,
}

impl DriverError {
    /// The errno a promise should observe for this failure.
    pub fn system(self) -> SystemError {
        match self {
            DriverError::RingFull => SystemError::EBUSY,
            DriverError::Setup(e) | DriverError::Submit(e) | DriverError::Register(e) => e,
            DriverError::Closed => SystemError::EBADF,
        }
    }
}

impl From<DriverError> for Cause {
    fn from(err: DriverError) -> Self {
        Cause::System(err.system())
    }
}

/// Submission/completion ring.
///
/// Implementations are owned by exactly one proactor and driven from a
/// single thread; `Send` lets the owning runner thread be chosen at
/// construction time.
pub trait RingDriver: Send {
    /// Free submission slots right now.
    fn available(&mut self) -> usize;

    /// Copy one slot into the submission ring. Not visible to the kernel
    /// until the next `submit`.
    fn push(&mut self, slot: &SubmitSlot) -> Result<(), DriverError>;

    /// Publish pushed slots to the kernel.
    ///
    /// With `min_complete > 0`, block until that many completions are
    /// ready or `timeout` expires. Timeout expiry and signal interruption
    /// are not errors. Returns the number of slots consumed by the kernel.
    fn submit(&mut self, min_complete: u32, timeout: Option<Duration>) -> Result<usize, DriverError>;

    /// Copy up to `buf.len()` ready completions into `buf` and advance
    /// the completion head by exactly the number copied.
    fn reap(&mut self, buf: &mut [CompletionSlot]) -> usize;

    /// Register fixed buffers (buffer index = position in `iovecs`).
    ///
    /// # Safety
    ///
    /// Every iovec must describe memory that stays valid until the ring is
    /// shut down or the buffers are unregistered.
    unsafe fn register_buffers(&mut self, iovecs: &[libc::iovec]) -> Result<(), DriverError>;

    /// Submission ring size.
    fn capacity(&self) -> usize;

    /// Close the ring. Later calls fail with `DriverError::Closed`.
    fn shutdown(&mut self);
}
