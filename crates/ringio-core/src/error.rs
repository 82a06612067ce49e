//! Failure taxonomy for ringio operations.

use crate::errno::SystemError;

/// Result value carried by every promise and completion callback.
pub type IoResult<T> = Result<T, Cause>;

/// Why an operation failed.
///
/// Cloneable so that a single resolution can be observed by every
/// continuation attached to a promise.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Cause {
    /// Negative result code reported by the kernel, or a locally
    /// synthesized errno for operations rejected before submission.
    #[error("{} ({})", .0, .0.name())]
    System(#[from] SystemError),

    /// A blocking join gave up before the promise settled. The promise
    /// itself is left untouched.
    #[error("join timed out")]
    TimedOut,

    /// The promise was cancelled by its owner.
    #[error("promise cancelled")]
    Cancelled,

    /// The runtime no longer accepts work.
    #[error("runtime shut down")]
    Shutdown,

    /// Failure raised by user composition code.
    #[error("{0}")]
    Message(String),
}

impl Cause {
    /// Build a system failure from a raw (possibly negative) errno.
    #[inline]
    pub fn from_code(code: i32) -> Self {
        Cause::System(SystemError::from_code(code))
    }

    /// Custom failure with a message.
    pub fn message(msg: impl Into<String>) -> Self {
        Cause::Message(msg.into())
    }

    /// True for local cancellation and for kernel `ECANCELED`.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Cause::Cancelled | Cause::System(SystemError::ECANCELED))
    }

    /// The errno, when this failure came from the kernel.
    pub fn system(&self) -> Option<SystemError> {
        match self {
            Cause::System(e) => Some(*e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Cause {
    fn from(err: std::io::Error) -> Self {
        Cause::System(SystemError::from(err))
    }
}

impl SystemError {
    /// Failed result carrying this error.
    #[inline]
    pub fn result<T>(self) -> IoResult<T> {
        Err(Cause::System(self))
    }
}
