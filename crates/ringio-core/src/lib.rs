//! # ringio-core
//!
//! Leaf types shared by every ringio crate.
//!
//! This crate contains no io_uring code. The ring driver lives in
//! `ringio-uring`, the promise and proactor in `ringio`.
//!
//! ## Modules
//!
//! - `errno` - Closed enumeration of kernel error codes
//! - `error` - Failure taxonomy (`Cause`) and the `IoResult` alias
//! - `descriptor` - File/socket descriptor handle
//! - `spinlock` - Spin lock and spin-then-yield backoff
//! - `key` - Dense integer key allocator with LIFO reuse
//! - `env` - Environment variable utilities

pub mod errno;
pub mod error;
pub mod descriptor;
pub mod spinlock;
pub mod key;
pub mod env;

// Re-exports for convenience
pub use errno::SystemError;
pub use error::{Cause, IoResult};
pub use descriptor::{DescriptorKind, FileDescriptor};
pub use spinlock::{Backoff, SpinLock, SpinLockGuard};
pub use key::{KeyAllocator, KeyGrant};
pub use env::{env_get, env_get_bool, env_get_opt};
