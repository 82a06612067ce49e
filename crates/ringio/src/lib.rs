//! # ringio
//!
//! Proactor-style asynchronous I/O over io_uring.
//!
//! Callers issue operations (read, write, accept, connect, delay, stat,
//! splice, ...) and get a [`Promise`] that is resolved when the kernel
//! reports the completion. No thread blocks while an operation is in
//! flight.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  io::read / io::delay / Promise::with   (any thread)         │
//! └──────────────────────────┬───────────────────────────────────┘
//!                            │ round-robin task
//!            ┌───────────────┼───────────────┐
//!            ▼               ▼               ▼
//!      ringio-runner-0  ringio-runner-1  ringio-runner-N
//!      ┌────────────┐   ┌────────────┐   ┌────────────┐
//!      │ Proactor   │   │ Proactor   │   │ Proactor   │
//!      │  entry pool│   │  entry pool│   │  entry pool│
//!      │  io_uring  │   │  io_uring  │   │  io_uring  │
//!      └────────────┘   └────────────┘   └────────────┘
//! ```
//!
//! ## Modules
//!
//! - `promise` - Resolve-once completion value with lock-free continuations
//! - `combinators` - `any`, `any_success`, `all_of`, `all2`..`all9`
//! - `exchange` - Per-operation entries and their key-indexed pool
//! - `proactor` - Single-threaded ring owner and drive loop
//! - `executor` - `ProactorPool`, one proactor per runner thread
//! - `io` - Promise-returning operations on the global pool
//! - `config` - `ProactorConfig` with `RINGIO_*` environment overrides
//! - `flags` - Flag constants for operations
//!
//! ## Example
//!
//! ```rust,ignore
//! use ringio::{io, IoBuffer, FileDescriptor};
//!
//! let buf = IoBuffer::from_slice(b"hello\n");
//! let written = io::write(FileDescriptor::STDOUT, buf, None, None).join()?;
//! ```

pub mod config;
pub mod promise;
pub mod combinators;
pub mod exchange;
pub mod proactor;
pub mod executor;
pub mod io;
pub mod flags;

pub use config::ProactorConfig;
pub use promise::Promise;
pub use combinators::{
    all2, all3, all4, all5, all6, all7, all8, all9, all_of, any, any_success, cancel_all,
};
pub use exchange::{Callback, ExchangeEntry, ExchangeEntryPool};
pub use proactor::{Proactor, SpliceDescriptor};
pub use executor::{ProactorPool, Task};

// Re-exports from the lower crates
pub use ringio_core::{Cause, DescriptorKind, FileDescriptor, IoResult, SystemError};
pub use ringio_uring::{
    socket_flags, stat_flags, stat_mask, AddressFamily, ConnectionContext, FileStat,
    FixedBufferArena, IoBuffer, ListenContext, SocketOptions, SocketType, StatTimestamp,
};
