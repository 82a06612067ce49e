//! # ringio-uring - the ring driver boundary
//!
//! Everything that knows about kernel memory layout lives here:
//!
//! | Module      | Contents |
//! |-------------|----------|
//! | `entry`     | `SubmitSlot`/`CompletionSlot` codecs, `Opcode`, SQE flags |
//! | `driver`    | `RingDriver` trait and `DriverError` |
//! | `uring`     | `UringDriver`, the io_uring implementation |
//! | `sockaddr`  | `SocketAddr` <-> `sockaddr_storage` |
//! | `stat`      | `statx` decoding into `FileStat` |
//! | `buffer`    | `IoBuffer`, the busy-tracked byte region |
//! | `arena`     | `FixedBufferArena`, pre-registered fixed buffers |
//! | `socket`    | synchronous socket/listen helpers |
//!
//! The proactor above this crate sees only slots, keys and typed values.

pub mod entry;
pub mod driver;
pub mod uring;
pub mod sockaddr;
pub mod stat;
pub mod buffer;
pub mod arena;
pub mod socket;

pub use entry::{sqe_flags, CompletionSlot, Opcode, SubmitSlot, CANCEL_KEY, LINK_TIMEOUT_KEY};
pub use driver::{DriverError, RingDriver};
pub use uring::{UringConfig, UringDriver};
pub use stat::{FileStat, StatTimestamp};
pub use buffer::IoBuffer;
pub use arena::FixedBufferArena;
pub use socket::{socket_flags, AddressFamily, ConnectionContext, ListenContext, SocketOptions, SocketType};
pub use stat::{stat_flags, stat_mask};

/// Kernel timespec as read by timeout operations.
pub use io_uring::types::Timespec;
