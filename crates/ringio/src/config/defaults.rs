//! Library defaults for `ProactorConfig`.

/// Submission ring entries (rounded up to a power of two, min 128).
pub const QUEUE_SIZE: u32 = 128;

/// Exchange entries reserved per proactor before the pool has to grow.
pub const POOL_SIZE: usize = 2048;

/// Completions drained per drive step.
pub const COMPLETION_BATCH: usize = 256;

/// Tasks run per runner pass before driving the ring again.
pub const TASK_BATCH: usize = 64;

/// Proactor count; 0 means one per available CPU.
pub const RUNNERS: usize = 0;

/// Shared fixed-buffer arena size in bytes; 0 disables the arena.
pub const FIXED_ARENA_SIZE: usize = 16 * 1024 * 1024;

/// Idle runner passes before blocking.
pub const IDLE_SPINS: u32 = 64;

/// Longest a runner blocks (parked or in the kernel) while idle.
pub const PARK_TIMEOUT_US: u64 = 50;

/// Kernel submission polling; 0 disables.
pub const SQPOLL_IDLE_MS: u64 = 0;

/// How long shutdown waits for in-flight operations before closing a ring.
pub const SHUTDOWN_GRACE_MS: u64 = 100;
