//! Proactor configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! ```rust,ignore
//! use ringio::config::ProactorConfig;
//!
//! let config = ProactorConfig::from_env()
//!     .runners(4)
//!     .queue_size(512);
//! ```

pub mod defaults;

use std::time::Duration;

use ringio_core::env::{env_get, env_get_bool};
use ringio_uring::UringConfig;

/// Proactor and pool configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct ProactorConfig {
    /// Submission ring entries per proactor
    pub queue_size: u32,
    /// Initial exchange entry table size per proactor
    pub pool_size: usize,
    /// Completions drained per drive step
    pub completion_batch: usize,
    /// Tasks run per runner pass
    pub task_batch: usize,
    /// Number of proactors (0 = available CPUs)
    pub runners: usize,
    /// Fixed buffer arena bytes (0 = none)
    pub fixed_arena_size: usize,
    /// Idle passes before a runner blocks
    pub idle_spins: u32,
    /// Longest idle block
    pub park_timeout: Duration,
    /// Kernel submission polling idle time
    pub sqpoll_idle: Option<Duration>,
    /// Grace period for in-flight operations at shutdown
    pub shutdown_grace: Duration,
}

impl Default for ProactorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ProactorConfig {
    /// Library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `RINGIO_QUEUE_SIZE` - Submission ring entries
    /// - `RINGIO_POOL_SIZE` - Initial exchange entry table size
    /// - `RINGIO_COMPLETION_BATCH` - Completions per drive step
    /// - `RINGIO_TASK_BATCH` - Tasks per runner pass
    /// - `RINGIO_RUNNERS` - Proactor count (0 = CPUs)
    /// - `RINGIO_FIXED_ARENA` - Fixed buffer arena bytes
    /// - `RINGIO_IDLE_SPINS` - Idle passes before blocking
    /// - `RINGIO_PARK_US` - Idle block timeout in microseconds
    /// - `RINGIO_SQPOLL` - Enable kernel submission polling (0/1)
    /// - `RINGIO_SQPOLL_IDLE_MS` - Submission poller idle time
    /// - `RINGIO_SHUTDOWN_GRACE_MS` - Shutdown grace period
    pub fn from_env() -> Self {
        let sqpoll_ms = env_get("RINGIO_SQPOLL_IDLE_MS", defaults::SQPOLL_IDLE_MS);
        let sqpoll = env_get_bool("RINGIO_SQPOLL", sqpoll_ms > 0);
        Self {
            queue_size: env_get("RINGIO_QUEUE_SIZE", defaults::QUEUE_SIZE),
            pool_size: env_get("RINGIO_POOL_SIZE", defaults::POOL_SIZE),
            completion_batch: env_get("RINGIO_COMPLETION_BATCH", defaults::COMPLETION_BATCH),
            task_batch: env_get("RINGIO_TASK_BATCH", defaults::TASK_BATCH),
            runners: env_get("RINGIO_RUNNERS", defaults::RUNNERS),
            fixed_arena_size: env_get("RINGIO_FIXED_ARENA", defaults::FIXED_ARENA_SIZE),
            idle_spins: env_get("RINGIO_IDLE_SPINS", defaults::IDLE_SPINS),
            park_timeout: Duration::from_micros(env_get("RINGIO_PARK_US", defaults::PARK_TIMEOUT_US)),
            sqpoll_idle: sqpoll.then(|| Duration::from_millis(sqpoll_ms.max(1))),
            shutdown_grace: Duration::from_millis(env_get(
                "RINGIO_SHUTDOWN_GRACE_MS",
                defaults::SHUTDOWN_GRACE_MS,
            )),
        }
    }

    /// Library defaults, no environment lookups.
    pub fn new() -> Self {
        Self {
            queue_size: defaults::QUEUE_SIZE,
            pool_size: defaults::POOL_SIZE,
            completion_batch: defaults::COMPLETION_BATCH,
            task_batch: defaults::TASK_BATCH,
            runners: defaults::RUNNERS,
            fixed_arena_size: defaults::FIXED_ARENA_SIZE,
            idle_spins: defaults::IDLE_SPINS,
            park_timeout: Duration::from_micros(defaults::PARK_TIMEOUT_US),
            sqpoll_idle: None,
            shutdown_grace: Duration::from_millis(defaults::SHUTDOWN_GRACE_MS),
        }
    }

    // Builder methods

    pub fn queue_size(mut self, entries: u32) -> Self {
        self.queue_size = entries;
        self
    }

    pub fn pool_size(mut self, n: usize) -> Self {
        self.pool_size = n;
        self
    }

    pub fn completion_batch(mut self, n: usize) -> Self {
        self.completion_batch = n;
        self
    }

    pub fn task_batch(mut self, n: usize) -> Self {
        self.task_batch = n;
        self
    }

    pub fn runners(mut self, n: usize) -> Self {
        self.runners = n;
        self
    }

    pub fn fixed_arena_size(mut self, bytes: usize) -> Self {
        self.fixed_arena_size = bytes;
        self
    }

    pub fn idle_spins(mut self, n: u32) -> Self {
        self.idle_spins = n;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn sqpoll_idle(mut self, idle: Option<Duration>) -> Self {
        self.sqpoll_idle = idle;
        self
    }

    pub fn shutdown_grace(mut self, d: Duration) -> Self {
        self.shutdown_grace = d;
        self
    }

    /// Runner count with 0 resolved to the CPU count.
    pub fn effective_runners(&self) -> usize {
        if self.runners > 0 {
            self.runners
        } else {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        }
    }

    /// Ring settings for one proactor.
    pub fn uring(&self) -> UringConfig {
        UringConfig {
            entries: self.queue_size,
            sqpoll_idle: self.sqpoll_idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = ProactorConfig::new();
        assert_eq!(c.queue_size, 128);
        assert_eq!(c.pool_size, 2048);
        assert!(c.sqpoll_idle.is_none());
        assert!(c.effective_runners() >= 1);
    }

    #[test]
    fn test_builder() {
        let c = ProactorConfig::new().runners(3).queue_size(300).pool_size(4);
        assert_eq!(c.effective_runners(), 3);
        assert_eq!(c.uring().ring_size(), 512);
        assert_eq!(c.pool_size, 4);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("RINGIO_TASK_BATCH", "17");
        let c = ProactorConfig::from_env();
        assert_eq!(c.task_batch, 17);
        std::env::remove_var("RINGIO_TASK_BATCH");
    }
}
