//! Environment variable utilities.
//!
//! All runtime tunables are read through these helpers, using the
//! `RINGIO_` prefix:
//!
//! ```ignore
//! use ringio_core::env::{env_get, env_get_bool};
//!
//! let ring: u32 = env_get("RINGIO_QUEUE_SIZE", 128);
//! let sqpoll = env_get_bool("RINGIO_SQPOLL", false);
//! ```

use std::str::FromStr;

/// Parse `key` as `T`, falling back to `default` when unset or unparsable.
#[inline]
pub fn env_get<T: FromStr>(key: &str, default: T) -> T {
    env_get_opt(key).unwrap_or(default)
}

/// `Some(T)` when `key` is set and parses.
#[inline]
pub fn env_get_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean flag. "1", "true", "yes" and "on" (any case) are true,
/// any other set value is false, unset yields `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
