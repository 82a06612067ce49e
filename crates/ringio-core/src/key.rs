//! Dense integer key allocator.
//!
//! Hands out small integer keys used as indices into the exchange entry
//! table and as ring `user_data`. Freed keys go onto a LIFO stack so the
//! most recently released (cache-warm) entry is reused first; fresh keys
//! are minted from a monotonically increasing counter.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::spinlock::SpinLock;

/// A key handed out by [`KeyAllocator::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyGrant {
    pub key: u32,
    /// True if the key has never been handed out before, meaning the
    /// table slot behind it does not exist yet.
    pub fresh: bool,
}

/// Thread-safe key allocator with LIFO reuse.
pub struct KeyAllocator {
    keys: SpinLock<KeyState>,
    /// Next never-used key.
    next_fresh: AtomicU32,
    /// Keys above this are never minted.
    max_keys: u32,
    in_use: AtomicU32,
}

#[derive(Default)]
struct KeyState {
    /// Released keys, most recent last.
    free: Vec<u32>,
    /// One bit per minted key, set while the key is held.
    held: Vec<u64>,
}

impl KeyState {
    #[inline]
    fn slot(key: u32) -> (usize, u64) {
        ((key / 64) as usize, 1 << (key % 64))
    }

    fn is_held(&self, key: u32) -> bool {
        let (word, bit) = Self::slot(key);
        self.held.get(word).is_some_and(|w| w & bit != 0)
    }

    fn mark(&mut self, key: u32) {
        let (word, bit) = Self::slot(key);
        if word >= self.held.len() {
            self.held.resize(word + 1, 0);
        }
        self.held[word] |= bit;
    }

    fn unmark(&mut self, key: u32) {
        let (word, bit) = Self::slot(key);
        if let Some(w) = self.held.get_mut(word) {
            *w &= !bit;
        }
    }
}

impl KeyAllocator {
    pub fn new(max_keys: u32) -> Self {
        Self {
            keys: SpinLock::new(KeyState::default()),
            next_fresh: AtomicU32::new(0),
            max_keys,
            in_use: AtomicU32::new(0),
        }
    }

    /// Take a key, preferring the most recently released one.
    ///
    /// Returns `None` only when `max_keys` keys are simultaneously held.
    pub fn allocate(&self) -> Option<KeyGrant> {
        let mut keys = self.keys.lock();
        let grant = match keys.free.pop() {
            Some(key) => KeyGrant { key, fresh: false },
            None => {
                let key = self.next_fresh.load(Ordering::Relaxed);
                if key >= self.max_keys {
                    return None;
                }
                self.next_fresh.store(key + 1, Ordering::Release);
                KeyGrant { key, fresh: true }
            }
        };
        keys.mark(grant.key);
        self.in_use.fetch_add(1, Ordering::Relaxed);
        Some(grant)
    }

    /// Return a key. Keys that are not currently held (never minted, or
    /// already released) are ignored and `false` is returned.
    pub fn release(&self, key: u32) -> bool {
        let mut keys = self.keys.lock();
        if !keys.is_held(key) {
            return false;
        }
        keys.unmark(key);
        keys.free.push(key);
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        true
    }

    #[inline]
    pub fn is_held(&self, key: u32) -> bool {
        self.keys.lock().is_held(key)
    }

    /// Keys currently held.
    #[inline]
    pub fn in_use(&self) -> u32 {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Keys ever minted (the high-water mark of the table).
    #[inline]
    pub fn minted(&self) -> u32 {
        self.next_fresh.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn max_keys(&self) -> u32 {
        self.max_keys
    }

    /// Forget every key. Requires exclusive access.
    pub fn reset(&mut self) {
        let keys = self.keys.get_mut();
        keys.free.clear();
        keys.held.clear();
        *self.next_fresh.get_mut() = 0;
        *self.in_use.get_mut() = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_keys_are_dense() {
        let keys = KeyAllocator::new(16);
        for expected in 0..4 {
            let grant = keys.allocate().unwrap();
            assert_eq!(grant, KeyGrant { key: expected, fresh: true });
        }
        assert_eq!(keys.in_use(), 4);
        assert_eq!(keys.minted(), 4);
    }

    #[test]
    fn test_lifo_reuse() {
        let keys = KeyAllocator::new(16);
        let a = keys.allocate().unwrap().key;
        let b = keys.allocate().unwrap().key;
        keys.release(a);
        keys.release(b);
        assert_eq!(keys.allocate().unwrap(), KeyGrant { key: b, fresh: false });
        assert_eq!(keys.allocate().unwrap(), KeyGrant { key: a, fresh: false });
        assert_eq!(keys.minted(), 2);
    }

    #[test]
    fn test_exhaustion() {
        let keys = KeyAllocator::new(2);
        let _a = keys.allocate().unwrap();
        let b = keys.allocate().unwrap();
        assert!(keys.allocate().is_none());
        keys.release(b.key);
        assert!(keys.allocate().is_some());
    }

    #[test]
    fn test_double_release_ignored() {
        let keys = KeyAllocator::new(4);
        let a = keys.allocate().unwrap().key;
        let b = keys.allocate().unwrap().key;
        assert!(keys.release(a));
        assert!(!keys.release(a));
        assert_eq!(keys.in_use(), 1);
        assert!(keys.is_held(b));
        assert!(!keys.is_held(a));

        let first = keys.allocate().unwrap().key;
        let second = keys.allocate().unwrap().key;
        assert_eq!(first, a);
        assert_ne!(first, second);
        assert_ne!(second, b);
        assert_eq!(keys.in_use(), 3);
    }

    #[test]
    fn test_release_unminted_ignored() {
        let keys = KeyAllocator::new(4);
        assert!(!keys.release(3));
        assert_eq!(keys.in_use(), 0);
        assert_eq!(keys.allocate().unwrap(), KeyGrant { key: 0, fresh: true });
    }

    #[test]
    fn test_reset() {
        let mut keys = KeyAllocator::new(8);
        let k = keys.allocate().unwrap().key;
        keys.release(k);
        let held = keys.allocate().unwrap().key;
        keys.reset();
        assert_eq!(keys.minted(), 0);
        assert!(!keys.is_held(held));
        assert!(keys.allocate().unwrap().fresh);
    }

    #[test]
    fn test_concurrent_keys_unique() {
        use std::sync::Arc;
        use std::thread;

        let keys = Arc::new(KeyAllocator::new(u32::MAX));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let keys = Arc::clone(&keys);
                thread::spawn(move || {
                    let mut held = Vec::new();
                    for i in 0..2000 {
                        held.push(keys.allocate().unwrap().key);
                        if i % 3 == 0 {
                            keys.release(held.pop().unwrap());
                        }
                    }
                    held
                })
            })
            .collect();

        let mut all: Vec<u32> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let n = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), n);
        assert_eq!(keys.in_use() as usize, n);
    }
}
