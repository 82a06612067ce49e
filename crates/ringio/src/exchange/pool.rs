//! Growable table of exchange entries indexed by key.
//!
//! Entries are boxed so their addresses (which the kernel holds while an
//! operation is in flight) survive growth of the table. Keys come from a
//! `KeyAllocator`: released keys are reused most-recent-first, fresh keys
//! extend the table by one entry. When the table reaches its reserved
//! capacity the reservation doubles.

use ringio_core::KeyAllocator;
use tracing::debug;

use super::ExchangeEntry;

/// Bound on simultaneously held entries.
const MAX_KEYS: u32 = u32::MAX;

pub struct ExchangeEntryPool {
    entries: Vec<Box<ExchangeEntry>>,
    keys: KeyAllocator,
}

impl ExchangeEntryPool {
    /// Pool with room for `initial` entries before the first growth.
    pub fn new(initial: usize) -> Self {
        Self::with_limit(initial, MAX_KEYS)
    }

    /// Pool that never holds more than `limit` entries at once.
    pub fn with_limit(initial: usize, limit: u32) -> Self {
        Self {
            entries: Vec::with_capacity(initial.max(1)),
            keys: KeyAllocator::new(limit),
        }
    }

    /// Take a free entry. `None` once `limit` entries are held.
    pub fn acquire(&mut self) -> Option<&mut ExchangeEntry> {
        let grant = self.keys.allocate()?;
        if grant.fresh {
            debug_assert_eq!(grant.key as usize, self.entries.len());
            if self.entries.len() == self.entries.capacity() {
                let extra = self.entries.capacity();
                self.entries.reserve_exact(extra);
                debug!(capacity = self.entries.capacity(), "exchange pool grown");
            }
            self.entries.push(Box::new(ExchangeEntry::new(grant.key)));
        }
        self.entries.get_mut(grant.key as usize).map(|e| &mut **e)
    }

    /// The in-flight entry for `key`.
    pub fn lookup(&mut self, key: u32) -> Option<&mut ExchangeEntry> {
        self.entries
            .get_mut(key as usize)
            .map(|e| &mut **e)
            .filter(|e| e.is_in_flight())
    }

    /// Return an entry to the free set. Ignored while the entry still
    /// carries an operation, and for keys that are not held.
    pub fn release(&mut self, key: u32) {
        match self.entries.get(key as usize) {
            Some(entry) if !entry.is_in_flight() => {
                if !self.keys.release(key) {
                    debug!(key, "release of free exchange entry ignored");
                }
            }
            _ => {}
        }
    }

    /// Keys of every entry carrying an operation.
    pub fn in_flight_keys(&self) -> Vec<u32> {
        self.entries
            .iter()
            .filter(|e| e.is_in_flight())
            .map(|e| e.key())
            .collect()
    }

    /// Entries currently held.
    #[inline]
    pub fn in_use(&self) -> usize {
        self.keys.in_use() as usize
    }

    /// Entries ever created.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that fit before the next growth.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Drop every entry and forget every key.
    pub fn shutdown(&mut self) {
        self.entries.clear();
        self.keys.reset();
    }
}
