//! Fixed buffer arena.
//!
//! One anonymous mapping registered with every ring as buffer index 0.
//! It is carved into 16 KiB chunks tracked by a bitmap; an allocation
//! takes the first run of free chunks large enough (first fit) and
//! gives them back when the last clone of its `IoBuffer` drops.

use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::Arc;

use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};
use ringio_core::{IoResult, SpinLock, SystemError};
use tracing::{debug, warn};

use crate::buffer::IoBuffer;

struct ArenaInner {
    base: NonNull<u8>,
    size: usize,
    chunk_count: usize,
    /// One bit per chunk, set = allocated.
    used: SpinLock<Vec<u64>>,
}

// Safety: the mapping is shared memory; chunk ownership is tracked by `used`.
unsafe impl Send for ArenaInner {}
unsafe impl Sync for ArenaInner {}

impl ArenaInner {
    fn release(&self, first: usize, count: usize) {
        let mut bits = self.used.lock();
        for chunk in first..first + count {
            bits[chunk / 64] &= !(1u64 << (chunk % 64));
        }
    }
}

impl Drop for ArenaInner {
    fn drop(&mut self) {
        // Safety: base/size describe the mapping created in `new`
        if let Err(e) = unsafe { munmap(self.base.cast(), self.size) } {
            warn!(error = %e, "fixed arena munmap failed");
        } else {
            debug!(bytes = self.size, "fixed arena released");
        }
    }
}

/// Chunks of the arena owned by one `IoBuffer`.
pub(crate) struct FixedRegion {
    arena: Arc<ArenaInner>,
    first: usize,
    count: usize,
    len: usize,
}

impl FixedRegion {
    pub(crate) fn ptr(&self) -> NonNull<u8> {
        // Safety: first chunk lies inside the mapping
        unsafe { NonNull::new_unchecked(self.arena.base.as_ptr().add(self.first * FixedBufferArena::CHUNK_SIZE)) }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn buffer_index(&self) -> u16 {
        FixedBufferArena::BUFFER_INDEX
    }
}

impl Drop for FixedRegion {
    fn drop(&mut self) {
        self.arena.release(self.first, self.count);
    }
}

/// Pre-registered memory for `read_fixed`/`write_fixed`.
#[derive(Clone)]
pub struct FixedBufferArena {
    inner: Arc<ArenaInner>,
}

impl FixedBufferArena {
    pub const CHUNK_SIZE: usize = 16 * 1024;
    /// Registered buffer index of the arena.
    pub const BUFFER_INDEX: u16 = 0;

    /// Map an arena of at least `size` bytes (rounded up to whole chunks).
    pub fn new(size: usize) -> IoResult<Self> {
        let chunk_count = size.div_ceil(Self::CHUNK_SIZE).max(1);
        let size = chunk_count * Self::CHUNK_SIZE;
        let length = NonZeroUsize::new(size).ok_or(SystemError::EINVAL)?;

        // Safety: fresh private anonymous mapping, no aliasing
        let base = unsafe {
            mmap_anonymous(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )
        }
        .map_err(|e| SystemError::from_code(e as i32))?;

        debug!(bytes = size, chunks = chunk_count, "fixed arena mapped");
        Ok(Self {
            inner: Arc::new(ArenaInner {
                base: base.cast(),
                size,
                chunk_count,
                used: SpinLock::new(vec![0u64; chunk_count.div_ceil(64)]),
            }),
        })
    }

    /// Carve a buffer of `size` bytes. `ENOMEM` when no run of free
    /// chunks is long enough.
    pub fn allocate(&self, size: usize) -> IoResult<IoBuffer> {
        if size == 0 {
            return SystemError::EINVAL.result();
        }
        let need = size.div_ceil(Self::CHUNK_SIZE);
        let first = {
            let mut bits = self.inner.used.lock();
            let first = first_fit(&bits, self.inner.chunk_count, need).ok_or(SystemError::ENOMEM)?;
            for chunk in first..first + need {
                bits[chunk / 64] |= 1u64 << (chunk % 64);
            }
            first
        };

        Ok(IoBuffer::fixed(FixedRegion {
            arena: Arc::clone(&self.inner),
            first,
            count: need,
            len: size,
        }))
    }

    /// The iovec to register with a ring.
    pub fn iovec(&self) -> libc::iovec {
        libc::iovec {
            iov_base: self.inner.base.as_ptr().cast(),
            iov_len: self.inner.size,
        }
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn free_chunks(&self) -> usize {
        let bits = self.inner.used.lock();
        let used: u32 = bits.iter().map(|w| w.count_ones()).sum();
        self.inner.chunk_count - used as usize
    }
}

/// Index of the first run of `need` clear bits among `total`.
fn first_fit(bits: &[u64], total: usize, need: usize) -> Option<usize> {
    let mut run = 0;
    for chunk in 0..total {
        if bits[chunk / 64] & (1u64 << (chunk % 64)) == 0 {
            run += 1;
            if run == need {
                return Some(chunk + 1 - need);
            }
        } else {
            run = 0;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: usize = FixedBufferArena::CHUNK_SIZE;

    #[test]
    fn test_first_fit() {
        assert_eq!(first_fit(&[0b0000], 4, 2), Some(0));
        assert_eq!(first_fit(&[0b0101], 4, 1), Some(1));
        assert_eq!(first_fit(&[0b0101], 4, 2), None);
        assert_eq!(first_fit(&[0b0011], 4, 2), Some(2));
    }

    #[test]
    fn test_allocate_and_release() {
        let arena = FixedBufferArena::new(4 * CHUNK).unwrap();
        assert_eq!(arena.free_chunks(), 4);

        let a = arena.allocate(CHUNK + 1).unwrap();
        assert_eq!(a.capacity(), CHUNK + 1);
        assert_eq!(a.fixed_index(), Some(0));
        assert_eq!(arena.free_chunks(), 2);

        let b = arena.allocate(2 * CHUNK).unwrap();
        assert_eq!(arena.free_chunks(), 0);
        assert_eq!(arena.allocate(1).unwrap_err(), SystemError::ENOMEM.into());

        drop(a);
        assert_eq!(arena.free_chunks(), 2);
        drop(b);
        assert_eq!(arena.free_chunks(), 4);
    }

    #[test]
    fn test_buffers_do_not_overlap() {
        let arena = FixedBufferArena::new(3 * CHUNK).unwrap();
        let a = arena.allocate(10).unwrap();
        let b = arena.allocate(10).unwrap();
        a.write_bytes(b"first").unwrap();
        b.write_bytes(b"second").unwrap();
        assert_eq!(a.to_vec().unwrap(), b"first");
        assert_eq!(b.as_mut_ptr() as usize - a.as_mut_ptr() as usize, CHUNK);
    }

    #[test]
    fn test_buffer_outlives_arena_handle() {
        let arena = FixedBufferArena::new(CHUNK).unwrap();
        let buf = arena.allocate(64).unwrap();
        drop(arena);
        assert_eq!(buf.write_bytes(b"still mapped").unwrap(), 12);
    }

    #[test]
    fn test_zero_size_rejected() {
        let arena = FixedBufferArena::new(CHUNK).unwrap();
        assert!(arena.allocate(0).is_err());
    }
}
