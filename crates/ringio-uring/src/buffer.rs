//! `IoBuffer` - a byte region shared between user code and the kernel.
//!
//! While an operation is in flight the kernel owns the bytes and the
//! buffer is *busy*. User-side copies claim the same busy flag for their
//! duration, so user reads/writes and kernel reads/writes never overlap:
//! whoever claims second gets `EBUSY`.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use ringio_core::{IoResult, SystemError};

use crate::arena::FixedRegion;

enum Owner {
    /// Heap memory from a leaked `Box<[u8]>`.
    Heap,
    /// Chunks of a registered arena; returned on drop.
    Fixed(FixedRegion),
}

struct BufferInner {
    ptr: NonNull<u8>,
    capacity: usize,
    used: AtomicUsize,
    busy: AtomicBool,
    owner: Owner,
}

// Safety: the region is only accessed by whoever holds the busy claim.
unsafe impl Send for BufferInner {}
unsafe impl Sync for BufferInner {}

impl Drop for BufferInner {
    fn drop(&mut self) {
        if let Owner::Heap = self.owner {
            // Safety: ptr/capacity came from Box::into_raw in IoBuffer::new
            unsafe {
                drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                    self.ptr.as_ptr(),
                    self.capacity,
                )));
            }
        }
    }
}

/// Fixed-size byte region with a `used` marker. Clones share the region.
#[derive(Clone)]
pub struct IoBuffer {
    inner: Arc<BufferInner>,
}

impl IoBuffer {
    /// Zero-filled heap buffer.
    pub fn new(capacity: usize) -> Self {
        let raw = Box::into_raw(vec![0u8; capacity].into_boxed_slice());
        // Safety: Box::into_raw never returns null
        let ptr = unsafe { NonNull::new_unchecked(raw as *mut u8) };
        Self::from_parts(ptr, capacity, Owner::Heap)
    }

    /// Heap buffer holding a copy of `data`, fully used.
    pub fn from_slice(data: &[u8]) -> Self {
        let buf = Self::new(data.len());
        // Safety: fresh buffer, nobody else can see it
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), buf.as_mut_ptr(), data.len()) };
        buf.mark_used(data.len());
        buf
    }

    pub(crate) fn fixed(region: FixedRegion) -> Self {
        let (ptr, capacity) = (region.ptr(), region.len());
        Self::from_parts(ptr, capacity, Owner::Fixed(region))
    }

    fn from_parts(ptr: NonNull<u8>, capacity: usize, owner: Owner) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                ptr,
                capacity,
                used: AtomicUsize::new(0),
                busy: AtomicBool::new(false),
                owner,
            }),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Bytes holding data: set by the last read completion or user write.
    #[inline]
    pub fn used(&self) -> usize {
        self.inner.used.load(Ordering::Acquire)
    }

    #[inline]
    pub fn mark_used(&self, n: usize) {
        self.inner.used.store(n.min(self.inner.capacity), Ordering::Release);
    }

    /// Registered buffer index, for fixed-buffer operations.
    pub fn fixed_index(&self) -> Option<u16> {
        match &self.inner.owner {
            Owner::Fixed(region) => Some(region.buffer_index()),
            Owner::Heap => None,
        }
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Claim the region for kernel I/O. False if already claimed.
    #[inline]
    pub fn try_claim(&self) -> bool {
        self.inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Drop a claim taken with `try_claim`.
    #[inline]
    pub fn unclaim(&self) {
        self.inner.busy.store(false, Ordering::Release);
    }

    /// Start of the region, for handing to the kernel.
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.inner.ptr.as_ptr()
    }

    fn claimed<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> IoResult<R> {
        if !self.try_claim() {
            return SystemError::EBUSY.result();
        }
        // Safety: we hold the busy claim, so nothing else touches the region
        let bytes = unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.capacity()) };
        let out = f(bytes);
        self.unclaim();
        Ok(out)
    }

    /// Copy `data` into the start of the buffer and mark it used.
    /// Truncates to capacity; returns bytes copied.
    pub fn write_bytes(&self, data: &[u8]) -> IoResult<usize> {
        self.claimed(|bytes| {
            let n = data.len().min(bytes.len());
            bytes[..n].copy_from_slice(&data[..n]);
            self.mark_used(n);
            n
        })
    }

    /// Copy of the used bytes.
    pub fn to_vec(&self) -> IoResult<Vec<u8>> {
        self.claimed(|bytes| bytes[..self.used()].to_vec())
    }

    /// Copy used bytes into `out`; returns bytes copied.
    pub fn copy_to(&self, out: &mut [u8]) -> IoResult<usize> {
        self.claimed(|bytes| {
            let n = self.used().min(out.len());
            out[..n].copy_from_slice(&bytes[..n]);
            n
        })
    }

    /// Forget the contents.
    pub fn clear(&self) {
        self.mark_used(0);
    }
}

impl std::fmt::Debug for IoBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoBuffer")
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .field("busy", &self.is_busy())
            .field("fixed", &self.fixed_index().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice() {
        let buf = IoBuffer::from_slice(b"hello");
        assert_eq!(buf.capacity(), 5);
        assert_eq!(buf.used(), 5);
        assert_eq!(buf.to_vec().unwrap(), b"hello");
        assert_eq!(buf.fixed_index(), None);
    }

    #[test]
    fn test_write_truncates() {
        let buf = IoBuffer::new(4);
        assert_eq!(buf.write_bytes(b"abcdef").unwrap(), 4);
        let mut out = [0u8; 8];
        assert_eq!(buf.copy_to(&mut out).unwrap(), 4);
        assert_eq!(&out[..4], b"abcd");
    }

    #[test]
    fn test_busy_blocks_user_access() {
        let buf = IoBuffer::new(16);
        assert!(buf.try_claim());
        assert!(!buf.try_claim());
        assert_eq!(buf.write_bytes(b"x"), SystemError::EBUSY.result());
        assert_eq!(buf.to_vec(), SystemError::EBUSY.result());
        buf.unclaim();
        assert_eq!(buf.write_bytes(b"x").unwrap(), 1);
    }

    #[test]
    fn test_clones_share_region() {
        let a = IoBuffer::new(8);
        let b = a.clone();
        a.write_bytes(b"shared").unwrap();
        assert_eq!(b.to_vec().unwrap(), b"shared");
        b.clear();
        assert_eq!(a.used(), 0);
    }

    #[test]
    fn test_zero_capacity() {
        let buf = IoBuffer::new(0);
        assert_eq!(buf.write_bytes(b"abc").unwrap(), 0);
        assert!(buf.to_vec().unwrap().is_empty());
    }
}
