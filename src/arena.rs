//! Growable buffers in engine memory.
//!
//! A [`BufferRegion`] holds one allocation from the engine heap. Its capacity
//! only grows: a request for a smaller size reuses the current allocation, a
//! larger one replaces it. Repeated operations on same-sized images therefore
//! allocate once.
//!
//! Output views borrow the region, so they cannot outlive the next call that
//! may reallocate it.

use std::ptr::NonNull;

use crate::engine::ForeignHeap;
use crate::error::{Result, SessionError};

/// Outcome of [`BufferRegion::reserve`], settled by `commit` or `roll_back`.
#[derive(Debug)]
#[must_use]
pub struct Reservation {
    grew: bool,
    previous: Option<NonNull<u8>>,
    previous_capacity: usize,
    previous_len: usize,
}

impl Reservation {
    /// Whether the region moved to a new allocation.
    pub fn grew(&self) -> bool {
        self.grew
    }
}

/// One allocation in engine memory.
#[derive(Debug)]
pub struct BufferRegion {
    what: &'static str,
    ptr: Option<NonNull<u8>>,
    capacity: usize,
    len: usize,
}

impl BufferRegion {
    /// An unallocated region. `what` names it in allocation errors.
    pub const fn new(what: &'static str) -> Self {
        Self {
            what,
            ptr: None,
            capacity: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes last requested or written.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.ptr.is_some()
    }

    /// Address of the region for the engine, null while unallocated.
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    /// Makes room for `size` bytes.
    ///
    /// Returns `true` when a new allocation was made, meaning the region's
    /// address changed and has to be bound to the engine again. On failure
    /// the current allocation is kept as it was.
    pub fn ensure_capacity<H: ForeignHeap + ?Sized>(&mut self, heap: &H, size: usize) -> Result<bool> {
        let reservation = self.reserve(heap, size)?;
        let grew = reservation.grew();
        self.commit(heap, reservation);
        Ok(grew)
    }

    /// Makes room for `size` bytes without freeing the allocation it replaces.
    ///
    /// The engine may still hold the previous address. Pass the reservation
    /// to [`commit`](Self::commit) once the new address is bound, or to
    /// [`roll_back`](Self::roll_back) to return to the previous allocation.
    pub fn reserve<H: ForeignHeap + ?Sized>(&mut self, heap: &H, size: usize) -> Result<Reservation> {
        let mut reservation = Reservation {
            grew: false,
            previous: self.ptr,
            previous_capacity: self.capacity,
            previous_len: self.len,
        };
        if self.ptr.is_some() && size <= self.capacity {
            log::trace!("{}: reusing {} bytes for {size}", self.what, self.capacity);
            self.len = size;
            return Ok(reservation);
        }

        // Zero-byte requests still get an address the engine can accept.
        let alloc_size = size.max(1);
        let new_ptr = NonNull::new(heap.malloc(alloc_size)).ok_or(SessionError::Allocation {
            what: self.what,
            size: alloc_size,
        })?;
        log::trace!("{}: grew from {} to {alloc_size} bytes", self.what, self.capacity);
        self.ptr = Some(new_ptr);
        self.capacity = alloc_size;
        self.len = size;
        reservation.grew = true;
        Ok(reservation)
    }

    /// Frees the allocation replaced by `reservation`, if any.
    pub fn commit<H: ForeignHeap + ?Sized>(&mut self, heap: &H, reservation: Reservation) {
        if let (true, Some(old_ptr)) = (reservation.grew, reservation.previous) {
            // SAFETY: `old_ptr` came from this heap and is no longer referenced.
            unsafe { heap.free(old_ptr.as_ptr()) };
        }
    }

    /// Undoes `reservation`: frees the new allocation and restores the
    /// previous one with its bookkeeping.
    pub fn roll_back<H: ForeignHeap + ?Sized>(&mut self, heap: &H, reservation: Reservation) {
        if reservation.grew {
            if let Some(new_ptr) = self.ptr {
                // SAFETY: `new_ptr` came from this heap in `reserve` and was
                // never bound to the engine.
                unsafe { heap.free(new_ptr.as_ptr()) };
            }
            self.ptr = reservation.previous;
            self.capacity = reservation.previous_capacity;
            log::trace!("{}: rolled back to {} bytes", self.what, self.capacity);
        }
        self.len = reservation.previous_len;
    }

    /// Copies `bytes` to the start of the region, growing it first if needed.
    pub fn write<H: ForeignHeap + ?Sized>(&mut self, heap: &H, bytes: &[u8]) -> Result<bool> {
        let reallocated = self.ensure_capacity(heap, bytes.len())?;
        if !bytes.is_empty() {
            // SAFETY: capacity >= bytes.len() after ensure_capacity, and the
            // caller's slice cannot overlap engine memory we own exclusively.
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.as_mut_ptr(), bytes.len())
            };
        }
        Ok(reallocated)
    }

    /// Read-only view of the first `len` bytes, without copying.
    ///
    /// # Panics
    /// Panics if `len` exceeds the capacity.
    pub fn view(&self, len: usize) -> &[u8] {
        assert!(
            len <= self.capacity,
            "{}: view of {len} bytes exceeds capacity {}",
            self.what,
            self.capacity
        );
        match self.ptr {
            // SAFETY: `len` bytes are inside the allocation and the borrow of
            // `self` keeps the allocation alive and unmodified.
            Some(ptr) => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) },
            None => &[],
        }
    }

    /// Frees the allocation. Calling it again does nothing.
    pub fn release<H: ForeignHeap + ?Sized>(&mut self, heap: &H) {
        if let Some(ptr) = self.ptr.take() {
            // SAFETY: `ptr` came from this heap; bookkeeping is cleared above.
            unsafe { heap.free(ptr.as_ptr()) };
            log::trace!("{}: released {} bytes", self.what, self.capacity);
        }
        self.capacity = 0;
        self.len = 0;
    }
}
