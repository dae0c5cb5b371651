use std::alloc::{Layout, alloc, dealloc};
use std::cell::Cell;

use crate::engine::ForeignHeap;

const HEADER: usize = 16;

/// Heap that counts calls and can be told to refuse allocations.
#[derive(Default)]
pub(crate) struct CountingHeap {
    pub allocations: Cell<usize>,
    pub frees: Cell<usize>,
    pub fail_allocations: Cell<bool>,
}

impl CountingHeap {
    pub fn outstanding(&self) -> usize {
        self.allocations.get() - self.frees.get()
    }
}

impl ForeignHeap for CountingHeap {
    fn malloc(&self, size: usize) -> *mut u8 {
        if self.fail_allocations.get() {
            return std::ptr::null_mut();
        }
        let Ok(layout) = Layout::from_size_align(size + HEADER, HEADER) else {
            return std::ptr::null_mut();
        };
        // SAFETY: the layout is never zero-sized.
        let base = unsafe { alloc(layout) };
        if base.is_null() {
            return base;
        }
        self.allocations.set(self.allocations.get() + 1);
        // SAFETY: the block starts with HEADER bytes reserved for the size.
        unsafe {
            base.cast::<usize>().write(size);
            base.add(HEADER)
        }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        self.frees.set(self.frees.get() + 1);
        // SAFETY: `ptr` came from `malloc`, which put the size HEADER bytes before it.
        unsafe {
            let base = ptr.sub(HEADER);
            let size = base.cast::<usize>().read();
            dealloc(base, Layout::from_size_align_unchecked(size + HEADER, HEADER));
        }
    }
}
