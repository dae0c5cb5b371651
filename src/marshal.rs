//! Fixed-layout records exchanged with the engine by address.
//!
//! Two scratch slots are allocated once per session and reused for every
//! exchange:
//!
//! | Slot | Size | Layout |
//! |------|------|--------|
//! | frame info | 16 | width `u32` @0, height `u32` @4, bits per sample `i32` @8, component count `i32` @12 |
//! | scalar | 4 | one `i32`/`u32` |
//!
//! All fields are native-endian. The slot sizes are fixed by the engine's
//! calling convention, so unlike [`crate::arena::BufferRegion`] they never
//! grow.

use std::ptr::NonNull;

use crate::FrameInfo;
use crate::engine::ForeignHeap;
use crate::error::{Result, SessionError};

pub const FRAME_INFO_SIZE: usize = 16;
pub const SCALAR_SIZE: usize = 4;

/// Fields of the frame-info record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameInfoField {
    Width,
    Height,
    BitsPerSample,
    ComponentCount,
}

impl FrameInfoField {
    pub const fn offset(self) -> usize {
        match self {
            Self::Width => 0,
            Self::Height => 4,
            Self::BitsPerSample => 8,
            Self::ComponentCount => 12,
        }
    }
}

/// The two scratch slots of a session.
#[derive(Debug)]
pub struct Scratch {
    frame_info: Option<NonNull<u8>>,
    scalar: Option<NonNull<u8>>,
}

impl Scratch {
    /// Allocates both slots. Nothing stays allocated when either fails.
    pub fn allocate<H: ForeignHeap + ?Sized>(heap: &H) -> Result<Self> {
        let frame_info = allocate_slot(heap, FRAME_INFO_SIZE, "frame info record")?;
        let scalar = match allocate_slot(heap, SCALAR_SIZE, "scalar slot") {
            Ok(scalar) => scalar,
            Err(err) => {
                // SAFETY: just allocated from this heap and not shared.
                unsafe { heap.free(frame_info.as_ptr()) };
                return Err(err);
            }
        };
        log::trace!("allocated scratch slots ({FRAME_INFO_SIZE} + {SCALAR_SIZE} bytes)");
        Ok(Self {
            frame_info: Some(frame_info),
            scalar: Some(scalar),
        })
    }

    /// Address of the frame-info record, for the engine.
    pub fn frame_info_ptr(&self) -> *mut u8 {
        slot_ptr(self.frame_info)
    }

    /// Address of the scalar slot, for the engine.
    pub fn scalar_ptr(&self) -> *mut u8 {
        slot_ptr(self.scalar)
    }

    pub fn store_frame_info(&mut self, frame_info: &FrameInfo) {
        self.store_field(FrameInfoField::Width, frame_info.width.to_ne_bytes());
        self.store_field(FrameInfoField::Height, frame_info.height.to_ne_bytes());
        self.store_field(
            FrameInfoField::BitsPerSample,
            frame_info.bits_per_sample.to_ne_bytes(),
        );
        self.store_field(
            FrameInfoField::ComponentCount,
            frame_info.component_count.to_ne_bytes(),
        );
    }

    pub fn load_frame_info(&self) -> FrameInfo {
        FrameInfo {
            width: u32::from_ne_bytes(self.load_field(FrameInfoField::Width)),
            height: u32::from_ne_bytes(self.load_field(FrameInfoField::Height)),
            bits_per_sample: i32::from_ne_bytes(self.load_field(FrameInfoField::BitsPerSample)),
            component_count: i32::from_ne_bytes(self.load_field(FrameInfoField::ComponentCount)),
        }
    }

    pub fn load_i32(&self) -> i32 {
        i32::from_ne_bytes(read_word(self.scalar, 0))
    }

    pub fn load_u32(&self) -> u32 {
        u32::from_ne_bytes(read_word(self.scalar, 0))
    }

    /// Frees both slots. Calling it again does nothing.
    pub fn release<H: ForeignHeap + ?Sized>(&mut self, heap: &H) {
        for slot in [self.frame_info.take(), self.scalar.take()].into_iter().flatten() {
            // SAFETY: the slot came from this heap and its bookkeeping is cleared above.
            unsafe { heap.free(slot.as_ptr()) };
        }
    }

    fn store_field(&mut self, field: FrameInfoField, bytes: [u8; 4]) {
        let base = self
            .frame_info
            .expect("scratch used after release")
            .as_ptr();
        // SAFETY: the record is FRAME_INFO_SIZE bytes and every offset + 4 fits in it.
        unsafe {
            base.add(field.offset())
                .cast::<[u8; 4]>()
                .write_unaligned(bytes)
        };
    }

    fn load_field(&self, field: FrameInfoField) -> [u8; 4] {
        read_word(self.frame_info, field.offset())
    }
}

fn allocate_slot<H: ForeignHeap + ?Sized>(
    heap: &H,
    size: usize,
    what: &'static str,
) -> Result<NonNull<u8>> {
    NonNull::new(heap.malloc(size)).ok_or(SessionError::Allocation { what, size })
}

fn slot_ptr(slot: Option<NonNull<u8>>) -> *mut u8 {
    slot.expect("scratch used after release").as_ptr()
}

fn read_word(slot: Option<NonNull<u8>>, offset: usize) -> [u8; 4] {
    // SAFETY: callers pass offsets of 4-byte fields inside the slot.
    unsafe {
        slot_ptr(slot)
            .add(offset)
            .cast::<[u8; 4]>()
            .read_unaligned()
    }
}
