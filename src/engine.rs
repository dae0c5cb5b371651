//! The entry-point set of the native JPEG-LS engine.
//!
//! The engine is a black box: every codec operation goes through one of the
//! methods below, which mirror the CharLS C API one-for-one. Memory that
//! crosses the boundary is obtained from the engine's own heap
//! ([`ForeignHeap`]) and is passed by address; the engine never sees a Rust
//! reference.
//!
//! Out-parameters are byte addresses of session-owned scratch memory. Scalar
//! queries write one native-endian 4-byte integer, frame-info queries write
//! the 16-byte record described in [`crate::marshal`].

use std::ffi::{CStr, c_char};

/// Status code returned by nearly every entry point.
pub type Status = i32;

/// The reserved success status.
pub const SUCCESS: Status = 0;

/// Allocation entry points of the engine's heap.
pub trait ForeignHeap {
    /// Allocates `size` bytes. Returns null when the heap is exhausted.
    ///
    /// The returned address must be aligned for a 4-byte integer.
    fn malloc(&self, size: usize) -> *mut u8;

    /// Returns an allocation to the heap.
    ///
    /// # Safety
    /// `ptr` must come from [`ForeignHeap::malloc`] on the same heap and must
    /// not have been freed already.
    unsafe fn free(&self, ptr: *mut u8);
}

/// The codec entry points.
///
/// Handles are opaque: the session stores them and passes them back, never
/// dereferencing them.
///
/// # Safety
/// Every `unsafe fn` requires a live handle obtained from the matching
/// `*_create` call on the same engine, and pointer arguments that are valid
/// for the given sizes (4 bytes for scalar out-parameters, 16 bytes for
/// frame-info records).
pub trait Engine: ForeignHeap {
    type Decoder;
    type Encoder;

    fn decoder_create(&self) -> *mut Self::Decoder;
    unsafe fn decoder_destroy(&self, decoder: *mut Self::Decoder);
    unsafe fn decoder_set_source_buffer(
        &self,
        decoder: *mut Self::Decoder,
        source: *const u8,
        source_size: usize,
    ) -> Status;
    unsafe fn decoder_read_header(&self, decoder: *mut Self::Decoder) -> Status;
    unsafe fn decoder_get_frame_info(
        &self,
        decoder: *mut Self::Decoder,
        frame_info: *mut u8,
    ) -> Status;
    unsafe fn decoder_get_near_lossless(
        &self,
        decoder: *mut Self::Decoder,
        component: i32,
        near_lossless: *mut u8,
    ) -> Status;
    unsafe fn decoder_get_interleave_mode(
        &self,
        decoder: *mut Self::Decoder,
        component: i32,
        interleave_mode: *mut u8,
    ) -> Status;
    unsafe fn decoder_get_destination_size(
        &self,
        decoder: *mut Self::Decoder,
        stride: u32,
        destination_size: *mut u8,
    ) -> Status;
    unsafe fn decoder_decode_to_buffer(
        &self,
        decoder: *mut Self::Decoder,
        destination: *mut u8,
        destination_size: usize,
        stride: u32,
    ) -> Status;

    fn encoder_create(&self) -> *mut Self::Encoder;
    unsafe fn encoder_destroy(&self, encoder: *mut Self::Encoder);
    unsafe fn encoder_set_frame_info(
        &self,
        encoder: *mut Self::Encoder,
        frame_info: *const u8,
    ) -> Status;
    unsafe fn encoder_set_near_lossless(
        &self,
        encoder: *mut Self::Encoder,
        near_lossless: i32,
    ) -> Status;
    unsafe fn encoder_set_interleave_mode(
        &self,
        encoder: *mut Self::Encoder,
        interleave_mode: i32,
    ) -> Status;
    unsafe fn encoder_set_encoding_options(
        &self,
        encoder: *mut Self::Encoder,
        encoding_options: u32,
    ) -> Status;
    unsafe fn encoder_get_estimated_destination_size(
        &self,
        encoder: *mut Self::Encoder,
        size: *mut u8,
    ) -> Status;
    unsafe fn encoder_set_destination_buffer(
        &self,
        encoder: *mut Self::Encoder,
        destination: *mut u8,
        destination_size: usize,
    ) -> Status;
    unsafe fn encoder_encode_from_buffer(
        &self,
        encoder: *mut Self::Encoder,
        source: *const u8,
        source_size: usize,
        stride: u32,
    ) -> Status;
    unsafe fn encoder_get_bytes_written(
        &self,
        encoder: *mut Self::Encoder,
        bytes_written: *mut u8,
    ) -> Status;
    unsafe fn encoder_rewind(&self, encoder: *mut Self::Encoder) -> Status;

    /// NUL-terminated version text owned by the engine, or null.
    fn version_string(&self) -> *const c_char;

    /// NUL-terminated message for `code` owned by the engine, or null.
    fn error_message(&self, code: Status) -> *const c_char;
}

/// Reads engine-owned static text. Null reads as `None`.
pub(crate) fn engine_text(text: *const c_char) -> Option<String> {
    if text.is_null() {
        return None;
    }
    // SAFETY: the engine hands out NUL-terminated strings with static lifetime.
    let text = unsafe { CStr::from_ptr(text) };
    Some(text.to_string_lossy().into_owned())
}

/// Version string reported by the engine.
pub fn version<E: Engine + ?Sized>(engine: &E) -> String {
    engine_text(engine.version_string()).unwrap_or_default()
}
