//! [`Engine`] over the native CharLS library.
//!
//! Links `libcharls` and forwards each entry point to the matching
//! `charls_*` C function. Engine memory comes from the C heap.

use std::ffi::{c_char, c_int, c_void};

use crate::engine::{Engine, ForeignHeap, Status};
use crate::error::JpeglsErrc;

/// Opaque CharLS decoder.
#[repr(C)]
pub struct CharlsDecoder {
    _private: [u8; 0],
}

/// Opaque CharLS encoder.
#[repr(C)]
pub struct CharlsEncoder {
    _private: [u8; 0],
}

#[link(name = "charls")]
unsafe extern "C" {
    fn charls_get_version_string() -> *const c_char;
    fn charls_get_error_message(error_value: i32) -> *const c_char;

    fn charls_jpegls_decoder_create() -> *mut CharlsDecoder;
    fn charls_jpegls_decoder_destroy(decoder: *const CharlsDecoder);
    fn charls_jpegls_decoder_set_source_buffer(
        decoder: *mut CharlsDecoder,
        source_buffer: *const c_void,
        source_size_bytes: usize,
    ) -> c_int;
    fn charls_jpegls_decoder_read_header(decoder: *mut CharlsDecoder) -> c_int;
    fn charls_jpegls_decoder_get_frame_info(
        decoder: *const CharlsDecoder,
        frame_info: *mut c_void,
    ) -> c_int;
    fn charls_jpegls_decoder_get_near_lossless(
        decoder: *const CharlsDecoder,
        component: i32,
        near_lossless: *mut i32,
    ) -> c_int;
    fn charls_jpegls_decoder_get_interleave_mode(
        decoder: *const CharlsDecoder,
        component: i32,
        interleave_mode: *mut c_int,
    ) -> c_int;
    fn charls_jpegls_decoder_get_destination_size(
        decoder: *const CharlsDecoder,
        stride: u32,
        destination_size_bytes: *mut usize,
    ) -> c_int;
    fn charls_jpegls_decoder_decode_to_buffer(
        decoder: *mut CharlsDecoder,
        destination_buffer: *mut c_void,
        destination_size_bytes: usize,
        stride: u32,
    ) -> c_int;

    fn charls_jpegls_encoder_create() -> *mut CharlsEncoder;
    fn charls_jpegls_encoder_destroy(encoder: *const CharlsEncoder);
    fn charls_jpegls_encoder_set_frame_info(
        encoder: *mut CharlsEncoder,
        frame_info: *const c_void,
    ) -> c_int;
    fn charls_jpegls_encoder_set_near_lossless(encoder: *mut CharlsEncoder, near_lossless: i32)
    -> c_int;
    fn charls_jpegls_encoder_set_interleave_mode(
        encoder: *mut CharlsEncoder,
        interleave_mode: c_int,
    ) -> c_int;
    fn charls_jpegls_encoder_set_encoding_options(
        encoder: *mut CharlsEncoder,
        encoding_options: c_int,
    ) -> c_int;
    fn charls_jpegls_encoder_get_estimated_destination_size(
        encoder: *const CharlsEncoder,
        size_in_bytes: *mut usize,
    ) -> c_int;
    fn charls_jpegls_encoder_set_destination_buffer(
        encoder: *mut CharlsEncoder,
        destination_buffer: *mut c_void,
        destination_size_bytes: usize,
    ) -> c_int;
    fn charls_jpegls_encoder_encode_from_buffer(
        encoder: *mut CharlsEncoder,
        source_buffer: *const c_void,
        source_size_bytes: usize,
        stride: u32,
    ) -> c_int;
    fn charls_jpegls_encoder_get_bytes_written(
        encoder: *const CharlsEncoder,
        bytes_written: *mut usize,
    ) -> c_int;
    fn charls_jpegls_encoder_rewind(encoder: *mut CharlsEncoder) -> c_int;
}

/// The native CharLS engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharLs;

impl ForeignHeap for CharLs {
    fn malloc(&self, size: usize) -> *mut u8 {
        // SAFETY: plain C allocation; malloc results are suitably aligned.
        unsafe { libc::malloc(size) as *mut u8 }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        // SAFETY: `ptr` came from `libc::malloc` above.
        unsafe { libc::free(ptr as *mut c_void) }
    }
}

/// Narrows a `size_t` result into the 4-byte scalar slot.
///
/// # Safety
/// `out` must be valid for a 4-byte write.
unsafe fn store_size(status: c_int, size: usize, out: *mut u8) -> Status {
    if status != 0 {
        return status;
    }
    match u32::try_from(size) {
        Ok(size) => {
            // SAFETY: guaranteed by the caller.
            unsafe { out.cast::<[u8; 4]>().write_unaligned(size.to_ne_bytes()) };
            0
        }
        Err(_) => JpeglsErrc::InvalidArgumentSize.into(),
    }
}

impl Engine for CharLs {
    type Decoder = CharlsDecoder;
    type Encoder = CharlsEncoder;

    fn decoder_create(&self) -> *mut CharlsDecoder {
        // SAFETY: no preconditions.
        unsafe { charls_jpegls_decoder_create() }
    }

    unsafe fn decoder_destroy(&self, decoder: *mut CharlsDecoder) {
        // SAFETY: the session passes a live handle exactly once.
        unsafe { charls_jpegls_decoder_destroy(decoder) }
    }

    unsafe fn decoder_set_source_buffer(
        &self,
        decoder: *mut CharlsDecoder,
        source: *const u8,
        source_size: usize,
    ) -> Status {
        // SAFETY: live handle; the buffer is valid for the given size.
        unsafe { charls_jpegls_decoder_set_source_buffer(decoder, source.cast(), source_size) }
    }

    unsafe fn decoder_read_header(&self, decoder: *mut CharlsDecoder) -> Status {
        // SAFETY: live handle.
        unsafe { charls_jpegls_decoder_read_header(decoder) }
    }

    unsafe fn decoder_get_frame_info(&self, decoder: *mut CharlsDecoder, frame_info: *mut u8) -> Status {
        // SAFETY: live handle; the out-parameter or record slot has the size CharLS expects.
        unsafe { charls_jpegls_decoder_get_frame_info(decoder, frame_info.cast()) }
    }

    unsafe fn decoder_get_near_lossless(
        &self,
        decoder: *mut CharlsDecoder,
        component: i32,
        near_lossless: *mut u8,
    ) -> Status {
        // SAFETY: live handle; the out-parameter or record slot has the size CharLS expects.
        unsafe { charls_jpegls_decoder_get_near_lossless(decoder, component, near_lossless.cast()) }
    }

    unsafe fn decoder_get_interleave_mode(
        &self,
        decoder: *mut CharlsDecoder,
        component: i32,
        interleave_mode: *mut u8,
    ) -> Status {
        // SAFETY: live handle; the out-parameter or record slot has the size CharLS expects.
        unsafe {
            charls_jpegls_decoder_get_interleave_mode(decoder, component, interleave_mode.cast())
        }
    }

    unsafe fn decoder_get_destination_size(
        &self,
        decoder: *mut CharlsDecoder,
        stride: u32,
        destination_size: *mut u8,
    ) -> Status {
        let mut size = 0usize;
        // SAFETY: live handle; `size_t` goes to a local, the caller provides the 4-byte slot.
        unsafe {
            let status = charls_jpegls_decoder_get_destination_size(decoder, stride, &mut size);
            store_size(status, size, destination_size)
        }
    }

    unsafe fn decoder_decode_to_buffer(
        &self,
        decoder: *mut CharlsDecoder,
        destination: *mut u8,
        destination_size: usize,
        stride: u32,
    ) -> Status {
        // SAFETY: live handle; the buffer is valid for the given size.
        unsafe {
            charls_jpegls_decoder_decode_to_buffer(
                decoder,
                destination.cast(),
                destination_size,
                stride,
            )
        }
    }

    fn encoder_create(&self) -> *mut CharlsEncoder {
        // SAFETY: no preconditions.
        unsafe { charls_jpegls_encoder_create() }
    }

    unsafe fn encoder_destroy(&self, encoder: *mut CharlsEncoder) {
        // SAFETY: the session passes a live handle exactly once.
        unsafe { charls_jpegls_encoder_destroy(encoder) }
    }

    unsafe fn encoder_set_frame_info(&self, encoder: *mut CharlsEncoder, frame_info: *const u8) -> Status {
        // SAFETY: live handle; the out-parameter or record slot has the size CharLS expects.
        unsafe { charls_jpegls_encoder_set_frame_info(encoder, frame_info.cast()) }
    }

    unsafe fn encoder_set_near_lossless(&self, encoder: *mut CharlsEncoder, near_lossless: i32) -> Status {
        // SAFETY: live handle.
        unsafe { charls_jpegls_encoder_set_near_lossless(encoder, near_lossless) }
    }

    unsafe fn encoder_set_interleave_mode(
        &self,
        encoder: *mut CharlsEncoder,
        interleave_mode: i32,
    ) -> Status {
        // SAFETY: live handle.
        unsafe { charls_jpegls_encoder_set_interleave_mode(encoder, interleave_mode) }
    }

    unsafe fn encoder_set_encoding_options(
        &self,
        encoder: *mut CharlsEncoder,
        encoding_options: u32,
    ) -> Status {
        // SAFETY: live handle.
        unsafe { charls_jpegls_encoder_set_encoding_options(encoder, encoding_options as c_int) }
    }

    unsafe fn encoder_get_estimated_destination_size(
        &self,
        encoder: *mut CharlsEncoder,
        size: *mut u8,
    ) -> Status {
        let mut estimate = 0usize;
        // SAFETY: live handle; `size_t` goes to a local, the caller provides the 4-byte slot.
        unsafe {
            let status = charls_jpegls_encoder_get_estimated_destination_size(encoder, &mut estimate);
            store_size(status, estimate, size)
        }
    }

    unsafe fn encoder_set_destination_buffer(
        &self,
        encoder: *mut CharlsEncoder,
        destination: *mut u8,
        destination_size: usize,
    ) -> Status {
        // SAFETY: live handle; the buffer is valid for the given size.
        unsafe {
            charls_jpegls_encoder_set_destination_buffer(
                encoder,
                destination.cast(),
                destination_size,
            )
        }
    }

    unsafe fn encoder_encode_from_buffer(
        &self,
        encoder: *mut CharlsEncoder,
        source: *const u8,
        source_size: usize,
        stride: u32,
    ) -> Status {
        // SAFETY: live handle; the buffer is valid for the given size.
        unsafe { charls_jpegls_encoder_encode_from_buffer(encoder, source.cast(), source_size, stride) }
    }

    unsafe fn encoder_get_bytes_written(
        &self,
        encoder: *mut CharlsEncoder,
        bytes_written: *mut u8,
    ) -> Status {
        let mut written = 0usize;
        // SAFETY: live handle; `size_t` goes to a local, the caller provides the 4-byte slot.
        unsafe {
            let status = charls_jpegls_encoder_get_bytes_written(encoder, &mut written);
            store_size(status, written, bytes_written)
        }
    }

    unsafe fn encoder_rewind(&self, encoder: *mut CharlsEncoder) -> Status {
        // SAFETY: live handle.
        unsafe { charls_jpegls_encoder_rewind(encoder) }
    }

    fn version_string(&self) -> *const c_char {
        // SAFETY: returns a static string.
        unsafe { charls_get_version_string() }
    }

    fn error_message(&self, code: Status) -> *const c_char {
        // SAFETY: returns a static string for any value.
        unsafe { charls_get_error_message(code) }
    }
}
