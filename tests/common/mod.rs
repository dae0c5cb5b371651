// In-process engine for the integration tests.
//
// Implements every entry point with CharLS status codes and a stored (not
// compressed) marker framing:
//
//   FF D8                        SOI
//   [FF FE len "charls 2.4.2"]   COM, with INCLUDE_VERSION_NUMBER
//   FF F7 00 0E w:u32 h:u32 bps cc near ilv
//   [FF F8 00 0D ...]            LSE, with INCLUDE_PC_PARAMETERS_JAI
//   FF DA <packed samples>       SOS + payload
//   [FF]                         fill byte, with EVEN_DESTINATION_SIZE
//   FF D9                        EOI
//
// Heap and handle traffic is counted so tests can check for leaks.

#![allow(dead_code)]

use std::alloc::{Layout, alloc, dealloc};
use std::ffi::{CString, c_char};
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use jpegls_session::{
    EncodeOptions, EncoderSession, Engine, ForeignHeap, FrameInfo, JpeglsErrc, Status,
};

const HEAP_HEADER: usize = 16;
const SOF_LENGTH: u16 = 14;
const LSE_LENGTH: u16 = 13;
const VERSION_COMMENT: &[u8] = b"charls 2.4.2";
const FRAME_OVERHEAD: usize = 64;

const SUCCESS: Status = 0;

fn errc(code: JpeglsErrc) -> Status {
    code.into()
}

#[derive(Default)]
pub struct FakeEngine {
    allocations: AtomicUsize,
    frees: AtomicUsize,
    handles_created: AtomicUsize,
    handles_destroyed: AtomicUsize,
    fail_allocations: AtomicBool,
    fail_handle_creation: AtomicBool,
    fail_destination_binding: AtomicBool,
    interrupt_encoding: AtomicBool,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn outstanding_allocations(&self) -> usize {
        self.allocations() - self.frees.load(Ordering::SeqCst)
    }

    pub fn handles_created(&self) -> usize {
        self.handles_created.load(Ordering::SeqCst)
    }

    pub fn live_handles(&self) -> usize {
        self.handles_created() - self.handles_destroyed.load(Ordering::SeqCst)
    }

    pub fn fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::SeqCst);
    }

    pub fn fail_handle_creation(&self, fail: bool) {
        self.fail_handle_creation.store(fail, Ordering::SeqCst);
    }

    pub fn fail_destination_binding(&self, fail: bool) {
        self.fail_destination_binding.store(fail, Ordering::SeqCst);
    }

    /// Makes the next encodes stop after the frame header with an error,
    /// leaving the write position past the partial output.
    pub fn interrupt_encoding(&self, interrupt: bool) {
        self.interrupt_encoding.store(interrupt, Ordering::SeqCst);
    }

    fn create_handle<T>(&self, state: T) -> *mut T {
        if self.fail_handle_creation.load(Ordering::SeqCst) {
            return std::ptr::null_mut();
        }
        self.handles_created.fetch_add(1, Ordering::SeqCst);
        Box::into_raw(Box::new(state))
    }

    unsafe fn destroy_handle<T>(&self, handle: *mut T) {
        if !handle.is_null() {
            self.handles_destroyed.fetch_add(1, Ordering::SeqCst);
            drop(unsafe { Box::from_raw(handle) });
        }
    }
}

impl ForeignHeap for FakeEngine {
    fn malloc(&self, size: usize) -> *mut u8 {
        if self.fail_allocations.load(Ordering::SeqCst) {
            return std::ptr::null_mut();
        }
        let layout = Layout::from_size_align(size + HEAP_HEADER, HEAP_HEADER).unwrap();
        let base = unsafe { alloc(layout) };
        if base.is_null() {
            return base;
        }
        self.allocations.fetch_add(1, Ordering::SeqCst);
        unsafe {
            base.cast::<usize>().write(size);
            base.add(HEAP_HEADER)
        }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        self.frees.fetch_add(1, Ordering::SeqCst);
        unsafe {
            let base = ptr.sub(HEAP_HEADER);
            let size = base.cast::<usize>().read();
            dealloc(
                base,
                Layout::from_size_align_unchecked(size + HEAP_HEADER, HEAP_HEADER),
            );
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Header {
    frame_info: FrameInfo,
    near_lossless: i32,
    interleave_mode: i32,
    payload_offset: usize,
}

#[derive(Debug)]
pub struct FakeDecoder {
    source: *const u8,
    source_size: usize,
    header_attempted: bool,
    header: Option<Header>,
    decoded: bool,
}

#[derive(Debug)]
pub struct FakeEncoder {
    frame_info: Option<FrameInfo>,
    near_lossless: i32,
    interleave_mode: i32,
    encoding_options: u32,
    destination: *mut u8,
    destination_size: usize,
    bytes_written: usize,
}

unsafe fn write_word(out: *mut u8, bytes: [u8; 4]) {
    unsafe { out.cast::<[u8; 4]>().write_unaligned(bytes) };
}

fn parse_header(source: &[u8]) -> Result<Header, JpeglsErrc> {
    if source.len() < 2 {
        return Err(JpeglsErrc::NeedMoreData);
    }
    if source[0] != 0xFF {
        return Err(JpeglsErrc::JpegMarkerStartByteNotFound);
    }
    if source[1] != 0xD8 {
        return Err(JpeglsErrc::StartOfImageMarkerNotFound);
    }

    let mut position = 2;
    let mut frame: Option<(FrameInfo, i32, i32)> = None;
    loop {
        let marker = source
            .get(position..position + 2)
            .ok_or(JpeglsErrc::NeedMoreData)?;
        if marker[0] != 0xFF {
            return Err(JpeglsErrc::JpegMarkerStartByteNotFound);
        }
        position += 2;
        match marker[1] {
            0xDA => {
                let (frame_info, near_lossless, interleave_mode) =
                    frame.ok_or(JpeglsErrc::UnexpectedStartOfScanMarker)?;
                return Ok(Header {
                    frame_info,
                    near_lossless,
                    interleave_mode,
                    payload_offset: position,
                });
            }
            0xF7 | 0xF8 | 0xFE => {
                let length = source
                    .get(position..position + 2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
                    .ok_or(JpeglsErrc::NeedMoreData)?;
                let segment = source
                    .get(position + 2..position + length)
                    .ok_or(JpeglsErrc::NeedMoreData)?;
                if marker[1] == 0xF7 {
                    if frame.is_some() {
                        return Err(JpeglsErrc::DuplicateStartOfFrameMarker);
                    }
                    if length != SOF_LENGTH as usize {
                        return Err(JpeglsErrc::InvalidMarkerSegmentSize);
                    }
                    let frame_info = FrameInfo::new(
                        u32::from_be_bytes(segment[0..4].try_into().unwrap()),
                        u32::from_be_bytes(segment[4..8].try_into().unwrap()),
                        segment[8] as i32,
                        segment[9] as i32,
                    );
                    frame = Some((frame_info, segment[10] as i32, segment[11] as i32));
                }
                position += length;
            }
            _ => return Err(JpeglsErrc::UnknownJpegMarkerFound),
        }
    }
}

fn check_interleave_mode_range(interleave_mode: i32) -> Status {
    if (0..=2).contains(&interleave_mode) {
        SUCCESS
    } else {
        errc(JpeglsErrc::InvalidArgumentInterleaveMode)
    }
}

fn messages() -> &'static Vec<(Status, CString)> {
    static MESSAGES: OnceLock<Vec<(Status, CString)>> = OnceLock::new();
    MESSAGES.get_or_init(|| {
        (1..=200)
            .filter_map(|code| JpeglsErrc::try_from(code).ok())
            .map(|errc| {
                let message = CString::new(errc.to_string()).unwrap();
                (i32::from(errc), message)
            })
            .collect()
    })
}

impl Engine for FakeEngine {
    type Decoder = FakeDecoder;
    type Encoder = FakeEncoder;

    fn decoder_create(&self) -> *mut FakeDecoder {
        self.create_handle(FakeDecoder {
            source: std::ptr::null(),
            source_size: 0,
            header_attempted: false,
            header: None,
            decoded: false,
        })
    }

    unsafe fn decoder_destroy(&self, decoder: *mut FakeDecoder) {
        unsafe { self.destroy_handle(decoder) }
    }

    unsafe fn decoder_set_source_buffer(
        &self,
        decoder: *mut FakeDecoder,
        source: *const u8,
        source_size: usize,
    ) -> Status {
        let decoder = unsafe { &mut *decoder };
        if source.is_null() {
            return errc(JpeglsErrc::InvalidArgument);
        }
        if decoder.header_attempted {
            return errc(JpeglsErrc::InvalidOperation);
        }
        decoder.source = source;
        decoder.source_size = source_size;
        SUCCESS
    }

    unsafe fn decoder_read_header(&self, decoder: *mut FakeDecoder) -> Status {
        let decoder = unsafe { &mut *decoder };
        if decoder.source.is_null() || decoder.header_attempted {
            return errc(JpeglsErrc::InvalidOperation);
        }
        decoder.header_attempted = true;
        let source = unsafe { std::slice::from_raw_parts(decoder.source, decoder.source_size) };
        match parse_header(source) {
            Ok(header) => {
                decoder.header = Some(header);
                SUCCESS
            }
            Err(code) => errc(code),
        }
    }

    unsafe fn decoder_get_frame_info(&self, decoder: *mut FakeDecoder, frame_info: *mut u8) -> Status {
        let Some(header) = (unsafe { &*decoder }).header else {
            return errc(JpeglsErrc::InvalidOperation);
        };
        let info = header.frame_info;
        unsafe {
            write_word(frame_info, info.width.to_ne_bytes());
            write_word(frame_info.add(4), info.height.to_ne_bytes());
            write_word(frame_info.add(8), info.bits_per_sample.to_ne_bytes());
            write_word(frame_info.add(12), info.component_count.to_ne_bytes());
        }
        SUCCESS
    }

    unsafe fn decoder_get_near_lossless(
        &self,
        decoder: *mut FakeDecoder,
        _component: i32,
        near_lossless: *mut u8,
    ) -> Status {
        let Some(header) = (unsafe { &*decoder }).header else {
            return errc(JpeglsErrc::InvalidOperation);
        };
        unsafe { write_word(near_lossless, header.near_lossless.to_ne_bytes()) };
        SUCCESS
    }

    unsafe fn decoder_get_interleave_mode(
        &self,
        decoder: *mut FakeDecoder,
        _component: i32,
        interleave_mode: *mut u8,
    ) -> Status {
        let Some(header) = (unsafe { &*decoder }).header else {
            return errc(JpeglsErrc::InvalidOperation);
        };
        unsafe { write_word(interleave_mode, header.interleave_mode.to_ne_bytes()) };
        SUCCESS
    }

    unsafe fn decoder_get_destination_size(
        &self,
        decoder: *mut FakeDecoder,
        stride: u32,
        destination_size: *mut u8,
    ) -> Status {
        let Some(header) = (unsafe { &*decoder }).header else {
            return errc(JpeglsErrc::InvalidOperation);
        };
        if stride != 0 {
            return errc(JpeglsErrc::InvalidArgumentStride);
        }
        let size = packed_size(&header.frame_info) as u32;
        unsafe { write_word(destination_size, size.to_ne_bytes()) };
        SUCCESS
    }

    unsafe fn decoder_decode_to_buffer(
        &self,
        decoder: *mut FakeDecoder,
        destination: *mut u8,
        destination_size: usize,
        _stride: u32,
    ) -> Status {
        let decoder = unsafe { &mut *decoder };
        let Some(header) = decoder.header else {
            return errc(JpeglsErrc::InvalidOperation);
        };
        if decoder.decoded {
            return errc(JpeglsErrc::InvalidOperation);
        }
        let size = packed_size(&header.frame_info);
        if destination_size < size {
            return errc(JpeglsErrc::DestinationTooSmall);
        }
        let source = unsafe { std::slice::from_raw_parts(decoder.source, decoder.source_size) };
        let Some(payload) = source.get(header.payload_offset..header.payload_offset + size) else {
            return errc(JpeglsErrc::NeedMoreData);
        };
        let mut trailer = &source[header.payload_offset + size..];
        if trailer.len() == 3 && trailer[0] == 0xFF {
            trailer = &trailer[1..];
        }
        if trailer != [0xFF, 0xD9] {
            return errc(JpeglsErrc::EndOfImageMarkerNotFound);
        }
        unsafe { std::ptr::copy_nonoverlapping(payload.as_ptr(), destination, size) };
        decoder.decoded = true;
        SUCCESS
    }

    fn encoder_create(&self) -> *mut FakeEncoder {
        self.create_handle(FakeEncoder {
            frame_info: None,
            near_lossless: 0,
            interleave_mode: 0,
            encoding_options: 0,
            destination: std::ptr::null_mut(),
            destination_size: 0,
            bytes_written: 0,
        })
    }

    unsafe fn encoder_destroy(&self, encoder: *mut FakeEncoder) {
        unsafe { self.destroy_handle(encoder) }
    }

    unsafe fn encoder_set_frame_info(&self, encoder: *mut FakeEncoder, frame_info: *const u8) -> Status {
        let encoder = unsafe { &mut *encoder };
        let raw = unsafe { std::slice::from_raw_parts(frame_info, 16) };
        let info = FrameInfo::new(
            u32::from_ne_bytes(raw[0..4].try_into().unwrap()),
            u32::from_ne_bytes(raw[4..8].try_into().unwrap()),
            i32::from_ne_bytes(raw[8..12].try_into().unwrap()),
            i32::from_ne_bytes(raw[12..16].try_into().unwrap()),
        );
        if info.width == 0 {
            return errc(JpeglsErrc::InvalidArgumentWidth);
        }
        if info.height == 0 {
            return errc(JpeglsErrc::InvalidArgumentHeight);
        }
        if !(2..=16).contains(&info.bits_per_sample) {
            return errc(JpeglsErrc::InvalidArgumentBitsPerSample);
        }
        if !(1..=255).contains(&info.component_count) {
            return errc(JpeglsErrc::InvalidArgumentComponentCount);
        }
        encoder.frame_info = Some(info);
        SUCCESS
    }

    unsafe fn encoder_set_near_lossless(&self, encoder: *mut FakeEncoder, near_lossless: i32) -> Status {
        let encoder = unsafe { &mut *encoder };
        let max_near = encoder
            .frame_info
            .map_or(255, |info| (((1i32 << info.bits_per_sample) - 1) / 2).min(255));
        if !(0..=max_near).contains(&near_lossless) {
            return errc(JpeglsErrc::InvalidArgumentNearLossless);
        }
        encoder.near_lossless = near_lossless;
        SUCCESS
    }

    unsafe fn encoder_set_interleave_mode(
        &self,
        encoder: *mut FakeEncoder,
        interleave_mode: i32,
    ) -> Status {
        let encoder = unsafe { &mut *encoder };
        let status = check_interleave_mode_range(interleave_mode);
        if status == SUCCESS {
            encoder.interleave_mode = interleave_mode;
        }
        status
    }

    unsafe fn encoder_set_encoding_options(
        &self,
        encoder: *mut FakeEncoder,
        encoding_options: u32,
    ) -> Status {
        let encoder = unsafe { &mut *encoder };
        if encoding_options & !0b111 != 0 {
            return errc(JpeglsErrc::InvalidArgumentEncodingOptions);
        }
        encoder.encoding_options = encoding_options;
        SUCCESS
    }

    unsafe fn encoder_get_estimated_destination_size(
        &self,
        encoder: *mut FakeEncoder,
        size: *mut u8,
    ) -> Status {
        let Some(info) = (unsafe { &*encoder }).frame_info else {
            return errc(JpeglsErrc::InvalidOperation);
        };
        let estimate = (packed_size(&info) + FRAME_OVERHEAD) as u32;
        unsafe { write_word(size, estimate.to_ne_bytes()) };
        SUCCESS
    }

    unsafe fn encoder_set_destination_buffer(
        &self,
        encoder: *mut FakeEncoder,
        destination: *mut u8,
        destination_size: usize,
    ) -> Status {
        let encoder = unsafe { &mut *encoder };
        if destination.is_null() || self.fail_destination_binding.load(Ordering::SeqCst) {
            return errc(JpeglsErrc::InvalidArgument);
        }
        encoder.destination = destination;
        encoder.destination_size = destination_size;
        encoder.bytes_written = 0;
        SUCCESS
    }

    unsafe fn encoder_encode_from_buffer(
        &self,
        encoder: *mut FakeEncoder,
        source: *const u8,
        source_size: usize,
        _stride: u32,
    ) -> Status {
        let encoder = unsafe { &mut *encoder };
        let Some(info) = encoder.frame_info else {
            return errc(JpeglsErrc::InvalidOperation);
        };
        if encoder.destination.is_null() || encoder.bytes_written != 0 {
            return errc(JpeglsErrc::InvalidOperation);
        }
        if source_size != packed_size(&info) {
            return errc(JpeglsErrc::InvalidArgumentSize);
        }
        if info.component_count == 1 && encoder.interleave_mode != 0 {
            return errc(JpeglsErrc::InvalidArgumentInterleaveMode);
        }

        let mut stream = Vec::with_capacity(source_size + FRAME_OVERHEAD);
        stream.extend_from_slice(&[0xFF, 0xD8]);
        if encoder.encoding_options & 2 != 0 {
            stream.extend_from_slice(&[0xFF, 0xFE]);
            stream.extend_from_slice(&((VERSION_COMMENT.len() + 2) as u16).to_be_bytes());
            stream.extend_from_slice(VERSION_COMMENT);
        }
        stream.extend_from_slice(&[0xFF, 0xF7]);
        stream.extend_from_slice(&SOF_LENGTH.to_be_bytes());
        stream.extend_from_slice(&info.width.to_be_bytes());
        stream.extend_from_slice(&info.height.to_be_bytes());
        stream.push(info.bits_per_sample as u8);
        stream.push(info.component_count as u8);
        stream.push(encoder.near_lossless as u8);
        stream.push(encoder.interleave_mode as u8);
        if encoder.encoding_options & 4 != 0 {
            let max_value = ((1u32 << info.bits_per_sample) - 1) as u16;
            stream.extend_from_slice(&[0xFF, 0xF8]);
            stream.extend_from_slice(&LSE_LENGTH.to_be_bytes());
            stream.push(1);
            stream.extend_from_slice(&max_value.to_be_bytes());
            stream.extend_from_slice(&[0; 8]);
        }
        stream.extend_from_slice(&[0xFF, 0xDA]);
        stream.extend_from_slice(unsafe { std::slice::from_raw_parts(source, source_size) });
        if encoder.encoding_options & 1 != 0 && stream.len() % 2 == 1 {
            stream.push(0xFF);
        }
        stream.extend_from_slice(&[0xFF, 0xD9]);

        if self.interrupt_encoding.load(Ordering::SeqCst) {
            let partial = stream.len().min(encoder.destination_size) / 2;
            unsafe { std::ptr::copy_nonoverlapping(stream.as_ptr(), encoder.destination, partial) };
            encoder.bytes_written = partial;
            return errc(JpeglsErrc::NotEnoughMemory);
        }
        if stream.len() > encoder.destination_size {
            let partial = encoder.destination_size;
            unsafe { std::ptr::copy_nonoverlapping(stream.as_ptr(), encoder.destination, partial) };
            encoder.bytes_written = partial;
            return errc(JpeglsErrc::DestinationTooSmall);
        }
        unsafe { std::ptr::copy_nonoverlapping(stream.as_ptr(), encoder.destination, stream.len()) };
        encoder.bytes_written = stream.len();
        SUCCESS
    }

    unsafe fn encoder_get_bytes_written(&self, encoder: *mut FakeEncoder, bytes_written: *mut u8) -> Status {
        let written = (unsafe { &*encoder }).bytes_written as u32;
        unsafe { write_word(bytes_written, written.to_ne_bytes()) };
        SUCCESS
    }

    unsafe fn encoder_rewind(&self, encoder: *mut FakeEncoder) -> Status {
        (unsafe { &mut *encoder }).bytes_written = 0;
        SUCCESS
    }

    fn version_string(&self) -> *const c_char {
        c"2.4.2".as_ptr()
    }

    fn error_message(&self, code: Status) -> *const c_char {
        messages()
            .iter()
            .find(|(known, _)| *known == code)
            .map_or(std::ptr::null(), |(_, message)| message.as_ptr())
    }
}

/// Size in bytes of the packed, uncompressed image.
pub fn packed_size(frame_info: &FrameInfo) -> usize {
    let bytes_per_sample = if frame_info.bits_per_sample > 8 { 2 } else { 1 };
    frame_info.width as usize
        * frame_info.height as usize
        * frame_info.component_count.max(0) as usize
        * bytes_per_sample
}

/// Deterministic test image covering the full sample range.
pub fn gradient_image(frame_info: &FrameInfo) -> Vec<u8> {
    let samples = frame_info.width as usize
        * frame_info.height as usize
        * frame_info.component_count as usize;
    let max_value = (1u32 << frame_info.bits_per_sample) - 1;
    let sample = |i: usize| ((i as u32).wrapping_mul(2_654_435_761) >> 7) & max_value;

    if frame_info.bits_per_sample > 8 {
        (0..samples)
            .flat_map(|i| (sample(i) as u16).to_ne_bytes())
            .collect()
    } else {
        (0..samples).map(|i| sample(i) as u8).collect()
    }
}

/// Encodes a [`gradient_image`] with a throwaway session.
///
/// Returns the pixels and the encoded stream.
pub fn encode_gradient(
    engine: &Arc<FakeEngine>,
    frame_info: &FrameInfo,
    options: &EncodeOptions,
) -> (Vec<u8>, Vec<u8>) {
    let pixels = gradient_image(frame_info);
    let mut encoder = EncoderSession::new(engine.clone()).unwrap();
    let encoded = encoder.encode(&pixels, frame_info, options).unwrap().to_vec();
    encoder.dispose();
    (pixels, encoded)
}
