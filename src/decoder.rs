//! Decoding session.
//!
//! ```text
//! Created ──set_source_buffer──▶ SourceSet ──read_header──▶ HeaderRead ──decode_to_buffer──▶ Decoded
//!    ▲                              │ ▲                        │                               │
//!    │                              └─┘ (re-entrant)           ▼ engine error                  │
//!    └───────────────────────── reset ◀──────────────────── Failed ◀──────────────────────────┘
//! ```
//!
//! Once a header has been read the engine keeps a stream position that is
//! unsafe to reuse for another image. The engine offers no decode-side
//! rewind, so [`DecoderSession::reset`] replaces the handle.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::arena::BufferRegion;
use crate::engine::{self, Engine};
use crate::error::{JpeglsErrc, Result, SessionError, check_status, engine_error, invalid_operation};
use crate::marshal::Scratch;
use crate::{FrameInfo, InterleaveMode};

/// Decoder life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Fresh handle, nothing bound.
    Created,
    /// Encoded bytes copied and bound to the handle.
    SourceSet,
    /// Header parsed; image properties can be queried.
    HeaderRead,
    /// Pixels written to the destination region.
    Decoded,
    /// An engine call failed; only `reset` and `dispose` are useful.
    Failed,
}

impl DecoderState {
    /// Whether the handle holds stream state from a previous image.
    pub fn needs_reset(self) -> bool {
        matches!(self, Self::HeaderRead | Self::Decoded | Self::Failed)
    }

    fn has_header(self) -> bool {
        matches!(self, Self::HeaderRead | Self::Decoded)
    }
}

/// Parses and decodes JPEG-LS streams through one engine decoder handle.
pub struct DecoderSession<E: Engine> {
    engine: Arc<E>,
    handle: Option<NonNull<E::Decoder>>,
    source: BufferRegion,
    destination: BufferRegion,
    scratch: Scratch,
    state: DecoderState,
}

// SAFETY: the handle, regions and scratch are owned by this session alone and
// are only touched through it, so moving the session to another thread moves
// all of them together. The session is not `Sync`.
unsafe impl<E: Engine + Send + Sync> Send for DecoderSession<E> {}

impl<E: Engine> DecoderSession<E> {
    /// Acquires a decoder handle and the scratch slots.
    pub fn new(engine: Arc<E>) -> Result<Self> {
        let scratch = Scratch::allocate(&*engine)?;
        let mut session = Self {
            engine,
            handle: None,
            source: BufferRegion::new("source buffer"),
            destination: BufferRegion::new("destination buffer"),
            scratch,
            state: DecoderState::Created,
        };
        session.handle = Some(create_handle(&*session.engine)?);
        Ok(session)
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Version of the engine behind this session.
    pub fn version(&self) -> String {
        engine::version(&*self.engine)
    }

    /// Source region bookkeeping.
    pub fn source_region(&self) -> &BufferRegion {
        &self.source
    }

    /// Destination region bookkeeping.
    pub fn destination_region(&self) -> &BufferRegion {
        &self.destination
    }

    /// Copies `bytes` into engine memory and binds them as the stream to decode.
    ///
    /// May be repeated before the header is read; the last call wins.
    pub fn set_source_buffer(&mut self, bytes: &[u8]) -> Result<()> {
        if !matches!(self.state, DecoderState::Created | DecoderState::SourceSet) {
            return Err(invalid_operation(&*self.engine, "set_source_buffer"));
        }
        self.source.write(&*self.engine, bytes)?;

        // SAFETY: live handle; the source region holds `bytes.len()` bytes.
        let status = unsafe {
            self.engine.decoder_set_source_buffer(
                self.raw_handle(),
                self.source.as_mut_ptr(),
                bytes.len(),
            )
        };
        self.track(check_status(&*self.engine, status, "decoder_set_source_buffer"))?;
        self.state = DecoderState::SourceSet;
        Ok(())
    }

    /// Parses the header of the bound stream.
    ///
    /// A failure leaves the session in [`DecoderState::Failed`]; call
    /// [`reset`](Self::reset) before decoding anything else.
    pub fn read_header(&mut self) -> Result<()> {
        if self.state != DecoderState::SourceSet {
            return Err(invalid_operation(&*self.engine, "read_header"));
        }
        // SAFETY: live handle.
        let status = unsafe { self.engine.decoder_read_header(self.raw_handle()) };
        self.track(check_status(&*self.engine, status, "decoder_read_header"))?;
        self.state = DecoderState::HeaderRead;
        Ok(())
    }

    /// Bytes needed for the packed decoded image (component 0, stride 0).
    pub fn destination_size(&self) -> Result<usize> {
        self.require_header("destination_size")?;
        // SAFETY: live handle; the scalar slot is 4 bytes.
        let status = unsafe {
            self.engine
                .decoder_get_destination_size(self.raw_handle(), 0, self.scratch.scalar_ptr())
        };
        check_status(&*self.engine, status, "decoder_get_destination_size")?;
        Ok(self.scratch.load_u32() as usize)
    }

    /// Decodes into the destination region and returns a view of exactly
    /// `size` bytes of it.
    ///
    /// The view borrows the session and has to be dropped (or copied) before
    /// the next mutating call.
    pub fn decode_to_buffer(&mut self, size: usize) -> Result<&[u8]> {
        if self.state != DecoderState::HeaderRead {
            return Err(invalid_operation(&*self.engine, "decode_to_buffer"));
        }
        self.destination.ensure_capacity(&*self.engine, size)?;

        // SAFETY: live handle; the destination region holds at least `size` bytes.
        let status = unsafe {
            self.engine.decoder_decode_to_buffer(
                self.raw_handle(),
                self.destination.as_mut_ptr(),
                size,
                0,
            )
        };
        self.track(check_status(&*self.engine, status, "decoder_decode_to_buffer"))?;
        self.state = DecoderState::Decoded;
        Ok(self.destination.view(size))
    }

    /// Decodes a complete stream: reset, bind, parse, size, decode.
    ///
    /// Every call starts from a clean engine state, whatever happened before.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<&[u8]> {
        self.reset()?;
        self.set_source_buffer(bytes)?;
        self.read_header()?;
        let size = self.destination_size()?;
        self.decode_to_buffer(size)
    }

    /// Discards the engine's stream state by replacing the handle.
    ///
    /// Does nothing while no header has been read. The replacement handle is
    /// created before the old one is destroyed, so an allocation failure
    /// leaves the session as it was.
    pub fn reset(&mut self) -> Result<()> {
        if !self.state.needs_reset() {
            return Ok(());
        }
        let fresh = create_handle(&*self.engine)?;
        if let Some(old) = self.handle.replace(fresh) {
            // SAFETY: `old` is a live handle that nothing else references.
            unsafe { self.engine.decoder_destroy(old.as_ptr()) };
        }
        log::debug!("decoder reset from {:?}", self.state);
        self.state = DecoderState::Created;
        Ok(())
    }

    /// Shape and sample format of the parsed image.
    pub fn frame_info(&self) -> Result<FrameInfo> {
        self.require_header("frame_info")?;
        // SAFETY: live handle; the record slot is 16 bytes.
        let status = unsafe {
            self.engine
                .decoder_get_frame_info(self.raw_handle(), self.scratch.frame_info_ptr())
        };
        check_status(&*self.engine, status, "decoder_get_frame_info")?;
        Ok(self.scratch.load_frame_info())
    }

    /// Interleave mode of component 0.
    pub fn interleave_mode(&self) -> Result<InterleaveMode> {
        self.require_header("interleave_mode")?;
        // SAFETY: live handle; the scalar slot is 4 bytes.
        let status = unsafe {
            self.engine
                .decoder_get_interleave_mode(self.raw_handle(), 0, self.scratch.scalar_ptr())
        };
        check_status(&*self.engine, status, "decoder_get_interleave_mode")?;
        InterleaveMode::try_from(self.scratch.load_i32()).map_err(|_| {
            engine_error(&*self.engine, JpeglsErrc::InvalidParameterInterleaveMode.into())
        })
    }

    /// NEAR parameter of component 0; 0 means lossless.
    pub fn near_lossless(&self) -> Result<i32> {
        self.require_header("near_lossless")?;
        // SAFETY: live handle; the scalar slot is 4 bytes.
        let status = unsafe {
            self.engine
                .decoder_get_near_lossless(self.raw_handle(), 0, self.scratch.scalar_ptr())
        };
        check_status(&*self.engine, status, "decoder_get_near_lossless")?;
        Ok(self.scratch.load_i32())
    }

    /// Releases the handle and all engine memory.
    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.destination.release(&*self.engine);
        self.source.release(&*self.engine);
        self.scratch.release(&*self.engine);
        if let Some(handle) = self.handle.take() {
            // SAFETY: live handle, cleared from the session above.
            unsafe { self.engine.decoder_destroy(handle.as_ptr()) };
            log::debug!("decoder handle destroyed");
        }
    }

    fn raw_handle(&self) -> *mut E::Decoder {
        self.handle.map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    fn require_header(&self, operation: &str) -> Result<()> {
        if self.state.has_header() {
            Ok(())
        } else {
            Err(invalid_operation(&*self.engine, operation))
        }
    }

    /// Moves to `Failed` when a stream-consuming engine call failed.
    fn track(&mut self, result: Result<()>) -> Result<()> {
        if let Err(SessionError::Engine { .. }) = &result {
            self.state = DecoderState::Failed;
        }
        result
    }
}

impl<E: Engine> Drop for DecoderSession<E> {
    fn drop(&mut self) {
        self.release();
    }
}

fn create_handle<E: Engine + ?Sized>(engine: &E) -> Result<NonNull<E::Decoder>> {
    let handle = NonNull::new(engine.decoder_create()).ok_or(SessionError::Allocation {
        what: "decoder handle",
        size: 0,
    })?;
    log::debug!("decoder handle created");
    Ok(handle)
}
