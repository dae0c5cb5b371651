//! Encoding session.
//!
//! ```text
//! Created ──set_frame_info──▶ Configured ──create_destination_buffer──▶ DestinationBound ──encode_from_buffer──▶ Encoded
//!    ▲                            ▲                                                                           │
//!    └──────── rewind ────────────┴───────────────────────────── rewind ──────────────────────────────────────┘
//! ```
//!
//! Unlike the decoder, the engine can rewind an encoder in place, so the same
//! handle and destination allocation serve any number of encodes.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::arena::BufferRegion;
use crate::engine::{self, Engine, SUCCESS};
use crate::error::{Result, SessionError, check_status, invalid_operation};
use crate::marshal::Scratch;
use crate::{EncodingOptions, FrameInfo, InterleaveMode};

/// Encoder life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    /// No frame info pushed yet.
    Created,
    /// Frame info accepted; size estimation is available.
    Configured,
    /// A destination region is bound.
    DestinationBound,
    /// A frame was written; `rewind` before the next one.
    Encoded,
}

/// Parameters of [`EncoderSession::encode`] besides the frame info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncodeOptions {
    pub interleave_mode: InterleaveMode,
    pub encoding_options: EncodingOptions,
    /// 0 is lossless.
    pub near_lossless: i32,
}

/// Configures and runs JPEG-LS encodes through one engine encoder handle.
pub struct EncoderSession<E: Engine> {
    engine: Arc<E>,
    handle: Option<NonNull<E::Encoder>>,
    source: BufferRegion,
    destination: BufferRegion,
    scratch: Scratch,
    state: EncoderState,
}

// SAFETY: see `DecoderSession`; the same exclusive ownership applies.
unsafe impl<E: Engine + Send + Sync> Send for EncoderSession<E> {}

impl<E: Engine> EncoderSession<E> {
    /// Acquires an encoder handle and the scratch slots.
    pub fn new(engine: Arc<E>) -> Result<Self> {
        let scratch = Scratch::allocate(&*engine)?;
        let mut session = Self {
            engine,
            handle: None,
            source: BufferRegion::new("source buffer"),
            destination: BufferRegion::new("destination buffer"),
            scratch,
            state: EncoderState::Created,
        };
        let handle = NonNull::new(session.engine.encoder_create()).ok_or(
            SessionError::Allocation {
                what: "encoder handle",
                size: 0,
            },
        )?;
        log::debug!("encoder handle created");
        session.handle = Some(handle);
        Ok(session)
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn version(&self) -> String {
        engine::version(&*self.engine)
    }

    pub fn source_region(&self) -> &BufferRegion {
        &self.source
    }

    pub fn destination_region(&self) -> &BufferRegion {
        &self.destination
    }

    /// Pushes the image shape to the engine. Required before size estimation.
    pub fn set_frame_info(&mut self, frame_info: &FrameInfo) -> Result<()> {
        self.require_not_encoded("set_frame_info")?;
        self.scratch.store_frame_info(frame_info);
        // SAFETY: live handle; the record slot holds a complete frame info.
        let status = unsafe {
            self.engine
                .encoder_set_frame_info(self.raw_handle(), self.scratch.frame_info_ptr())
        };
        check_status(&*self.engine, status, "encoder_set_frame_info")?;
        if self.state == EncoderState::Created {
            self.state = EncoderState::Configured;
        }
        Ok(())
    }

    pub fn set_near_lossless(&mut self, near_lossless: i32) -> Result<()> {
        self.require_not_encoded("set_near_lossless")?;
        // SAFETY: live handle.
        let status = unsafe {
            self.engine
                .encoder_set_near_lossless(self.raw_handle(), near_lossless)
        };
        check_status(&*self.engine, status, "encoder_set_near_lossless")
    }

    /// Accepts an [`InterleaveMode`] or a raw mode value. The engine checks
    /// the range here and the fit with the component count when encoding.
    pub fn set_interleave_mode(&mut self, interleave_mode: impl Into<i32>) -> Result<()> {
        self.require_not_encoded("set_interleave_mode")?;
        // SAFETY: live handle.
        let status = unsafe {
            self.engine
                .encoder_set_interleave_mode(self.raw_handle(), interleave_mode.into())
        };
        check_status(&*self.engine, status, "encoder_set_interleave_mode")
    }

    pub fn set_encoding_options(&mut self, encoding_options: EncodingOptions) -> Result<()> {
        self.require_not_encoded("set_encoding_options")?;
        // SAFETY: live handle.
        let status = unsafe {
            self.engine
                .encoder_set_encoding_options(self.raw_handle(), encoding_options.bits())
        };
        check_status(&*self.engine, status, "encoder_set_encoding_options")
    }

    /// Upper bound of the encoded size for the current configuration.
    pub fn estimated_destination_size(&self) -> Result<usize> {
        if self.state == EncoderState::Created {
            return Err(invalid_operation(&*self.engine, "estimated_destination_size"));
        }
        // SAFETY: live handle; the scalar slot is 4 bytes.
        let status = unsafe {
            self.engine
                .encoder_get_estimated_destination_size(self.raw_handle(), self.scratch.scalar_ptr())
        };
        check_status(&*self.engine, status, "encoder_get_estimated_destination_size")?;
        Ok(self.scratch.load_u32() as usize)
    }

    /// Makes the destination region at least `size` bytes and binds `size`
    /// bytes of it to the engine.
    ///
    /// A region that has to grow keeps its previous allocation until the
    /// engine accepts the new one. If the engine refuses, the session stays
    /// bound to the previous allocation.
    pub fn create_destination_buffer(&mut self, size: usize) -> Result<()> {
        if !matches!(
            self.state,
            EncoderState::Configured | EncoderState::DestinationBound
        ) {
            return Err(invalid_operation(&*self.engine, "create_destination_buffer"));
        }
        let reservation = self.destination.reserve(&*self.engine, size)?;
        // SAFETY: live handle; the destination region holds at least `size` bytes.
        let status = unsafe {
            self.engine.encoder_set_destination_buffer(
                self.raw_handle(),
                self.destination.as_mut_ptr(),
                size,
            )
        };
        if let Err(err) = check_status(&*self.engine, status, "encoder_set_destination_buffer") {
            self.destination.roll_back(&*self.engine, reservation);
            return Err(err);
        }
        self.destination.commit(&*self.engine, reservation);
        self.state = EncoderState::DestinationBound;
        Ok(())
    }

    /// Encodes `source` into the bound destination and returns a view of
    /// exactly the bytes written.
    ///
    /// A failed encode rewinds the engine, so the call can be repeated once
    /// the input is fixed.
    ///
    /// The view borrows the session and has to be dropped (or copied) before
    /// the next mutating call.
    pub fn encode_from_buffer(&mut self, source: &[u8]) -> Result<&[u8]> {
        if self.state != EncoderState::DestinationBound {
            return Err(invalid_operation(&*self.engine, "encode_from_buffer"));
        }
        self.source.write(&*self.engine, source)?;

        // SAFETY: live handle; the source region holds `source.len()` bytes.
        let status = unsafe {
            self.engine.encoder_encode_from_buffer(
                self.raw_handle(),
                self.source.as_mut_ptr(),
                source.len(),
                0,
            )
        };
        if let Err(err) = check_status(&*self.engine, status, "encoder_encode_from_buffer") {
            // The engine may have written part of a frame; the next attempt
            // has to start at the beginning of the destination again.
            // SAFETY: live handle.
            let status = unsafe { self.engine.encoder_rewind(self.raw_handle()) };
            if status != SUCCESS {
                log::debug!("encoder_rewind after a failed encode returned {status}");
            }
            return Err(err);
        }
        self.state = EncoderState::Encoded;

        let bytes_written = self.bytes_written()?;
        Ok(self.destination.view(bytes_written))
    }

    /// Size of the last encoded frame.
    pub fn bytes_written(&self) -> Result<usize> {
        if self.state != EncoderState::Encoded {
            return Err(invalid_operation(&*self.engine, "bytes_written"));
        }
        // SAFETY: live handle; the scalar slot is 4 bytes.
        let status = unsafe {
            self.engine
                .encoder_get_bytes_written(self.raw_handle(), self.scratch.scalar_ptr())
        };
        check_status(&*self.engine, status, "encoder_get_bytes_written")?;
        Ok(self.scratch.load_u32() as usize)
    }

    /// Resets the engine's write position so the handle can encode again.
    pub fn rewind(&mut self) -> Result<()> {
        // SAFETY: live handle.
        let status = unsafe { self.engine.encoder_rewind(self.raw_handle()) };
        check_status(&*self.engine, status, "encoder_rewind")?;
        if self.state != EncoderState::Created {
            self.state = EncoderState::Configured;
        }
        log::debug!("encoder rewound");
        Ok(())
    }

    /// Encodes one image: rewind, configure, size, bind, encode.
    ///
    /// Identical inputs produce identical output on every call.
    pub fn encode(
        &mut self,
        source: &[u8],
        frame_info: &FrameInfo,
        options: &EncodeOptions,
    ) -> Result<&[u8]> {
        self.rewind()?;
        self.set_frame_info(frame_info)?;
        self.set_interleave_mode(options.interleave_mode)?;
        self.set_encoding_options(options.encoding_options)?;
        self.set_near_lossless(options.near_lossless)?;

        let size = self.estimated_destination_size()?;
        self.create_destination_buffer(size)?;
        self.encode_from_buffer(source)
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
            unsafe { self.engine.encoder_destroy(handle.as_ptr()) };
            log::debug!("encoder handle destroyed");
        }
    }

    fn raw_handle(&self) -> *mut E::Encoder {
        self.handle.map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    fn require_not_encoded(&self, operation: &str) -> Result<()> {
        if self.state == EncoderState::Encoded {
            Err(invalid_operation(&*self.engine, operation))
        } else {
            Ok(())
        }
    }
}

impl<E: Engine> Drop for EncoderSession<E> {
    fn drop(&mut self) {
        self.release();
    }
}
