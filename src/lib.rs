//! Stateful decoder and encoder sessions over a native JPEG-LS engine.
//!
//! The engine (CharLS or anything exposing the same entry points) does the
//! actual coding. This crate owns everything around it: the engine handles,
//! the engine-heap buffers that cross the boundary, the fixed-layout records
//! exchanged by address, and the order in which entry points may be called.
//!
//! ```ignore
//! let engine = std::sync::Arc::new(jpegls_session::CharLs);
//! let mut decoder = jpegls_session::DecoderSession::new(engine)?;
//! let pixels = decoder.decode(&encoded)?.to_vec();
//! let frame_info = decoder.frame_info()?;
//! decoder.dispose();
//! ```

pub mod arena;
pub mod decoder;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod marshal;

#[cfg(feature = "charls")]
pub mod charls;

#[cfg(test)]
pub(crate) mod testing;

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[cfg(feature = "charls")]
pub use charls::CharLs;
pub use decoder::{DecoderSession, DecoderState};
pub use encoder::{EncodeOptions, EncoderSession, EncoderState};
pub use engine::{Engine, ForeignHeap, Status};
pub use error::{JpeglsErrc, Result, SessionError};

/// Image shape and sample format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub bits_per_sample: i32,
    pub component_count: i32,
}

impl FrameInfo {
    pub fn new(width: u32, height: u32, bits_per_sample: i32, component_count: i32) -> Self {
        Self {
            width,
            height,
            bits_per_sample,
            component_count,
        }
    }
}

/// Arrangement of multi-component samples in the uncompressed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum InterleaveMode {
    /// Planar: all samples of one component, then the next (RRRGGGBBB).
    #[default]
    None = 0,
    /// Interleaved by line.
    Line = 1,
    /// Interleaved by sample (RGBRGBRGB).
    Sample = 2,
}

bitflags::bitflags! {
    /// Optional behaviors of the encoder.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EncodingOptions: u32 {
        /// Pad the output to an even number of bytes.
        const EVEN_DESTINATION_SIZE = 1;
        /// Write the engine version into a comment segment.
        const INCLUDE_VERSION_NUMBER = 2;
        /// Always write the preset coding parameters segment (JAI compatible).
        const INCLUDE_PC_PARAMETERS_JAI = 4;
    }
}
