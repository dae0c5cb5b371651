//! Translation of engine status codes into typed errors.
//!
//! Every engine call is checked on the spot with [`check_status`]. A
//! non-zero status becomes [`SessionError::Engine`] carrying the code and the
//! engine's own message for it.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::engine::{Engine, Status, SUCCESS, engine_text};

pub type Result<T> = std::result::Result<T, SessionError>;

/// The two ways a session operation can fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The engine heap returned null for an allocation request.
    #[error("failed to allocate {what} ({size} bytes) in engine memory")]
    Allocation { what: &'static str, size: usize },

    /// An engine entry point returned a non-zero status.
    #[error("errorCode: {code}, message: {message}")]
    Engine { code: Status, message: String },
}

impl SessionError {
    /// Status code of an engine error.
    pub fn code(&self) -> Option<Status> {
        match self {
            Self::Engine { code, .. } => Some(*code),
            Self::Allocation { .. } => None,
        }
    }

    /// The engine error decoded into the known status catalogue.
    pub fn errc(&self) -> Option<JpeglsErrc> {
        self.code().and_then(|code| JpeglsErrc::try_from(code).ok())
    }
}

/// Status codes of the CharLS C API.
///
/// Codes 1..=38 report problems with the data, 100 and up report misuse of
/// the API.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum JpeglsErrc {
    #[error("No memory could be allocated for an internal buffer")]
    NotEnoughMemory = 1,
    #[error("Callback function returned a failure")]
    CallbackFailed = 2,
    #[error("The destination buffer is too small to hold all the output")]
    DestinationTooSmall = 3,
    #[error("The source buffer is too small, more input data was expected")]
    NeedMoreData = 4,
    #[error("Invalid JPEG-LS stream, the encoded bit stream contains a general structural problem")]
    InvalidData = 5,
    #[error("Invalid JPEG-LS stream: the JPEG stream is not encoded with the JPEG-LS algorithm")]
    EncodingNotSupported = 6,
    #[error("The JPEG-LS stream is encoded with a parameter value that is not supported by the decoder")]
    ParameterValueNotSupported = 7,
    #[error("The HP color transform is not supported")]
    ColorTransformNotSupported = 8,
    #[error("Unsupported JPEG-LS stream: JPEG-LS preset parameters segment contains a JPEG-LS Extended (ISO/IEC 14495-2) type")]
    JpeglsPresetExtendedParameterTypeNotSupported = 9,
    #[error("Invalid JPEG-LS stream: the leading start byte (0xFF) for a JPEG marker was not found")]
    JpegMarkerStartByteNotFound = 10,
    #[error("Invalid JPEG-LS stream: first JPEG marker is not a Start Of Image (SOI) marker")]
    StartOfImageMarkerNotFound = 11,
    #[error("Invalid JPEG-LS stream: invalid SPIFF header")]
    InvalidSpiffHeader = 12,
    #[error("Invalid JPEG-LS stream: an unknown JPEG marker code was found")]
    UnknownJpegMarkerFound = 13,
    #[error("Invalid JPEG-LS stream: unexpected Start Of Scan (SOS) marker found")]
    UnexpectedStartOfScanMarker = 14,
    #[error("Invalid JPEG-LS stream: segment has an invalid size")]
    InvalidMarkerSegmentSize = 15,
    #[error("Invalid JPEG-LS stream: more than one Start Of Image (SOI) marker")]
    DuplicateStartOfImageMarker = 16,
    #[error("Invalid JPEG-LS stream: more than one Start Of Frame (SOF) marker")]
    DuplicateStartOfFrameMarker = 17,
    #[error("Invalid JPEG-LS stream: duplicate component identifier in the (SOF) segment")]
    DuplicateComponentIdInSofSegment = 18,
    #[error("Invalid JPEG-LS stream: unexpected End Of Image (EOI) marker")]
    UnexpectedEndOfImageMarker = 19,
    #[error("Invalid JPEG-LS stream: JPEG-LS preset parameters segment contains an invalid type")]
    InvalidJpeglsPresetParameterType = 20,
    #[error("Invalid JPEG-LS stream: SPIFF header without End Of Directory (EOD) entry")]
    MissingEndOfSpiffDirectory = 21,
    #[error("Invalid JPEG-LS stream: restart (RTSm) marker found outside encoded entropy data")]
    UnexpectedRestartMarker = 22,
    #[error("Invalid JPEG-LS stream: missing expected restart (RTSm) marker")]
    RestartMarkerNotFound = 23,
    #[error("Invalid JPEG-LS stream: missing End Of Image (EOI) marker")]
    EndOfImageMarkerNotFound = 24,
    #[error("Invalid JPEG-LS stream: unexpected Define Number of Lines (DNL) marker")]
    UnexpectedDefineNumberOfLinesMarker = 25,
    #[error("Invalid JPEG-LS stream: missing Define Number of Lines (DNL) marker")]
    DefineNumberOfLinesMarkerNotFound = 26,
    #[error("Invalid JPEG-LS stream: unknown component ID in scan segment")]
    UnknownComponentId = 27,
    #[error("Invalid JPEG-LS stream: mapping tables without SPIFF header or frame")]
    AbbreviatedFormatAndSpiffHeaderMismatch = 28,
    #[error("Invalid JPEG-LS stream: the width (number of samples per line) is already defined")]
    InvalidParameterWidth = 29,
    #[error("Invalid JPEG-LS stream: the height (number of lines) is already defined")]
    InvalidParameterHeight = 30,
    #[error("Invalid JPEG-LS stream: the bit per sample (sample precision) parameter is not in the range [2, 16]")]
    InvalidParameterBitsPerSample = 31,
    #[error("Invalid JPEG-LS stream: component count in the SOF segment is outside the range [1, 255]")]
    InvalidParameterComponentCount = 32,
    #[error("Invalid JPEG-LS stream: interleave mode is outside the range [0, 2] or conflicts with component count")]
    InvalidParameterInterleaveMode = 33,
    #[error("Invalid JPEG-LS stream: near-lossless is outside the range [0, min(255, MAXVAL/2)]")]
    InvalidParameterNearLossless = 34,
    #[error("Invalid JPEG-LS stream: JPEG-LS preset parameters segment contains invalid values")]
    InvalidParameterJpeglsPresetParameters = 35,
    #[error("Invalid JPEG-LS stream: color transformation segment contains invalid values or frame info mismatch")]
    InvalidParameterColorTransformation = 36,
    #[error("Invalid JPEG-LS stream: mapping table ID outside valid range or duplicate")]
    InvalidParameterMappingTableId = 37,
    #[error("Invalid JPEG-LS stream: mapping table continuation without matching mapping table specification")]
    InvalidParameterMappingTableContinuation = 38,

    // Logic errors
    #[error("Method call is invalid for the current state")]
    InvalidOperation = 100,
    #[error("Invalid argument")]
    InvalidArgument = 101,
    #[error("The width argument is outside the supported range")]
    InvalidArgumentWidth = 102,
    #[error("The height argument is outside the supported range")]
    InvalidArgumentHeight = 103,
    #[error("The bit per sample argument is outside the range [2, 16]")]
    InvalidArgumentBitsPerSample = 104,
    #[error("The component count argument is outside the range [1, 255]")]
    InvalidArgumentComponentCount = 105,
    #[error("The interleave mode is not None, Sample, Line or invalid in combination with component count")]
    InvalidArgumentInterleaveMode = 106,
    #[error("The near lossless argument is outside the range [0, min(255, MAXVAL/2)]")]
    InvalidArgumentNearLossless = 107,
    #[error("The argument for the JPEG-LS preset coding parameters is not valid")]
    InvalidArgumentJpeglsPcParameters = 108,
    #[error("The argument for the color component is not (None, Hp1, Hp2, Hp3) or invalid in combination with component count")]
    InvalidArgumentColorTransformation = 109,
    #[error("The passed size of a buffer is outside the valid range")]
    InvalidArgumentSize = 110,
    #[error("The stride argument does not match with the frame info and buffer size")]
    InvalidArgumentStride = 111,
    #[error("The encoding options argument has an invalid value")]
    InvalidArgumentEncodingOptions = 112,
}

/// Checks the status of one engine call.
///
/// `entry_point` names the call for the log line only.
pub fn check_status<E: Engine + ?Sized>(
    engine: &E,
    status: Status,
    entry_point: &str,
) -> Result<()> {
    if status == SUCCESS {
        return Ok(());
    }
    log::debug!("{entry_point} failed with status {status}");
    Err(engine_error(engine, status))
}

/// Builds the error for `code`, resolving its text through the engine.
pub fn engine_error<E: Engine + ?Sized>(engine: &E, code: Status) -> SessionError {
    let message = engine_text(engine.error_message(code)).unwrap_or_else(|| {
        JpeglsErrc::try_from(code)
            .map(|errc| errc.to_string())
            .unwrap_or_else(|_| format!("Error code {code}"))
    });
    SessionError::Engine { code, message }
}

/// A call made in a session state that does not allow it.
pub(crate) fn invalid_operation<E: Engine + ?Sized>(engine: &E, operation: &str) -> SessionError {
    log::debug!("{operation} rejected in the current session state");
    engine_error(engine, JpeglsErrc::InvalidOperation.into())
}
