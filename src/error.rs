//! Error types for the DNP3 protocol engine.
//!
//! Each protocol layer has its own error enum; [`ProtocolError`] wraps them
//! for the public API.

use thiserror::Error;

use crate::mapping::PointType;
use crate::types::Iin;

/// Result type alias for DNP3 operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Link-layer framing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Frame does not begin with 0x05 0x64
    #[error("Bad start marker: expected 05 64, got {0:02X} {1:02X}")]
    BadStart(u8, u8),

    /// Not enough bytes buffered yet
    #[error("Truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Header CRC mismatch
    #[error("Bad header CRC: expected {expected:#06X}, got {actual:#06X}")]
    BadHeaderCrc { expected: u16, actual: u16 },

    /// Data block CRC mismatch
    #[error("Bad CRC in data block {block}: expected {expected:#06X}, got {actual:#06X}")]
    BadBlockCrc {
        block: usize,
        expected: u16,
        actual: u16,
    },

    /// Length field below the 5-byte minimum
    #[error("Invalid length field: {0} (minimum 5)")]
    BadLength(u8),

    /// User data does not fit in one frame
    #[error("Payload too large: {0} bytes (maximum 250)")]
    PayloadTooLarge(usize),
}

impl FrameError {
    /// Check if this error only means more bytes are needed.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }
}

/// Transport-layer reassembly errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Segment arrived out of order; the partial message was discarded
    #[error("Transport sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u8, actual: u8 },

    /// Continuation segment with no reassembly in progress
    #[error("Segment {seq} without FIR while idle")]
    NoFirstSegment { seq: u8 },

    /// Reassembled message exceeded the configured limit
    #[error("Reassembled fragment exceeds {limit} bytes")]
    Overflow { limit: usize },

    /// Frame carried no transport header
    #[error("Empty transport segment")]
    EmptySegment,
}

/// Application-layer decode errors.
///
/// Offsets are relative to the start of the application fragment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplicationDecodeError {
    /// Not enough bytes for the next field or object data
    #[error("Truncated at offset {offset}: need {needed} bytes, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Unknown function code
    #[error("Unknown function code {code:#04X} at offset {offset}")]
    UnknownFunction { code: u8, offset: usize },

    /// Group/variation this codec does not decode
    #[error("Unknown object g{group}v{variation} at offset {offset}")]
    UnknownObject {
        group: u8,
        variation: u8,
        offset: usize,
    },

    /// Qualifier not valid for this object
    #[error("Bad qualifier {qualifier:#04X} for g{group}v{variation} at offset {offset}")]
    BadQualifier {
        qualifier: u8,
        group: u8,
        variation: u8,
        offset: usize,
    },

    /// Start index greater than stop index
    #[error("Bad range {start}..={stop} at offset {offset}")]
    BadRange { start: u32, stop: u32, offset: usize },

    /// The response did not contain the requested point
    #[error("Point g{group}v{variation} index {index} not in response")]
    PointMissing { group: u8, variation: u8, index: u16 },
}

/// Master session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Retry budget exhausted without a matching response
    #[error("No response after {attempts} attempts")]
    NoResponse {
        attempts: u32,
        /// Last frame the link layer rejected while waiting, if any
        last_frame_error: Option<FrameError>,
    },

    /// Response sequence does not match the outstanding request
    #[error("Stale response: expected sequence {expected}, got {actual}")]
    StaleResponse { expected: u8, actual: u8 },

    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the connection
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// TCP connect did not complete in time
    #[error("Connection timeout")]
    ConnectTimeout,

    /// Caller cancelled the session
    #[error("Session cancelled")]
    Cancelled,

    /// Session already terminated
    #[error("Session closed")]
    Closed,

    /// Outstation rejected the request through IIN2
    #[error("Request rejected by outstation: {iin}")]
    Rejected { iin: Iin },

    /// Outstation echoed a command with a non-zero status
    #[error("Command on index {index} failed with status {status}")]
    CommandFailed { index: u16, status: u8 },

    /// Unexpected link-layer reply to a link service request
    #[error("Unexpected link reply: function {function}")]
    BadLinkResponse { function: u8 },
}

/// Tag-to-object mapping errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MappingError {
    /// Point type name has no object group
    #[error("Unsupported point type: {0}")]
    UnsupportedPointType(String),

    /// Point type cannot be written or operated
    #[error("Point type {0} is not writable")]
    NotWritable(PointType),

    /// Variation not defined for the group
    #[error("Unsupported variation g{group}v{variation}")]
    UnsupportedVariation { group: u8, variation: u8 },

    /// Index does not fit after applying the offset
    #[error("Index {index} out of range with offset {index_offset}")]
    IndexOutOfRange { index: i64, index_offset: i32 },

    /// Scale of zero cannot be inverted
    #[error("Invalid scale: {0}")]
    InvalidScale(f64),

    /// Value kind does not fit the point type
    #[error("Value {value} does not fit point type {point_type}")]
    TypeMismatch { point_type: PointType, value: String },

    /// Value does not fit the wire encoding
    #[error("Value {value} out of range for g{group}v{variation}")]
    ValueOutOfRange { value: f64, group: u8, variation: u8 },
}

/// DNP3 protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Link-layer error
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Transport-layer error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Application-layer decode error
    #[error("Application decode error: {0}")]
    Decode(#[from] ApplicationDecodeError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Mapping error
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        Self::Session(SessionError::Io(err))
    }
}

impl ProtocolError {
    /// Check if this error ends the session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Session(
                SessionError::Io(_)
                    | SessionError::ConnectionClosed
                    | SessionError::ConnectTimeout
                    | SessionError::Cancelled
                    | SessionError::Closed
            )
        )
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Frame(_) | Self::Transport(_) | Self::Session(SessionError::NoResponse { .. })
        )
    }
}
