//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while parsing or building wire data.
///
/// None of these are transient: a buffer that fails to decode will fail the
/// same way every time. Receivers drop the offending envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer shorter than the structure being parsed
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Header claims more payload than the buffer contains
    #[error("envelope truncated: header claims {expected} payload bytes, got {actual}")]
    FrameTruncated {
        /// Payload size declared in the header
        expected: usize,
        /// Payload bytes actually present
        actual: usize,
    },

    /// Magic number mismatch
    #[error("invalid magic number")]
    InvalidMagic,

    /// Envelope version we do not speak
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    /// Header kind byte does not name an update kind
    #[error("unknown update kind: {0:#04x}")]
    UnknownKind(u8),

    /// Payload exceeds the protocol limit
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed
        max: usize,
    },

    /// CBOR serialization failed
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed
    #[error("CBOR decode error: {0}")]
    CborDecode(String),

    /// Key material has the wrong length
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required length
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// Public key does not start with the X25519 type prefix
    #[error("invalid key prefix: {0:#04x}")]
    InvalidKeyPrefix(u8),

    /// Hex string could not be decoded
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// String is not a double-encoded group id
    #[error("invalid group id: {0}")]
    InvalidGroupId(String),
}
