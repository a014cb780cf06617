//! Codec error types

use thiserror::Error;

/// Errors raised while encoding or decoding wire data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A length field points past the end of the available data
    #[error("Invalid length: need {needed} bytes, {available} available")]
    InvalidLength { needed: usize, available: usize },

    /// BER indefinite length form (0x80)
    #[error("Indefinite length not supported")]
    IndefiniteLength,

    /// BER reserved length code (0xFF)
    #[error("Reserved length code")]
    ReservedLength,

    /// Long form length with more length octets than supported
    #[error("Unsupported length-of-length: {0}")]
    UnsupportedLength(usize),

    /// Tag did not match the expected ASN.1 type
    #[error("Unexpected tag: expected {expected}, found {found}")]
    UnexpectedTag { expected: String, found: String },

    /// INTEGER content length outside 1..=4 octets
    #[error("Invalid integer length: {0}")]
    InvalidInteger(usize),

    /// NULL with non-empty content
    #[error("Invalid null length: {0}")]
    InvalidNull(usize),

    /// Malformed object identifier
    #[error("Invalid object identifier: {0}")]
    InvalidOid(String),

    /// BCD nibble greater than 9
    #[error("Invalid BCD byte: {0:#04X}")]
    InvalidBcd(u8),

    /// Value does not fit the wire field
    #[error("Value out of range: {0}")]
    OutOfRange(String),
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;
