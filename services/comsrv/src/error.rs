//! Error handling for the communication service
//!
//! Every failure of a device exchange is a [`CommError`]. The operation
//! engine only looks at [`CommError::kind`] to decide between retrying the
//! phase, failing the operation, or taking the link down.

use errors::{ErrorCategory, TmsErrorTrait};
use std::fmt;
use thiserror::Error;
use tms_codec::CodecError;

use crate::transport::TransportError;

/// Fault reported by the controller itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFault {
    /// Memory write refused
    WriteProtect,
    /// Requested data not available
    NoData,
    /// Controller out of memory
    NoRam,
    /// SNMP noSuchName on the named object
    NoSuchName(String),
    /// SNMP genErr on the named object
    GenError(String),
    /// SNMP badValue on the named object
    BadValue(String),
    /// SNMP readOnly on the named object
    ReadOnly(String),
    /// SNMP tooBig
    TooBig,
}

impl fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFault::WriteProtect => write!(f, "WRITE PROTECT"),
            DeviceFault::NoData => write!(f, "NO DATA"),
            DeviceFault::NoRam => write!(f, "NO RAM"),
            DeviceFault::NoSuchName(name) => write!(f, "NO SUCH NAME: {name}"),
            DeviceFault::GenError(name) => write!(f, "GEN ERROR: {name}"),
            DeviceFault::BadValue(name) => write!(f, "BAD VALUE: {name}"),
            DeviceFault::ReadOnly(name) => write!(f, "READ ONLY: {name}"),
            DeviceFault::TooBig => write!(f, "TOO BIG"),
        }
    }
}

/// Communication error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed, truncated or over-long response
    #[error("Parsing error: {0}")]
    Parsing(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Checksum error, scanned: {scanned}")]
    Checksum { scanned: String },

    /// Response came from (or answered) a different address
    #[error("Drop address mismatch: expected {expected}, received {received}")]
    DropMismatch { expected: u32, received: u32 },

    #[error("Controller error: {0}")]
    Device(DeviceFault),

    /// Controller asks for a configuration download
    #[error("Download request")]
    DownloadRequest,

    #[error("Unsupported request: {0}")]
    Unsupported(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for device exchanges
pub type CommResult<T> = Result<T, CommError>;

/// How the operation engine reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Channel unusable; fail the operation and take the link down
    Link,
    /// Repeat the same phase, bounded by the protocol retry limit
    Retryable,
    /// Fail the operation without retrying
    Fault,
    /// Operation was cancelled before completion
    Cancelled,
}

impl CommError {
    pub fn parsing(msg: impl Into<String>) -> Self {
        Self::Parsing(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Build a checksum error from the raw bytes that failed the check
    pub fn checksum(scanned: &[u8]) -> Self {
        Self::Checksum {
            scanned: common::hex::format_hex_colon(scanned),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CommError::Transport(TransportError::Timeout(_)))
    }

    pub fn is_no_such_name(&self) -> bool {
        matches!(self, CommError::Device(DeviceFault::NoSuchName(_)))
    }

    pub fn kind(&self) -> ErrorKind {
        if matches!(self, CommError::Cancelled) {
            ErrorKind::Cancelled
        } else if self.is_link_failure() {
            ErrorKind::Link
        } else if self.is_retryable() {
            ErrorKind::Retryable
        } else {
            ErrorKind::Fault
        }
    }
}

impl TmsErrorTrait for CommError {
    fn error_code(&self) -> &'static str {
        match self {
            CommError::Transport(TransportError::Timeout(_)) => "TIMEOUT",
            CommError::Transport(TransportError::EndOfChannel(_)) => "END_OF_CHANNEL",
            CommError::Transport(_) => "TRANSPORT_ERROR",
            CommError::Parsing(_) => "PARSING_ERROR",
            CommError::Codec(_) => "CODEC_ERROR",
            CommError::Checksum { .. } => "CHECKSUM_ERROR",
            CommError::DropMismatch { .. } => "DROP_MISMATCH",
            CommError::Device(_) => "CONTROLLER_ERROR",
            CommError::DownloadRequest => "DOWNLOAD_REQUEST",
            CommError::Unsupported(_) => "UNSUPPORTED",
            CommError::Cancelled => "CANCELLED",
            CommError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            CommError::Transport(TransportError::Timeout(_)) => ErrorCategory::Timeout,
            CommError::Transport(TransportError::ConfigError(_)) => ErrorCategory::Configuration,
            CommError::Transport(_) => ErrorCategory::Connection,
            // a reply for another drop is treated like a garbled frame
            CommError::Parsing(_) | CommError::Codec(_) | CommError::DropMismatch { .. } => {
                ErrorCategory::Framing
            },
            CommError::Checksum { .. } => ErrorCategory::Checksum,
            CommError::Device(_) | CommError::DownloadRequest => ErrorCategory::DeviceFault,
            CommError::Unsupported(_) => ErrorCategory::Protocol,
            CommError::Cancelled => ErrorCategory::Cancelled,
            CommError::Internal(_) => ErrorCategory::Internal,
        }
    }
}
