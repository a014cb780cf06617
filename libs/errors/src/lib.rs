//! Unified error handling for roadway device communication services
//!
//! Service-level failures (configuration, startup, lookups) use [`TmsError`].
//! Layer-specific error enums keep their own variants and expose a common
//! interface by implementing [`TmsErrorTrait`].

use thiserror::Error;

// ============================================================================
// TmsError - Service level error type
// ============================================================================

/// Main error type for service bootstrap and configuration
#[derive(Debug, Error)]
pub enum TmsError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ======================================
    // Communication Errors
    // ======================================
    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    // ======================================
    // Resource Errors
    // ======================================
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Conflict: {resource} already exists")]
    Conflict { resource: String },

    // ======================================
    // System Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using [`TmsError`]
pub type TmsResult<T> = Result<T, TmsError>;

impl TmsError {
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }
}

impl From<serde_json::Error> for TmsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON: {err}"))
    }
}

impl From<serde_yaml::Error> for TmsError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(format!("YAML: {err}"))
    }
}

impl TmsErrorTrait for TmsError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIG_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::MissingConfig(_) => "MISSING_CONFIG",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::Timeout(_) => "TIMEOUT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Other(_) => "UNKNOWN_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } | Self::MissingConfig(_) => {
                ErrorCategory::Configuration
            },
            Self::ConnectionFailed { .. } => ErrorCategory::Connection,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => ErrorCategory::Internal,
            Self::Other(_) => ErrorCategory::Unknown,
        }
    }
}

// ============================================================================
// Error Trait - Architectural layer
// ============================================================================

/// Error category enum - used for classification and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    // Infrastructure layer
    Configuration,
    Connection,
    Timeout,

    // Wire layer
    Framing,
    Checksum,
    Protocol,

    // Device layer
    DeviceFault,

    // Lookup layer
    NotFound,
    Conflict,

    // System level
    Cancelled,
    Internal,
    Unknown,
}

/// Common error capability trait
///
/// Each layer keeps its own error enum and gains a common interface for
/// logging and retry classification by implementing this trait.
pub trait TmsErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Stable error code for logs
    fn error_code(&self) -> &'static str;

    /// Error category
    fn category(&self) -> ErrorCategory;

    /// Whether repeating the same exchange may succeed
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Timeout | ErrorCategory::Framing | ErrorCategory::Checksum
        )
    }

    /// Whether the underlying link should be considered down
    fn is_link_failure(&self) -> bool {
        matches!(self.category(), ErrorCategory::Connection)
    }

    /// Get log level
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Unknown => Level::ERROR,
            ErrorCategory::Connection
            | ErrorCategory::Timeout
            | ErrorCategory::Framing
            | ErrorCategory::Checksum
            | ErrorCategory::Protocol
            | ErrorCategory::DeviceFault => Level::WARN,
            ErrorCategory::Cancelled | ErrorCategory::NotFound => Level::INFO,
            _ => Level::WARN,
        }
    }
}
