//! Shared service utilities
//!
//! Provides basic functions shared by the communication services, including:
//! - logging initialization
//! - configuration file loading
//! - shutdown signal handling
//! - hex formatting for raw packet logs

pub mod config_loader;
pub mod hex;
pub mod logging;
pub mod shutdown;

pub use config_loader::load_config;
pub use logging::{init_logging, LoggingConfig};

// Re-export common dependencies
pub use tokio;
pub use tokio_util::sync::CancellationToken;
