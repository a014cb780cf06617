//! Transport Layer Traits
//!
//! A transport is the byte channel of one communication link. It is owned by
//! the link's poller task, so every method takes `&mut self` and no internal
//! locking is needed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Transport layer error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Opening the channel failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Peer closed the channel (or the channel was never opened)
    #[error("End of channel: {0}")]
    EndOfChannel(String),

    /// Send operation failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Receive operation failed
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// No data within the configured timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl TransportError {
    /// True when the channel itself is unusable and must be reopened
    pub fn is_link_failure(&self) -> bool {
        !matches!(self, TransportError::Timeout(_))
    }
}

/// Connection state for transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
    Error,
}

/// Transport statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Bytes discarded by `drain`
    pub bytes_drained: u64,
    pub open_attempts: u64,
    pub successful_opens: u64,
    pub failed_opens: u64,
    pub closes: u64,
    pub last_open: Option<SystemTime>,
    pub state: ConnectionState,
}

impl TransportStats {
    pub fn new() -> Self {
        Self {
            bytes_sent: 0,
            bytes_received: 0,
            bytes_drained: 0,
            open_attempts: 0,
            successful_opens: 0,
            failed_opens: 0,
            closes: 0,
            last_open: None,
            state: ConnectionState::Closed,
        }
    }

    pub fn record_open_attempt(&mut self) {
        self.open_attempts += 1;
        self.state = ConnectionState::Opening;
    }

    pub fn record_open(&mut self) {
        self.successful_opens += 1;
        self.last_open = Some(SystemTime::now());
        self.state = ConnectionState::Open;
    }

    pub fn record_failed_open(&mut self) {
        self.failed_opens += 1;
        self.state = ConnectionState::Error;
    }

    pub fn record_close(&mut self) {
        self.closes += 1;
        self.state = ConnectionState::Closed;
    }

    pub fn record_bytes_sent(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
    }

    pub fn record_bytes_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
    }

    pub fn record_drained(&mut self, bytes: usize) {
        self.bytes_drained += bytes as u64;
    }
}

impl Default for TransportStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte channel of one communication link
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Get transport type identifier
    fn transport_type(&self) -> &str;

    /// Get human-readable endpoint description
    fn name(&self) -> &str;

    /// Open the channel
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Close the channel; closing a closed channel is a no-op
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the channel is open
    fn is_open(&self) -> bool;

    /// Set the receive timeout used by `receive`
    fn set_timeout(&mut self, timeout: Duration);

    /// Current receive timeout
    fn timeout(&self) -> Duration;

    /// Discard any bytes already buffered on the input side
    ///
    /// Returns the number of discarded bytes when the channel can tell.
    async fn drain(&mut self) -> Result<usize, TransportError>;

    /// Send a complete request
    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Receive at least one byte into `buffer`
    ///
    /// Fails with `Timeout` when nothing arrives within the configured
    /// timeout and with `EndOfChannel` when the peer closed the channel.
    /// Never returns `Ok(0)`.
    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError>;

    /// Fill `buffer` completely
    async fn read_exact(&mut self, buffer: &mut [u8]) -> Result<(), TransportError> {
        let mut filled = 0;
        while filled < buffer.len() {
            filled += self.receive(&mut buffer[filled..]).await?;
        }
        Ok(())
    }

    /// Get transport statistics
    fn stats(&self) -> TransportStats;
}

/// Implementation of Transport trait for Box<dyn Transport>
#[async_trait]
impl Transport for Box<dyn Transport> {
    fn transport_type(&self) -> &str {
        self.as_ref().transport_type()
    }

    fn name(&self) -> &str {
        self.as_ref().name()
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        self.as_mut().open().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.as_mut().close().await
    }

    fn is_open(&self) -> bool {
        self.as_ref().is_open()
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.as_mut().set_timeout(timeout)
    }

    fn timeout(&self) -> Duration {
        self.as_ref().timeout()
    }

    async fn drain(&mut self) -> Result<usize, TransportError> {
        self.as_mut().drain().await
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.as_mut().send(data).await
    }

    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError> {
        self.as_mut().receive(buffer).await
    }

    async fn read_exact(&mut self, buffer: &mut [u8]) -> Result<(), TransportError> {
        self.as_mut().read_exact(buffer).await
    }

    fn stats(&self) -> TransportStats {
        self.as_ref().stats()
    }
}
