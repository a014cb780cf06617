//! TCP Transport Implementation

use async_trait::async_trait;
use common::hex::format_hex_pretty;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::traits::{Transport, TransportError, TransportStats};

fn default_connect_timeout_ms() -> u64 {
    5000
}

/// TCP transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpTransportConfig {
    /// Remote host address
    pub host: String,
    /// Remote port number
    pub port: u16,
    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl TcpTransportConfig {
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.host.is_empty() {
            return Err(TransportError::ConfigError(
                "Host cannot be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(TransportError::ConfigError(
                "Port cannot be zero".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(TransportError::ConfigError(
                "Connect timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// TCP transport implementation
#[derive(Debug)]
pub struct TcpTransport {
    config: TcpTransportConfig,
    address: String,
    stream: Option<TcpStream>,
    timeout: Duration,
    stats: TransportStats,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig, timeout: Duration) -> Result<Self, TransportError> {
        config.validate()?;
        let address = config.address();
        Ok(Self {
            config,
            address,
            stream: None,
            timeout,
            stats: TransportStats::new(),
        })
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream
            .as_mut()
            .ok_or_else(|| TransportError::EndOfChannel("TCP stream not open".to_string()))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn transport_type(&self) -> &str {
        "tcp"
    }

    fn name(&self) -> &str {
        &self.address
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.stats.record_open_attempt();
        debug!("Connecting to TCP endpoint: {}", self.address);

        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        match timeout(connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY: {e}");
                }
                self.stream = Some(stream);
                self.stats.record_open();
                info!("Connected to {}", self.address);
                Ok(())
            },
            Ok(Err(e)) => {
                self.stats.record_failed_open();
                Err(TransportError::ConnectionFailed(format!(
                    "{}: {e}",
                    self.address
                )))
            },
            Err(_) => {
                self.stats.record_failed_open();
                Err(TransportError::ConnectionFailed(format!(
                    "{}: connect timed out after {connect_timeout:?}",
                    self.address
                )))
            },
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("TCP shutdown {}: {e}", self.address);
            }
            self.stats.record_close();
            info!("Closed TCP connection to {}", self.address);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn drain(&mut self) -> Result<usize, TransportError> {
        let address = self.address.clone();
        let stream = self.stream_mut()?;
        let mut scratch = [0u8; 256];
        let mut drained = 0;
        loop {
            match stream.try_read(&mut scratch) {
                Ok(0) => {
                    return Err(TransportError::EndOfChannel(format!(
                        "{address}: peer closed connection"
                    )))
                },
                Ok(n) => drained += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(TransportError::ReceiveFailed(e.to_string())),
            }
        }
        if drained > 0 {
            debug!("Drained {drained} stale bytes from {address}");
            self.stats.record_drained(drained);
        }
        Ok(drained)
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let stream = self.stream_mut()?;
        match stream.write_all(data).await {
            Ok(()) => {
                self.stats.record_bytes_sent(data.len());
                debug!("[TCP] Sent {} bytes: {}", data.len(), format_hex_pretty(data));
                Ok(data.len())
            },
            Err(e) => Err(TransportError::SendFailed(e.to_string())),
        }
    }

    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError> {
        let receive_timeout = self.timeout;
        let stream = self.stream_mut()?;
        match timeout(receive_timeout, stream.read(buffer)).await {
            Ok(Ok(0)) => Err(TransportError::EndOfChannel(
                "peer closed connection".to_string(),
            )),
            Ok(Ok(n)) => {
                self.stats.record_bytes_received(n);
                debug!("[TCP] Received {n} bytes: {}", format_hex_pretty(&buffer[..n]));
                Ok(n)
            },
            Ok(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            Err(_) => Err(TransportError::Timeout(format!(
                "no data within {receive_timeout:?}"
            ))),
        }
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
