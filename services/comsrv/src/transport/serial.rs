//! Serial Port Transport Implementation

use async_trait::async_trait;
use common::hex::format_hex_pretty;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info};

use super::traits::{Transport, TransportError, TransportStats};

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_parity() -> String {
    "None".to_string()
}

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialTransportConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM1")
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Stop bits (1, 2)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Parity ("None", "Even", "Odd")
    #[serde(default = "default_parity")]
    pub parity: String,
    /// Flow control ("None", "Software", "Hardware")
    #[serde(default = "default_parity")]
    pub flow_control: String,
}

impl SerialTransportConfig {
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.port.is_empty() {
            return Err(TransportError::ConfigError(
                "Port cannot be empty".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(TransportError::ConfigError(
                "Baud rate must be greater than zero".to_string(),
            ));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(TransportError::ConfigError(format!(
                "Invalid data bits: {}",
                self.data_bits
            )));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(TransportError::ConfigError(format!(
                "Invalid stop bits: {}",
                self.stop_bits
            )));
        }
        if !matches!(self.parity.as_str(), "None" | "Even" | "Odd") {
            return Err(TransportError::ConfigError(format!(
                "Invalid parity: {}",
                self.parity
            )));
        }
        Ok(())
    }

    fn parity(&self) -> tokio_serial::Parity {
        match self.parity.as_str() {
            "Even" => tokio_serial::Parity::Even,
            "Odd" => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        }
    }

    fn flow_control(&self) -> tokio_serial::FlowControl {
        match self.flow_control.as_str() {
            "Software" => tokio_serial::FlowControl::Software,
            "Hardware" => tokio_serial::FlowControl::Hardware,
            _ => tokio_serial::FlowControl::None,
        }
    }

    fn data_bits(&self) -> tokio_serial::DataBits {
        match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    fn stop_bits(&self) -> tokio_serial::StopBits {
        match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }
}

/// Serial port transport implementation
#[derive(Debug)]
pub struct SerialTransport {
    config: SerialTransportConfig,
    port: Option<SerialStream>,
    timeout: Duration,
    stats: TransportStats,
}

impl SerialTransport {
    pub fn new(config: SerialTransportConfig, timeout: Duration) -> Result<Self, TransportError> {
        config.validate()?;
        Ok(Self {
            config,
            port: None,
            timeout,
            stats: TransportStats::new(),
        })
    }

    fn port_mut(&mut self) -> Result<&mut SerialStream, TransportError> {
        self.port
            .as_mut()
            .ok_or_else(|| TransportError::EndOfChannel("Serial port not open".to_string()))
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn transport_type(&self) -> &str {
        "serial"
    }

    fn name(&self) -> &str {
        &self.config.port
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        if self.port.is_some() {
            return Ok(());
        }
        self.stats.record_open_attempt();
        debug!("Opening serial port: {}", self.config.port);

        let result = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .data_bits(self.config.data_bits())
            .parity(self.config.parity())
            .stop_bits(self.config.stop_bits())
            .flow_control(self.config.flow_control())
            .timeout(self.timeout)
            .open_native_async();

        match result {
            Ok(port) => {
                #[cfg(unix)]
                let port = {
                    let mut port = port;
                    port.set_exclusive(false).map_err(|e| {
                        TransportError::ConnectionFailed(format!(
                            "Failed to set exclusive mode: {e}"
                        ))
                    })?;
                    port
                };
                self.port = Some(port);
                self.stats.record_open();
                info!("Opened serial port: {}", self.config.port);
                Ok(())
            },
            Err(e) => {
                let error_msg = format!("Failed to open serial port {}: {e}", self.config.port);
                error!("{error_msg}");
                self.stats.record_failed_open();
                Err(TransportError::ConnectionFailed(error_msg))
            },
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            self.stats.record_close();
            info!("Closed serial port: {}", self.config.port);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn drain(&mut self) -> Result<usize, TransportError> {
        let port = self.port_mut()?;
        let pending = port.bytes_to_read().unwrap_or(0) as usize;
        port.clear(ClearBuffer::Input)
            .map_err(|e| TransportError::ReceiveFailed(format!("Failed to clear input: {e}")))?;
        if pending > 0 {
            debug!("Drained {pending} stale bytes from {}", self.config.port);
            self.stats.record_drained(pending);
        }
        Ok(pending)
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let port = self.port_mut()?;
        port.write_all(data)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        port.flush()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.stats.record_bytes_sent(data.len());
        debug!("[Serial] Sent {} bytes: {}", data.len(), format_hex_pretty(data));
        Ok(data.len())
    }

    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError> {
        let receive_timeout = self.timeout;
        let port = self.port_mut()?;
        match timeout(receive_timeout, port.read(buffer)).await {
            Ok(Ok(0)) => Err(TransportError::EndOfChannel(
                "serial port returned end of stream".to_string(),
            )),
            Ok(Ok(n)) => {
                self.stats.record_bytes_received(n);
                debug!("[Serial] Received {n} bytes: {}", format_hex_pretty(&buffer[..n]));
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
