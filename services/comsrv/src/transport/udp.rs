//! UDP Transport Implementation
//!
//! SNMP devices are usually reached over UDP. Datagrams are buffered so the
//! receive side can be read as a byte stream like the other transports.

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use common::hex::format_hex_pretty;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info};

use super::traits::{Transport, TransportError, TransportStats};

const MAX_DATAGRAM: usize = 65_507;

/// UDP transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpTransportConfig {
    pub host: String,
    pub port: u16,
}

impl UdpTransportConfig {
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
        Ok(())
    }
}

#[derive(Debug)]
pub struct UdpTransport {
    address: String,
    socket: Option<UdpSocket>,
    pending: BytesMut,
    timeout: Duration,
    stats: TransportStats,
}

impl UdpTransport {
    pub fn new(config: UdpTransportConfig, timeout: Duration) -> Result<Self, TransportError> {
        config.validate()?;
        Ok(Self {
            address: format!("{}:{}", config.host, config.port),
            socket: None,
            pending: BytesMut::new(),
            timeout,
            stats: TransportStats::new(),
        })
    }

    fn take_pending(&mut self, buffer: &mut [u8]) -> usize {
        let n = buffer.len().min(self.pending.len());
        buffer[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        n
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn transport_type(&self) -> &str {
        "udp"
    }

    fn name(&self) -> &str {
        &self.address
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        if self.socket.is_some() {
            return Ok(());
        }
        self.stats.record_open_attempt();
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(socket) => socket,
            Err(e) => {
                self.stats.record_failed_open();
                return Err(TransportError::ConnectionFailed(e.to_string()));
            },
        };
        if let Err(e) = socket.connect(&self.address).await {
            self.stats.record_failed_open();
            return Err(TransportError::ConnectionFailed(format!(
                "{}: {e}",
                self.address
            )));
        }
        self.socket = Some(socket);
        self.pending.clear();
        self.stats.record_open();
        info!("UDP socket bound for {}", self.address);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.socket.take().is_some() {
            self.pending.clear();
            self.stats.record_close();
            info!("Closed UDP socket for {}", self.address);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn drain(&mut self) -> Result<usize, TransportError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| TransportError::EndOfChannel("UDP socket not open".to_string()))?;
        let mut drained = self.pending.len();
        let mut scratch = vec![0u8; MAX_DATAGRAM];
        loop {
            match socket.try_recv(&mut scratch) {
                Ok(n) => drained += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(TransportError::ReceiveFailed(e.to_string())),
            }
        }
        self.pending.clear();
        if drained > 0 {
            debug!("Drained {drained} stale bytes from {}", self.address);
            self.stats.record_drained(drained);
        }
        Ok(drained)
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| TransportError::EndOfChannel("UDP socket not open".to_string()))?;
        let sent = socket
            .send(data)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.stats.record_bytes_sent(sent);
        debug!("[UDP] Sent {sent} bytes: {}", format_hex_pretty(data));
        Ok(sent)
    }

    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError> {
        if !self.pending.is_empty() {
            return Ok(self.take_pending(buffer));
        }
        let receive_timeout = self.timeout;
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| TransportError::EndOfChannel("UDP socket not open".to_string()))?;
        let mut datagram = vec![0u8; MAX_DATAGRAM];
        let n = match timeout(receive_timeout, socket.recv(&mut datagram)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
            Err(_) => {
                return Err(TransportError::Timeout(format!(
                    "no datagram within {receive_timeout:?}"
                )))
            },
        };
        if n == 0 {
            return Err(TransportError::ReceiveFailed("empty datagram".to_string()));
        }
        self.stats.record_bytes_received(n);
        debug!("[UDP] Received {n} bytes: {}", format_hex_pretty(&datagram[..n]));
        self.pending.extend_from_slice(&datagram[..n]);
        Ok(self.take_pending(buffer))
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
