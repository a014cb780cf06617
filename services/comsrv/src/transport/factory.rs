//! Transport Factory
//!
//! Builds the byte channel of a link from its configuration section.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use super::serial::{SerialTransport, SerialTransportConfig};
use super::tcp::{TcpTransport, TcpTransportConfig};
use super::traits::{Transport, TransportError};
use super::udp::{UdpTransport, UdpTransportConfig};

/// Transport section of a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkTransportConfig {
    Tcp(TcpTransportConfig),
    Udp(UdpTransportConfig),
    Serial(SerialTransportConfig),
}

impl LinkTransportConfig {
    pub fn validate(&self) -> Result<(), TransportError> {
        match self {
            LinkTransportConfig::Tcp(config) => config.validate(),
            LinkTransportConfig::Udp(config) => config.validate(),
            LinkTransportConfig::Serial(config) => config.validate(),
        }
    }
}

impl fmt::Display for LinkTransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkTransportConfig::Tcp(config) => write!(f, "tcp://{}:{}", config.host, config.port),
            LinkTransportConfig::Udp(config) => write!(f, "udp://{}:{}", config.host, config.port),
            LinkTransportConfig::Serial(config) => {
                write!(f, "serial://{}@{}", config.port, config.baud_rate)
            },
        }
    }
}

/// Create an unopened transport for a link
pub fn create_transport(
    config: &LinkTransportConfig,
    timeout: Duration,
) -> Result<Box<dyn Transport>, TransportError> {
    debug!("Creating transport {config}");
    let transport: Box<dyn Transport> = match config {
        LinkTransportConfig::Tcp(tcp) => Box::new(TcpTransport::new(tcp.clone(), timeout)?),
        LinkTransportConfig::Udp(udp) => Box::new(UdpTransport::new(udp.clone(), timeout)?),
        LinkTransportConfig::Serial(serial) => {
            Box::new(SerialTransport::new(serial.clone(), timeout)?)
        },
    };
    Ok(transport)
}
