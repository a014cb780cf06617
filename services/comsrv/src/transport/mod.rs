//! Transport Layer Module
//!
//! Byte channels beneath the protocol messages. Each link owns exactly one
//! transport; protocol code only sees the [`Transport`] trait.
//!
//! ```text
//!   Protocol message (SNMP / MnDOT 170 / Pelco)
//!                     │
//!                     ▼
//!   Transport: open, close, drain, send, receive
//!                     │
//!       ┌─────────────┼─────────────┐
//!       ▼             ▼             ▼
//!      TCP           UDP          Serial
//! ```

pub mod factory;
pub mod mock;
pub mod serial;
pub mod tcp;
pub mod traits;
pub mod udp;

pub use factory::{create_transport, LinkTransportConfig};
pub use mock::{MockResponse, MockTransport};
pub use traits::{ConnectionState, Transport, TransportError, TransportStats};
