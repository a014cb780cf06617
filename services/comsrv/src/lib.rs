//! Roadway device communication service
//!
//! Drives field controllers over serial, TCP and UDP links:
//!
//! - NTCIP 1203 dynamic message signs over SNMPv1
//! - MnDOT 170 ramp meter and detector controllers
//! - Pelco video switchers and Pelco D camera receivers
//!
//! ```text
//!   tick / commands ──► LinkPoller (one task per link, priority queue)
//!                              │
//!                              ▼
//!                   Operation phases (retry, cleanup)
//!                              │
//!                              ▼
//!                   Protocol message + properties
//!                              │
//!                              ▼
//!                   Transport (TCP / UDP / serial)
//! ```
//!
//! Results leave through a [`sink::DeviceSink`]; controller status lives in
//! the shared [`controller::ControllerRegistry`].

pub mod config;
pub mod controller;
pub mod error;
pub mod message;
pub mod operation;
pub mod poller;
pub mod priority;
pub mod property;
pub mod protocols;
pub mod reconnect;
pub mod runtime;
pub mod sink;
pub mod transport;

pub use config::AppConfig;
pub use error::{CommError, CommResult};
pub use poller::LinkPoller;
pub use runtime::CommService;
