//! Pelco video switchers and Pelco D camera receivers

pub mod message;
pub mod pelco_d;
pub mod switcher;

pub use message::{PelcoMessage, PelcoProperty};
pub use pelco_d::{OpPtzCommand, PtzCommand};
pub use switcher::{OpSelectMonitorCamera, SelectCamera, SelectMonitor};
