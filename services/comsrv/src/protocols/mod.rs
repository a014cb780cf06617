//! Device protocols
//!
//! - `ntcip`: NTCIP 1203 sign controllers over SNMPv1
//! - `mndot`: MnDOT 170 ramp meter / detector controllers
//! - `pelco`: Pelco video switchers and Pelco D receivers

pub mod mndot;
pub mod ntcip;
pub mod pelco;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// Protocol spoken on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommProtocol {
    Ntcip,
    /// MnDOT 170, 4-bit drop addressing
    Mndot4,
    /// MnDOT 170, 5-bit drop addressing
    Mndot5,
    PelcoSwitcher,
    PelcoD,
}

/// Protocols sharing one retry/timeout policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolFamily {
    Ntcip,
    Mndot,
    Pelco,
}

impl CommProtocol {
    pub fn family(self) -> ProtocolFamily {
        match self {
            CommProtocol::Ntcip => ProtocolFamily::Ntcip,
            CommProtocol::Mndot4 | CommProtocol::Mndot5 => ProtocolFamily::Mndot,
            CommProtocol::PelcoSwitcher | CommProtocol::PelcoD => ProtocolFamily::Pelco,
        }
    }

    /// Valid drop addresses for controllers on this protocol
    pub fn drop_range(self) -> RangeInclusive<u16> {
        match self {
            CommProtocol::Ntcip => 0..=u16::MAX,
            CommProtocol::Mndot4 => 1..=15,
            CommProtocol::Mndot5 => 1..=31,
            CommProtocol::PelcoSwitcher => 0..=u16::MAX,
            CommProtocol::PelcoD => 1..=254,
        }
    }
}

impl fmt::Display for CommProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommProtocol::Ntcip => "NTCIP",
            CommProtocol::Mndot4 => "MnDOT 170 (4-bit)",
            CommProtocol::Mndot5 => "MnDOT 170 (5-bit)",
            CommProtocol::PelcoSwitcher => "Pelco switcher",
            CommProtocol::PelcoD => "Pelco D",
        };
        f.write_str(name)
    }
}
