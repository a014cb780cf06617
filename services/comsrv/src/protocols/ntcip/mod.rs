//! NTCIP 1203 dynamic message signs over SNMPv1

pub mod dms;
pub mod message;
pub mod mib;
pub mod snmp;

pub use dms::{
    DmsLampTest, DmsQueryConfiguration, DmsQueryPixelFailures, DmsSetTimeRemaining, DmsType,
    ModuleInfo, ModuleType, PixelStatus, SignConfig,
};
pub use message::SnmpMessage;
pub use mib::{MibInteger, MibOctetString, MibProperty};
