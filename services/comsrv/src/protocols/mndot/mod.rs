//! MnDOT 170 controller protocol (4-bit and 5-bit drop addressing)

pub mod address;
pub mod message;
pub mod ops;
pub mod property;

pub use message::{Category, MndotMessage, MndotProperty};
pub use ops::{
    OpLevel1Restart, OpQueryPromVersion, OpQuerySamples30Sec, OpSendBeaconState, OpSetRedTime,
    OpSynchronizeClock, SampleData,
};
pub use property::{Level1Restart, MemoryProperty, SynchronizeClock};
