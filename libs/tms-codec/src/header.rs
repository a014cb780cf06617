//! Drop address / category header byte
//!
//! 170 controller frames start with one byte carrying the drop address in
//! the high bits and a category (request) or status (response) in the low
//! bits. The split depends on the protocol revision.

use crate::error::{CodecError, Result};

/// Bit layout of the header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropAddressing {
    /// 4-bit drop, 4-bit category
    FourBit,
    /// 5-bit drop, 3-bit category
    FiveBit,
}

impl DropAddressing {
    fn shift(self) -> u8 {
        match self {
            DropAddressing::FourBit => 4,
            DropAddressing::FiveBit => 3,
        }
    }

    fn low_mask(self) -> u8 {
        match self {
            DropAddressing::FourBit => 0x0F,
            DropAddressing::FiveBit => 0x07,
        }
    }

    /// Highest addressable drop
    pub fn max_drop(self) -> u8 {
        0xFF >> self.shift()
    }

    /// Highest category / status code
    pub fn max_code(self) -> u8 {
        self.low_mask()
    }

    pub fn is_valid_drop(self, drop: u8) -> bool {
        (1..=self.max_drop()).contains(&drop)
    }

    /// Pack a drop address and category into a header byte
    pub fn pack(self, drop: u8, code: u8) -> Result<u8> {
        if !self.is_valid_drop(drop) {
            return Err(CodecError::OutOfRange(format!(
                "drop {drop} not in 1..={}",
                self.max_drop()
            )));
        }
        if code > self.max_code() {
            return Err(CodecError::OutOfRange(format!(
                "code {code} exceeds {}",
                self.max_code()
            )));
        }
        Ok((drop << self.shift()) | code)
    }

    /// Split a header byte into (drop, category/status)
    pub fn unpack(self, header: u8) -> (u8, u8) {
        (header >> self.shift(), header & self.low_mask())
    }
}
