//! 170 controller properties

use bytes::{BufMut, BytesMut};
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::fmt;
use tms_codec::bcd;

use super::message::{Category, MndotProperty};
use crate::error::{CommError, CommResult};
use crate::property::ControllerProperty;

/// Controller memory block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryProperty {
    address: u16,
    len: u8,
    data: Vec<u8>,
}

impl MemoryProperty {
    /// Read `len` bytes at `address`
    pub fn read(address: u16, len: u8) -> Self {
        Self {
            address,
            len,
            data: Vec::new(),
        }
    }

    /// Write `data` at `address`
    pub fn write(address: u16, data: Vec<u8>) -> Self {
        Self {
            address,
            len: data.len().min(usize::from(u8::MAX)) as u8,
            data,
        }
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Display for MemoryProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory {:#06X} ({} bytes)", self.address, self.len)
    }
}

impl ControllerProperty for MemoryProperty {
    fn encode_query(&self, buf: &mut BytesMut) -> CommResult<()> {
        buf.put_u16(self.address);
        buf.put_u8(self.len);
        Ok(())
    }

    fn decode_query(&mut self, body: &[u8]) -> CommResult<()> {
        if body.len() != usize::from(self.len) {
            return Err(CommError::parsing(format!(
                "{self}: received {} bytes",
                body.len()
            )));
        }
        self.data = body.to_vec();
        Ok(())
    }

    fn encode_store(&self, buf: &mut BytesMut) -> CommResult<()> {
        if self.data.len() > usize::from(u8::MAX) - 2 {
            return Err(CommError::internal(format!("{self}: too much data")));
        }
        buf.put_u16(self.address);
        buf.put_slice(&self.data);
        Ok(())
    }
}

impl MndotProperty for MemoryProperty {}

/// Controller clock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynchronizeClock {
    time: NaiveDateTime,
}

impl SynchronizeClock {
    pub fn new(time: NaiveDateTime) -> Self {
        Self { time }
    }
}

impl fmt::Display for SynchronizeClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "synchronize clock {}", self.time.format("%Y-%m-%d %H:%M:%S"))
    }
}

impl ControllerProperty for SynchronizeClock {
    /// BCD month, day, year (2 digits), hour, minute, second
    fn encode_store(&self, buf: &mut BytesMut) -> CommResult<()> {
        let fields = [
            self.time.month(),
            self.time.day(),
            self.time.year().rem_euclid(100) as u32,
            self.time.hour(),
            self.time.minute(),
            self.time.second(),
        ];
        for field in fields {
            buf.put_u8(bcd::encode_u8(field as u8)?);
        }
        Ok(())
    }
}

impl MndotProperty for SynchronizeClock {
    fn store_category(&self) -> Category {
        Category::SynchronizeClock
    }
}

/// Controller restart
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Level1Restart;

impl fmt::Display for Level1Restart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("level 1 restart")
    }
}

impl ControllerProperty for Level1Restart {
    fn encode_store(&self, _buf: &mut BytesMut) -> CommResult<()> {
        Ok(())
    }
}

impl MndotProperty for Level1Restart {
    fn store_category(&self) -> Category {
        Category::Level1Restart
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_memory_bodies() {
        let mut prop = MemoryProperty::read(0x0300, 2);
        let mut buf = BytesMut::new();
        prop.encode_query(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x03, 0x00, 0x02]);
        assert!(prop.decode_query(&[1]).is_err());
        prop.decode_query(&[1, 2]).unwrap();
        assert_eq!(prop.data(), &[1, 2]);

        let store = MemoryProperty::write(0x014A, vec![0x00, 0x45]);
        let mut buf = BytesMut::new();
        store.encode_store(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x01, 0x4A, 0x00, 0x45]);
        assert_eq!(store.to_string(), "memory 0x014A (2 bytes)");
    }

    #[test]
    fn test_clock_bcd() {
        let time = NaiveDate::from_ymd_opt(2024, 11, 3)
            .unwrap()
            .and_hms_opt(17, 45, 9)
            .unwrap();
        let prop = SynchronizeClock::new(time);
        let mut buf = BytesMut::new();
        prop.encode_store(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x11, 0x03, 0x24, 0x17, 0x45, 0x09]);
        assert_eq!(prop.store_category(), Category::SynchronizeClock);
    }

    #[test]
    fn test_restart_is_empty() {
        let mut buf = BytesMut::new();
        Level1Restart.encode_store(&mut buf).unwrap();
        assert!(buf.is_empty());
        assert_eq!(Level1Restart.store_category(), Category::Level1Restart);
        assert_eq!(MemoryProperty::read(0, 1).query_category(), Category::ReadMemory);
    }
}
