//! Bounds-checked big-endian reads
//!
//! `bytes::Buf` panics on underflow; device responses are untrusted, so every
//! read here reports a short buffer as `CodecError::InvalidLength`.

use crate::error::{CodecError, Result};

/// Cursor over a big-endian byte payload
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if count > self.remaining() {
            return Err(CodecError::InvalidLength {
                needed: count,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Require that the payload was consumed exactly
    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(CodecError::InvalidLength {
                needed: self.pos,
                available: self.data.len(),
            });
        }
        Ok(())
    }
}
