//! Binary coded decimal fields
//!
//! Each byte carries two decimal digits, high nibble first. 170 controllers
//! store timing values as 4-digit (16-bit) BCD and clock fields as 2-digit BCD.

use bytes::BufMut;

use crate::error::{CodecError, Result};

/// Encode 0..=99 as one BCD byte
pub fn encode_u8(value: u8) -> Result<u8> {
    if value > 99 {
        return Err(CodecError::OutOfRange(format!("{value} exceeds 2 BCD digits")));
    }
    Ok(((value / 10) << 4) | (value % 10))
}

/// Decode one BCD byte
pub fn decode_u8(octet: u8) -> Result<u8> {
    let high = octet >> 4;
    let low = octet & 0x0F;
    if high > 9 || low > 9 {
        return Err(CodecError::InvalidBcd(octet));
    }
    Ok(high * 10 + low)
}

/// Encode 0..=9999 as two BCD bytes (big-endian digit order)
pub fn encode_u16(value: u16) -> Result<[u8; 2]> {
    if value > 9999 {
        return Err(CodecError::OutOfRange(format!("{value} exceeds 4 BCD digits")));
    }
    Ok([
        encode_u8((value / 100) as u8)?,
        encode_u8((value % 100) as u8)?,
    ])
}

/// Decode two BCD bytes
pub fn decode_u16(octets: [u8; 2]) -> Result<u16> {
    Ok(u16::from(decode_u8(octets[0])?) * 100 + u16::from(decode_u8(octets[1])?))
}

/// Append a 16-bit BCD value to a buffer
pub fn put_u16(buf: &mut impl BufMut, value: u16) -> Result<()> {
    buf.put_slice(&encode_u16(value)?);
    Ok(())
}
