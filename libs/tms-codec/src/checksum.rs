//! Single byte checksums

/// XOR of all bytes (170 controller frames)
pub fn xor8(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, &b| acc ^ b)
}

/// Sum of all bytes modulo 256 (Pelco D frames)
pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor8() {
        assert_eq!(xor8(&[]), 0);
        assert_eq!(xor8(&[0x2F, 0x03, 0x01, 0x00, 0x18]), 0x35);
        // Appending the checksum always yields zero
        let frame = [0x2F, 0x03, 0x01, 0x00, 0x18];
        let mut with_sum = frame.to_vec();
        with_sum.push(xor8(&frame));
        assert_eq!(xor8(&with_sum), 0);
    }

    #[test]
    fn test_sum8_wraps() {
        assert_eq!(sum8(&[0xFF, 0x02]), 0x01);
        assert_eq!(sum8(&[0x01, 0x00, 0x02, 0x20, 0x00]), 0x23);
    }
}
