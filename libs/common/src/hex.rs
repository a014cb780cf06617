//! Hex formatting for raw packet logs

use std::fmt::Write;

/// Encode bytes to uppercase hex string
/// Example: [0x12, 0x34, 0xAB] -> "1234AB"
pub fn encode_upper(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 2);
    for byte in data {
        // Writing to String buffer is infallible
        let _ = write!(&mut result, "{:02X}", byte);
    }
    result
}

/// Format bytes as space separated uppercase pairs
/// Example: [0x2F, 0x03, 0x00] -> "2F 03 00"
pub fn format_hex_pretty(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            result.push(' ');
        }
        let _ = write!(&mut result, "{:02X}", byte);
    }
    result
}

/// Format bytes as colon separated pairs, the form used for scanned
/// data in checksum error reports
/// Example: [0x2F, 0x03, 0x00] -> "2F:03:00"
pub fn format_hex_colon(data: &[u8]) -> String {
    format_hex_pretty(data).replace(' ', ":")
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_encode_upper() {
        assert_eq!(encode_upper(&[0x12, 0x34, 0xAB]), "1234AB");
        assert_eq!(encode_upper(&[]), "");
        assert_eq!(encode_upper(&[0x0F]), "0F");
    }

    #[test]
    fn test_format_hex_pretty() {
        assert_eq!(format_hex_pretty(&[0x2F, 0x03, 0x00]), "2F 03 00");
        assert_eq!(format_hex_pretty(&[0xFF]), "FF");
        assert_eq!(format_hex_pretty(&[]), "");
    }

    #[test]
    fn test_format_hex_colon() {
        assert_eq!(format_hex_colon(&[0x2F, 0x03, 0x00]), "2F:03:00");
    }
}
