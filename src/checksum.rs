//! Trailer checksums used by the console's save files.
//!
//! * Mii database: CRC-16/XMODEM (poly `0x1021`, init `0`, no reflection).
//! * Game save: standard reflected CRC-32, the same one `crc32fast` computes.

use crc32fast::Hasher;

const CRC16_POLY: u16 = 0x1021;

/// CRC-16/XMODEM over `data`.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |mut crc, &byte| {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ CRC16_POLY } else { crc << 1 };
        }
        crc
    })
}

/// CRC-32 (IEEE, reflected) over `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_check_value() {
        assert_eq!(crc16_xmodem(b"123456789"), 0x31C3);
        assert_eq!(crc16_xmodem(&[]), 0);
    }

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }
}
