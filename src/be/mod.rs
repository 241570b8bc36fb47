//! Big-endian reads and writes at an absolute offset.  Callers keep
//! `offset + width` inside the buffer; anything else panics.

use byteorder::{BigEndian, ByteOrder};

const UNIT: usize = 2;

#[inline]
pub fn read_u64(buf: &[u8], offset: usize) -> u64 {
    BigEndian::read_u64(&buf[offset..offset + 8])
}

#[inline]
pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
    BigEndian::read_u32(&buf[offset..offset + 4])
}

#[inline]
pub fn read_u16(buf: &[u8], offset: usize) -> u16 {
    BigEndian::read_u16(&buf[offset..offset + 2])
}

#[inline]
pub fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    BigEndian::write_u64(&mut buf[offset..offset + 8], value);
}

#[inline]
pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    BigEndian::write_u32(&mut buf[offset..offset + 4], value);
}

#[inline]
pub fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    BigEndian::write_u16(&mut buf[offset..offset + 2], value);
}

/// Stops at the first NUL unit.  Unpaired surrogates decode to U+FFFD.
pub fn read_fixed_utf16_string(buf: &[u8], offset: usize, max_chars: usize) -> String {
    let units: Vec<u16> = (0..max_chars)
        .map(|i| read_u16(buf, offset + i * UNIT))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Clears the whole field first; long text is cut at a code-unit boundary.
pub fn write_fixed_utf16_string(buf: &mut [u8], offset: usize, max_chars: usize, text: &str) {
    buf[offset..offset + max_chars * UNIT].fill(0);
    for (i, unit) in text.encode_utf16().take(max_chars).enumerate() {
        write_u16(buf, offset + i * UNIT, unit);
    }
}
