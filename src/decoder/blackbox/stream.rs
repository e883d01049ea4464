//! Byte-level readers for blackbox field encodings
//!
//! All variable-byte integers are little-endian base-128; signed variants
//! are zig-zag encoded.

use crate::error::{FlightLogError, Result};

/// Field encodings named in `H Field <x> encoding:` headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    SignedVb,
    UnsignedVb,
    Neg14Bit,
    Tag8_8Svb,
    Tag2_3S32,
    Tag8_4S16,
    Null,
}

impl Encoding {
    /// Header number to encoding; unknown numbers read as nothing
    pub fn from_number(n: i64) -> Self {
        match n {
            0 => Encoding::SignedVb,
            1 => Encoding::UnsignedVb,
            3 => Encoding::Neg14Bit,
            6 => Encoding::Tag8_8Svb,
            7 => Encoding::Tag2_3S32,
            8 => Encoding::Tag8_4S16,
            _ => Encoding::Null,
        }
    }
}

/// Cursor over one log entry's frame data
#[derive(Debug, Clone)]
pub struct ByteStream<'a> {
    data: &'a [u8],
    pos: usize,
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

fn zigzag_decode(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

impl<'a> ByteStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let b = self
            .data
            .get(self.pos)
            .copied()
            .ok_or_else(|| FlightLogError::Truncated(format!("frame data ends at byte {}", self.pos)))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_unsigned_vb(&mut self) -> Result<u32> {
        let mut result: u32 = 0;
        for i in 0..5 {
            let b = self.read_byte()?;
            result |= ((b & 0x7F) as u32) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(result);
            }
        }
        // Five bytes without a terminator is corrupt data, not a valid value
        Err(FlightLogError::Truncated(format!("overlong variable-byte value at {}", self.pos)))
    }

    pub fn read_signed_vb(&mut self) -> Result<i32> {
        Ok(zigzag_decode(self.read_unsigned_vb()?))
    }

    pub fn read_neg_14bit(&mut self) -> Result<i32> {
        Ok(-sign_extend(self.read_unsigned_vb()?, 14))
    }

    /// Up to 8 signed VB values gated by a header bitmap (a single field
    /// has no header byte)
    pub fn read_tag8_8svb(&mut self, count: usize) -> Result<Vec<i32>> {
        let mut values = vec![0; count];
        if count == 1 {
            values[0] = self.read_signed_vb()?;
            return Ok(values);
        }
        let mut header = self.read_byte()?;
        for value in values.iter_mut() {
            if header & 0x01 != 0 {
                *value = self.read_signed_vb()?;
            }
            header >>= 1;
        }
        Ok(values)
    }

    /// Three values packed as 2, 4, 6 or 8-32 bit fields selected by the
    /// top two bits of the lead byte
    pub fn read_tag2_3s32(&mut self) -> Result<[i32; 3]> {
        let lead = self.read_byte()?;
        let mut values = [0i32; 3];

        match lead >> 6 {
            0 => {
                values[0] = sign_extend(((lead >> 4) & 0x03) as u32, 2);
                values[1] = sign_extend(((lead >> 2) & 0x03) as u32, 2);
                values[2] = sign_extend((lead & 0x03) as u32, 2);
            }
            1 => {
                values[0] = sign_extend((lead & 0x0F) as u32, 4);
                let b = self.read_byte()?;
                values[1] = sign_extend((b >> 4) as u32, 4);
                values[2] = sign_extend((b & 0x0F) as u32, 4);
            }
            2 => {
                values[0] = sign_extend((lead & 0x3F) as u32, 6);
                values[1] = sign_extend((self.read_byte()? & 0x3F) as u32, 6);
                values[2] = sign_extend((self.read_byte()? & 0x3F) as u32, 6);
            }
            _ => {
                let mut selector = lead;
                for value in values.iter_mut() {
                    *value = match selector & 0x03 {
                        0 => sign_extend(self.read_byte()? as u32, 8),
                        1 => {
                            let b = [self.read_byte()?, self.read_byte()?];
                            sign_extend(u16::from_le_bytes(b) as u32, 16)
                        }
                        2 => {
                            let b = [self.read_byte()?, self.read_byte()?, self.read_byte()?, 0];
                            sign_extend(u32::from_le_bytes(b), 24)
                        }
                        _ => {
                            let b = [self.read_byte()?, self.read_byte()?, self.read_byte()?, self.read_byte()?];
                            i32::from_le_bytes(b)
                        }
                    };
                    selector >>= 2;
                }
            }
        }
        Ok(values)
    }

    /// Four values of 0, 4, 8 or 16 bits, nibble-packed (data version 2)
    pub fn read_tag8_4s16(&mut self) -> Result<[i32; 4]> {
        let mut selector = self.read_byte()?;
        let mut values = [0i32; 4];
        let mut nibble_index = 0;
        let mut buffer: u8 = 0;

        for value in values.iter_mut() {
            *value = match selector & 0x03 {
                0 => 0,
                1 => {
                    if nibble_index == 0 {
                        buffer = self.read_byte()?;
                        nibble_index = 1;
                        sign_extend((buffer >> 4) as u32, 4)
                    } else {
                        nibble_index = 0;
                        sign_extend((buffer & 0x0F) as u32, 4)
                    }
                }
                2 => {
                    if nibble_index == 0 {
                        sign_extend(self.read_byte()? as u32, 8)
                    } else {
                        let hi = buffer << 4;
                        buffer = self.read_byte()?;
                        sign_extend((hi | (buffer >> 4)) as u32, 8)
                    }
                }
                _ => {
                    if nibble_index == 0 {
                        let c1 = self.read_byte()? as u32;
                        let c2 = self.read_byte()? as u32;
                        sign_extend((c1 << 8) | c2, 16)
                    } else {
                        let c1 = self.read_byte()? as u32;
                        let c2 = self.read_byte()?;
                        let v = ((buffer as u32) << 12) | (c1 << 4) | ((c2 >> 4) as u32);
                        buffer = c2;
                        sign_extend(v & 0xFFFF, 16)
                    }
                }
            };
            selector >>= 2;
        }
        Ok(values)
    }

    /// Read a NUL-terminated string, or up to the end of data
    pub fn read_cstring(&mut self, max: usize) -> String {
        let rest = self.remaining();
        let len = rest.iter().take(max).position(|&b| b == 0).unwrap_or(rest.len().min(max));
        let s = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += (len + 1).min(rest.len());
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsigned_vb() {
        let mut s = ByteStream::new(&[0x05, 0xAC, 0x02]);
        assert_eq!(s.read_unsigned_vb().unwrap(), 5);
        assert_eq!(s.read_unsigned_vb().unwrap(), 300);
        assert!(s.is_eof());
    }

    #[test]
    fn test_signed_vb_zigzag() {
        let mut s = ByteStream::new(&[0x00, 0x01, 0x02, 0x03]);
        assert_eq!(s.read_signed_vb().unwrap(), 0);
        assert_eq!(s.read_signed_vb().unwrap(), -1);
        assert_eq!(s.read_signed_vb().unwrap(), 1);
        assert_eq!(s.read_signed_vb().unwrap(), -2);
    }

    #[test]
    fn test_truncated_read_is_error() {
        let mut s = ByteStream::new(&[0x80]);
        assert!(matches!(s.read_unsigned_vb(), Err(FlightLogError::Truncated(_))));
    }

    #[test]
    fn test_neg_14bit() {
        let mut s = ByteStream::new(&[0x0A]);
        assert_eq!(s.read_neg_14bit().unwrap(), -10);
        // 0x3FFF is -1 in 14 bits, negated to 1
        let mut s = ByteStream::new(&[0xFF, 0x7F]);
        assert_eq!(s.read_neg_14bit().unwrap(), 1);
    }

    #[test]
    fn test_tag8_8svb() {
        // header 0b101: fields 0 and 2 present
        let mut s = ByteStream::new(&[0x05, 0x02, 0x03]);
        assert_eq!(s.read_tag8_8svb(3).unwrap(), vec![1, 0, -2]);

        let mut single = ByteStream::new(&[0x04]);
        assert_eq!(single.read_tag8_8svb(1).unwrap(), vec![2], "Single field has no header");
    }

    #[test]
    fn test_tag2_3s32_small_fields() {
        // 2-bit: 01 11 10 -> 1, -1, -2
        let mut s = ByteStream::new(&[0b00_01_11_10]);
        assert_eq!(s.read_tag2_3s32().unwrap(), [1, -1, -2]);

        // 4-bit: 0x7, then 0x8 and 0x1 -> 7, -8, 1
        let mut s = ByteStream::new(&[0b01_00_0111, 0x81]);
        assert_eq!(s.read_tag2_3s32().unwrap(), [7, -8, 1]);
    }

    #[test]
    fn test_tag2_3s32_wide_fields() {
        // selectors: field0 8-bit, field1 16-bit, field2 32-bit
        let lead = 0b11_11_01_00u8;
        let mut data = vec![lead, 0xFE];
        data.extend_from_slice(&(-300i16).to_le_bytes());
        data.extend_from_slice(&100_000i32.to_le_bytes());
        let mut s = ByteStream::new(&data);
        assert_eq!(s.read_tag2_3s32().unwrap(), [-2, -300, 100_000]);
    }

    #[test]
    fn test_tag8_4s16() {
        // selectors (low first): 4-bit, 4-bit, 8-bit, zero
        let selector = 0b00_10_01_01u8;
        let data = [selector, 0x3F, 0x85];
        let mut s = ByteStream::new(&data);
        assert_eq!(s.read_tag8_4s16().unwrap(), [3, -1, -123, 0]);
    }

    #[test]
    fn test_tag8_4s16_sixteen_bit() {
        let selector = 0b00_00_00_11u8;
        let data = [selector, 0x01, 0x2C];
        let mut s = ByteStream::new(&data);
        assert_eq!(s.read_tag8_4s16().unwrap(), [300, 0, 0, 0]);
    }

    #[test]
    fn test_read_cstring() {
        let mut s = ByteStream::new(b"End of log\0rest");
        assert_eq!(s.read_cstring(64), "End of log");
        assert_eq!(s.remaining(), b"rest");
    }
}
