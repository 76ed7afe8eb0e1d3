use crate::core::error::{Error, ErrorKind, Result};

/// Variable byte encoding for u32 values (best for small integers).
pub struct VByteEncoder;

impl VByteEncoder {
    /// Encode single u32 value.
    /// Values < 128 use 1 byte, < 16384 use 2 bytes, etc.
    pub fn encode_u32(output: &mut Vec<u8>, mut value: u32) {
        while value >= 128 {
            output.push((value & 127) as u8 | 128); // continuation bit
            value >>= 7;
        }
        output.push(value as u8);
    }

    /// Decode single u32 value, returns (value, bytes_consumed).
    pub fn decode_u32(input: &[u8]) -> Result<(u32, usize)> {
        let mut value = 0u32;
        let mut shift = 0;
        let mut consumed = 0;

        for &byte in input {
            consumed += 1;
            value |= ((byte & 127) as u32) << shift;

            if byte & 128 == 0 {
                return Ok((value, consumed));
            }

            shift += 7;
            if shift > 28 {
                // max 5 bytes for u32
                return Err(Error::new(ErrorKind::Parse, "VByte overflow".to_string()));
            }
        }

        Err(Error::new(ErrorKind::Parse, "Incomplete VByte".to_string()))
    }
}
