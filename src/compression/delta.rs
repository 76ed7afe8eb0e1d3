use crate::compression::vbyte::VByteEncoder;
use crate::core::error::Result;

/// Delta encoding for sorted u32 runs (ids of a posting block).
/// The first value is stored raw, the rest as vbyte-encoded gaps.
pub struct DeltaEncoder;

impl DeltaEncoder {
    pub fn encode_u32_list(nums: &[u32]) -> Vec<u8> {
        if nums.is_empty() {
            return Vec::new();
        }

        let mut output = Vec::with_capacity(4 + nums.len());
        output.extend_from_slice(&nums[0].to_le_bytes());

        for i in 1..nums.len() {
            let delta = nums[i].wrapping_sub(nums[i - 1]);
            VByteEncoder::encode_u32(&mut output, delta);
        }

        output
    }

    pub fn decode_u32_list(data: &[u8]) -> Result<Vec<u32>> {
        if data.len() < 4 {
            return Ok(Vec::new());
        }

        let first = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let mut nums = vec![first];
        let mut pos = 4;
        let mut prev = first;

        while pos < data.len() {
            let (delta, consumed) = VByteEncoder::decode_u32(&data[pos..])?;
            let val = prev.wrapping_add(delta);
            nums.push(val);
            prev = val;
            pos += consumed;
        }

        Ok(nums)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_round_trip() {
        let ids: Vec<u32> = vec![3, 4, 10, 1000, 1001, 500_000];
        let encoded = DeltaEncoder::encode_u32_list(&ids);
        assert_eq!(DeltaEncoder::decode_u32_list(&encoded).unwrap(), ids);
    }

    #[test]
    fn test_delta_empty() {
        assert!(DeltaEncoder::encode_u32_list(&[]).is_empty());
        assert!(DeltaEncoder::decode_u32_list(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_delta_dense_run_is_small() {
        let ids: Vec<u32> = (100..356).collect();
        let encoded = DeltaEncoder::encode_u32_list(&ids);
        // 4 bytes header + 1 byte per gap
        assert_eq!(encoded.len(), 4 + 255);
    }
}
