//! 定宽浮点字段
//!
//! 编码器与 IMU 负载是连续排列的 f32/f64 序列。

use crate::{ConfigurationError, Endianness, FramingError};

/// 浮点字段宽度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FloatWidth {
    /// f32
    #[default]
    F32,
    /// f64
    F64,
}

impl FloatWidth {
    /// 字节数
    pub fn bytes(self) -> usize {
        match self {
            FloatWidth::F32 => 4,
            FloatWidth::F64 => 8,
        }
    }
}

impl TryFrom<usize> for FloatWidth {
    type Error = ConfigurationError;

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        match size {
            4 => Ok(FloatWidth::F32),
            8 => Ok(FloatWidth::F64),
            other => Err(ConfigurationError::Invalid(format!(
                "float size must be 4 or 8 bytes, got {other}"
            ))),
        }
    }
}

/// 把负载解码为 `count` 个浮点数
///
/// # 错误
///
/// 负载长度不等于 `count * width` 时返回 `PayloadLength`。
pub fn decode_floats(
    payload: &[u8],
    count: usize,
    width: FloatWidth,
    endianness: Endianness,
) -> Result<Vec<f64>, FramingError> {
    let expected = count * width.bytes();
    if payload.len() != expected {
        return Err(FramingError::PayloadLength {
            expected,
            actual: payload.len(),
        });
    }

    Ok(payload
        .chunks_exact(width.bytes())
        .map(|chunk| {
            let raw = endianness.read_uint(chunk);
            match width {
                FloatWidth::F32 => f64::from(f32::from_bits(raw as u32)),
                FloatWidth::F64 => f64::from_bits(raw),
            }
        })
        .collect())
}

/// 把浮点数编码为连续字段（测试桩与模拟设备使用）
pub fn encode_floats(values: &[f64], width: FloatWidth, endianness: Endianness) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * width.bytes());
    for &v in values {
        match width {
            FloatWidth::F32 => endianness.write_uint(u64::from((v as f32).to_bits()), 4, &mut out),
            FloatWidth::F64 => endianness.write_uint(v.to_bits(), 8, &mut out),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_f32_little() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1.5f32.to_le_bytes());
        payload.extend_from_slice(&(-3.25f32).to_le_bytes());
        let values = decode_floats(&payload, 2, FloatWidth::F32, Endianness::Little).unwrap();
        assert_eq!(values, vec![1.5, -3.25]);
    }

    #[test]
    fn test_decode_f64_big() {
        let payload = 0.125f64.to_be_bytes();
        let values = decode_floats(&payload, 1, FloatWidth::F64, Endianness::Big).unwrap();
        assert_eq!(values, vec![0.125]);
    }

    #[test]
    fn test_decode_length_mismatch() {
        let err = decode_floats(&[0u8; 7], 2, FloatWidth::F32, Endianness::Little).unwrap_err();
        assert_eq!(err, FramingError::PayloadLength { expected: 8, actual: 7 });
    }

    #[test]
    fn test_encode_matches_decode() {
        let bytes = encode_floats(&[0.5, 2.0], FloatWidth::F32, Endianness::Big);
        assert_eq!(&bytes[..4], &0.5f32.to_be_bytes());
        assert_eq!(
            decode_floats(&bytes, 2, FloatWidth::F32, Endianness::Big).unwrap(),
            vec![0.5, 2.0]
        );
    }

    #[test]
    fn test_float_width_try_from() {
        assert_eq!(FloatWidth::try_from(4).unwrap(), FloatWidth::F32);
        assert_eq!(FloatWidth::try_from(8).unwrap(), FloatWidth::F64);
        assert!(FloatWidth::try_from(2).is_err());
    }
}
