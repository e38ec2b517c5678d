//! 结构体格式串
//!
//! 每个字符描述一个定宽字段，字节序由 [`Endianness`] 单独给出，字段之间无填充：
//!
//! | 字符 | 类型 | 宽度 |
//! |------|------|------|
//! | `b` / `B` | i8 / u8 | 1 |
//! | `?` | bool | 1 |
//! | `h` / `H` | i16 / u16 | 2 |
//! | `i` / `I` | i32 / u32 | 4 |
//! | `q` / `Q` | i64 / u64 | 8 |
//! | `e` | f16 | 2 |
//! | `f` | f32 | 4 |
//! | `d` | f64 | 8 |

use crate::{ConfigurationError, Endianness, FramingError};
use bytes::Bytes;
use smallvec::SmallVec;
use std::fmt;

/// 字段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldType {
    I8,
    U8,
    Bool,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F16,
    F32,
    F64,
}

impl FieldType {
    /// 从格式字符解析
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'b' => Self::I8,
            'B' => Self::U8,
            '?' => Self::Bool,
            'h' => Self::I16,
            'H' => Self::U16,
            'i' => Self::I32,
            'I' => Self::U32,
            'q' => Self::I64,
            'Q' => Self::U64,
            'e' => Self::F16,
            'f' => Self::F32,
            'd' => Self::F64,
            _ => return None,
        })
    }

    /// 格式字符
    pub fn code(self) -> char {
        match self {
            Self::I8 => 'b',
            Self::U8 => 'B',
            Self::Bool => '?',
            Self::I16 => 'h',
            Self::U16 => 'H',
            Self::I32 => 'i',
            Self::U32 => 'I',
            Self::I64 => 'q',
            Self::U64 => 'Q',
            Self::F16 => 'e',
            Self::F32 => 'f',
            Self::F64 => 'd',
        }
    }

    /// 字段宽度（字节）
    pub fn width(self) -> usize {
        match self {
            Self::I8 | Self::U8 | Self::Bool => 1,
            Self::I16 | Self::U16 | Self::F16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F16 | Self::F32 | Self::F64)
    }

    /// 整数字段的取值范围
    fn int_range(self) -> Option<(i128, i128)> {
        Some(match self {
            Self::I8 => (i8::MIN.into(), i8::MAX.into()),
            Self::U8 => (0, u8::MAX.into()),
            Self::I16 => (i16::MIN.into(), i16::MAX.into()),
            Self::U16 => (0, u16::MAX.into()),
            Self::I32 => (i32::MIN.into(), i32::MAX.into()),
            Self::U32 => (0, u32::MAX.into()),
            Self::I64 => (i64::MIN.into(), i64::MAX.into()),
            Self::U64 => (0, u64::MAX.into()),
            _ => return None,
        })
    }
}

/// 一个字段的值
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Value {
    /// 值的类别名（用于错误信息）
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::UInt(_) => "int",
            Value::Float(_) => "float",
        }
    }

    /// 转为 f64（整数可能损失精度）
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Bool(b) => f64::from(u8::from(b)),
            Value::Int(v) => v as f64,
            Value::UInt(v) => v as f64,
            Value::Float(v) => v,
        }
    }

    /// 非浮点值转为整数
    fn as_integer(&self) -> Option<i128> {
        match *self {
            Value::Bool(b) => Some(i128::from(b)),
            Value::Int(v) => Some(i128::from(v)),
            Value::UInt(v) => Some(i128::from(v)),
            Value::Float(_) => None,
        }
    }

    fn is_truthy(&self) -> bool {
        match *self {
            Value::Bool(b) => b,
            Value::Int(v) => v != 0,
            Value::UInt(v) => v != 0,
            Value::Float(v) => v != 0.0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! impl_value_from {
    ($variant:ident, $target:ty; $($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$variant(<$target>::from(v))
            }
        })*
    };
}

impl_value_from!(Int, i64; i8, i16, i32, i64);
impl_value_from!(UInt, u64; u8, u16, u32, u64);
impl_value_from!(Float, f64; f32, f64);
impl_value_from!(Bool, bool; bool);

/// 解析后的结构体格式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructFormat {
    fields: SmallVec<[FieldType; 16]>,
    endianness: Endianness,
}

impl StructFormat {
    /// 解析格式串
    ///
    /// # 错误
    ///
    /// - `InvalidFormatChar`: 出现字段类型表以外的字符（包括字节序前缀与重复计数）
    /// - `EmptyFormat`: 格式串为空
    pub fn parse(format: &str, endianness: Endianness) -> Result<Self, ConfigurationError> {
        let fields = format
            .chars()
            .map(|c| FieldType::from_char(c).ok_or(ConfigurationError::InvalidFormatChar(c)))
            .collect::<Result<SmallVec<_>, _>>()?;
        if fields.is_empty() {
            return Err(ConfigurationError::EmptyFormat);
        }
        Ok(Self { fields, endianness })
    }

    pub fn fields(&self) -> &[FieldType] {
        &self.fields
    }

    /// 字段数量
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 打包后的总字节数
    pub fn size(&self) -> usize {
        self.fields.iter().map(|f| f.width()).sum()
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// 带字节序前缀的格式串，例如 `<hhf`
    pub fn to_prefixed_string(&self) -> String {
        std::iter::once(self.endianness.format_prefix())
            .chain(self.fields.iter().map(|f| f.code()))
            .collect()
    }

    /// 检查值的数量与类型，不产生输出
    pub fn validate(&self, values: &[Value]) -> Result<(), ConfigurationError> {
        self.pack(values).map(|_| ())
    }

    /// 按格式打包
    ///
    /// # 错误
    ///
    /// - `ValueCountMismatch`: 值数量与字段数不符
    /// - `ValueTypeMismatch`: 浮点值写入整数字段
    /// - `ValueOutOfRange`: 整数越界或浮点数超出目标精度的表示范围
    pub fn pack(&self, values: &[Value]) -> Result<Bytes, ConfigurationError> {
        if values.len() != self.fields.len() {
            return Err(ConfigurationError::ValueCountMismatch {
                expected: self.fields.len(),
                actual: values.len(),
            });
        }

        let mut out = Vec::with_capacity(self.size());
        for (index, (field, value)) in self.fields.iter().zip(values).enumerate() {
            let out_of_range = || ConfigurationError::ValueOutOfRange {
                index,
                format: field.code(),
                value: value.to_string(),
            };

            match field {
                FieldType::Bool => out.push(u8::from(value.is_truthy())),
                FieldType::F16 => {
                    let bits = f16_bits_from_f64(value.as_f64()).ok_or_else(out_of_range)?;
                    self.endianness.write_uint(u64::from(bits), 2, &mut out);
                },
                FieldType::F32 => {
                    let v = value.as_f64();
                    let narrowed = v as f32;
                    if v.is_finite() && narrowed.is_infinite() {
                        return Err(out_of_range());
                    }
                    self.endianness
                        .write_uint(u64::from(narrowed.to_bits()), 4, &mut out);
                },
                FieldType::F64 => {
                    self.endianness.write_uint(value.as_f64().to_bits(), 8, &mut out);
                },
                int_field => {
                    let v = value.as_integer().ok_or(ConfigurationError::ValueTypeMismatch {
                        index,
                        format: field.code(),
                        kind: value.kind(),
                    })?;
                    let (min, max) = int_field.int_range().ok_or_else(out_of_range)?;
                    if v < min || v > max {
                        return Err(out_of_range());
                    }
                    // 二进制补码截断到字段宽度
                    self.endianness.write_uint(v as u64, int_field.width(), &mut out);
                },
            }
        }
        Ok(Bytes::from(out))
    }

    /// 按格式解包
    ///
    /// # 错误
    ///
    /// 字节数不等于 [`size`](Self::size) 时返回 `PayloadLength`。
    pub fn unpack(&self, data: &[u8]) -> Result<Vec<Value>, FramingError> {
        if data.len() != self.size() {
            return Err(FramingError::PayloadLength {
                expected: self.size(),
                actual: data.len(),
            });
        }

        let mut offset = 0;
        let values = self
            .fields
            .iter()
            .map(|field| {
                let width = field.width();
                let raw = self.endianness.read_uint(&data[offset..offset + width]);
                offset += width;
                match field {
                    FieldType::Bool => Value::Bool(raw != 0),
                    FieldType::I8 => Value::Int(i64::from(raw as u8 as i8)),
                    FieldType::I16 => Value::Int(i64::from(raw as u16 as i16)),
                    FieldType::I32 => Value::Int(i64::from(raw as u32 as i32)),
                    FieldType::I64 => Value::Int(raw as i64),
                    FieldType::U8 | FieldType::U16 | FieldType::U32 | FieldType::U64 => Value::UInt(raw),
                    FieldType::F16 => Value::Float(f16_bits_to_f64(raw as u16)),
                    FieldType::F32 => Value::Float(f64::from(f32::from_bits(raw as u32))),
                    FieldType::F64 => Value::Float(f64::from_bits(raw)),
                }
            })
            .collect();
        Ok(values)
    }
}

impl fmt::Display for StructFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_prefixed_string())
    }
}

/// f64 转 IEEE 754 半精度位模式（就近舍入到偶数）
///
/// 有限值超出半精度范围时返回 `None`。
pub(crate) fn f16_bits_from_f64(value: f64) -> Option<u16> {
    let sign: u16 = if value.is_sign_negative() { 0x8000 } else { 0 };
    if value.is_nan() {
        return Some(sign | 0x7E00);
    }
    if value.is_infinite() {
        return Some(sign | 0x7C00);
    }

    let abs = value.abs();
    if abs < 2f64.powi(-14) {
        // 次正规数：值 = m * 2^-24，m 进位到 1024 时恰好得到最小正规数的位模式
        let m = (abs * 2f64.powi(24)).round_ties_even() as u16;
        return Some(sign | m);
    }

    let bits = abs.to_bits();
    let mut exponent = ((bits >> 52) & 0x7FF) as i32 - 1023 + 15;
    let mantissa = bits & ((1u64 << 52) - 1);

    const SHIFT: u32 = 52 - 10;
    let mut m = mantissa >> SHIFT;
    let rem = mantissa & ((1u64 << SHIFT) - 1);
    let half = 1u64 << (SHIFT - 1);
    if rem > half || (rem == half && m & 1 == 1) {
        m += 1;
        if m == 0x400 {
            m = 0;
            exponent += 1;
        }
    }
    if exponent >= 31 {
        return None;
    }
    Some(sign | ((exponent as u16) << 10) | m as u16)
}

/// IEEE 754 半精度位模式转 f64
pub(crate) fn f16_bits_to_f64(bits: u16) -> f64 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = i32::from((bits >> 10) & 0x1F);
    let mantissa = f64::from(bits & 0x3FF);
    match exponent {
        0 => sign * mantissa * 2f64.powi(-24),
        31 if mantissa == 0.0 => sign * f64::INFINITY,
        31 => f64::NAN,
        e => sign * (1.0 + mantissa / 1024.0) * 2f64.powi(e - 15),
    }
}
