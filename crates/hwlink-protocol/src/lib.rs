//! # hwlink Protocol
//!
//! 硬件链路的纯数据层（无硬件依赖）
//!
//! ## 模块
//!
//! - `framing`: 消息 ID / 长度头的帧编解码，以及 CAN 仲裁 ID 布局
//! - `format`: 结构体格式串（`"<hhf"` 风格的字段类型表）打包/解包
//! - `fields`: 定宽浮点字段解码（编码器、IMU 负载）
//!
//! ## 字节序
//!
//! 所有多字节字段的字节序由调用方通过 [`Endianness`] 选择。
//! Serial 默认小端，SPI 默认大端（与常见 MCU 固件一致）。

pub mod fields;
pub mod format;
pub mod framing;

pub use fields::{FloatWidth, decode_floats, encode_floats};
pub use format::{FieldType, StructFormat, Value};
pub use framing::{CanLayout, Codec, FrameLayout, MAX_HEADER_WIDTH};

use bytes::Bytes;
use thiserror::Error;

/// 消息标识符
///
/// Serial/SPI 帧头中的 ID，或 CAN 仲裁 ID（11/29 bit）。
pub type MessageId = u32;

/// 多字节字段字节序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Endianness {
    /// 小端（低字节在前）
    #[default]
    Little,
    /// 大端（高字节在前，Motorola 顺序）
    Big,
}

impl Endianness {
    /// 将无符号整数写为 `width` 字节（width <= 8）
    pub fn write_uint(self, value: u64, width: usize, out: &mut Vec<u8>) {
        let bytes = value.to_le_bytes();
        match self {
            Endianness::Little => out.extend_from_slice(&bytes[..width]),
            Endianness::Big => out.extend(bytes[..width].iter().rev()),
        }
    }

    /// 从 `bytes` 读取无符号整数（长度 <= 8）
    pub fn read_uint(self, bytes: &[u8]) -> u64 {
        let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
        match self {
            Endianness::Little => bytes.iter().rev().fold(0, fold),
            Endianness::Big => bytes.iter().fold(0, fold),
        }
    }

    /// 结构体格式串中的字节序前缀字符
    pub fn format_prefix(self) -> char {
        match self {
            Endianness::Little => '<',
            Endianness::Big => '>',
        }
    }
}

impl std::str::FromStr for Endianness {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "little" | "le" | "<" => Ok(Endianness::Little),
            "big" | "be" | ">" => Ok(Endianness::Big),
            other => Err(ConfigurationError::Invalid(format!(
                "endianness must be 'little' or 'big', got '{other}'"
            ))),
        }
    }
}

/// 传输层与驱动层之间交换的原始数据单元
///
/// - Serial/SPI：`id` 为 `None`，`data` 是线上完整字节（含 ID/长度头）
/// - CAN：`id` 为仲裁 ID，`data` 是 CAN 数据域（经典帧最多 8 字节）
///
/// `Bytes` 使克隆为引用计数，接收循环把负载分发到多个槽位时不复制。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    /// CAN 仲裁 ID（流式总线为 `None`）
    pub id: Option<MessageId>,

    /// 是否为扩展帧（29-bit ID）
    pub is_extended: bool,

    /// 数据
    pub data: Bytes,

    /// 硬件/接收时间戳（微秒），0 表示不可用
    pub timestamp_us: u64,
}

impl Packet {
    /// 流式总线（Serial/SPI）数据包
    pub fn stream(data: impl Into<Bytes>) -> Self {
        Self {
            id: None,
            is_extended: false,
            data: data.into(),
            timestamp_us: 0,
        }
    }

    /// CAN 数据包
    pub fn can(id: MessageId, is_extended: bool, data: impl Into<Bytes>) -> Self {
        Self {
            id: Some(id),
            is_extended,
            data: data.into(),
            timestamp_us: 0,
        }
    }

    /// 数据长度（字节）
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 设置时间戳
    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }
}

/// 帧解析错误
///
/// 接收循环记录并丢弃这类错误，从不向调用方抛出。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Frame too short: header needs {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Declared payload length {declared} exceeds remaining {remaining} bytes")]
    LengthMismatch { declared: usize, remaining: usize },

    #[error("CAN packet carries no arbitration ID")]
    MissingMessageId,

    #[error("Payload length mismatch: expected {expected} bytes, got {actual}")]
    PayloadLength { expected: usize, actual: usize },
}

/// 配置错误（参数非法，构造时或首次违约的 send 时报告，不重试）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Message ID 0x{id:X} does not fit in {width} header byte(s)")]
    IdOutOfRange { id: MessageId, width: u8 },

    #[error("Payload of {len} bytes does not fit in a {width}-byte length header")]
    PayloadTooLong { len: usize, width: u8 },

    #[error("Header width {width} exceeds the maximum of {max} bytes")]
    HeaderTooWide { width: u8, max: u8 },

    #[error("CAN ID 0x{id:X} exceeds {bits}-bit identifier space")]
    CanIdOutOfRange { id: MessageId, bits: u8 },

    #[error("CAN payload of {len} bytes exceeds {max} bytes")]
    CanPayloadTooLong { len: usize, max: usize },

    #[error("Invalid struct format character '{0}'")]
    InvalidFormatChar(char),

    #[error("Struct format contains no fields")]
    EmptyFormat,

    #[error("Expected {expected} values, got {actual}")]
    ValueCountMismatch { expected: usize, actual: usize },

    #[error("Field {index} ('{format}') cannot hold a {kind} value")]
    ValueTypeMismatch {
        index: usize,
        format: char,
        kind: &'static str,
    },

    #[error("Field {index} ('{format}') value out of range: {value}")]
    ValueOutOfRange {
        index: usize,
        format: char,
        value: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endianness_uint_roundtrip() {
        let mut out = Vec::new();
        Endianness::Big.write_uint(0x0102, 2, &mut out);
        assert_eq!(out, vec![0x01, 0x02]);
        assert_eq!(Endianness::Big.read_uint(&out), 0x0102);

        out.clear();
        Endianness::Little.write_uint(0x0102, 2, &mut out);
        assert_eq!(out, vec![0x02, 0x01]);
        assert_eq!(Endianness::Little.read_uint(&out), 0x0102);
    }

    #[test]
    fn test_endianness_from_str() {
        assert_eq!("little".parse::<Endianness>().unwrap(), Endianness::Little);
        assert_eq!("BIG".parse::<Endianness>().unwrap(), Endianness::Big);
        assert!("middle".parse::<Endianness>().is_err());
    }

    #[test]
    fn test_packet_constructors() {
        let p = Packet::stream(vec![1u8, 2, 3]);
        assert_eq!(p.id, None);
        assert_eq!(p.len(), 3);

        let c = Packet::can(0x123, false, vec![9u8]).with_timestamp(42);
        assert_eq!(c.id, Some(0x123));
        assert_eq!(c.timestamp_us, 42);
        assert!(!c.is_empty());
    }

    /// 测试错误信息格式
    #[test]
    fn test_error_display() {
        let err = FramingError::TooShort {
            expected: 3,
            actual: 1,
        };
        assert!(format!("{}", err).contains("too short"));

        let err = ConfigurationError::IdOutOfRange { id: 0x1FF, width: 1 };
        assert!(format!("{}", err).contains("0x1FF"));
    }
}
