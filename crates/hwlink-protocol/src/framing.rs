//! 帧编解码
//!
//! 流式总线（Serial/SPI）的线上格式：
//!
//! ```text
//! [消息 ID: id_width 字节][负载长度: len_width 字节][负载]
//! ```
//!
//! 两个头字段都可以为 0 字节。`id_width == 0` 时整个剩余部分都是负载，
//! 消息 ID 取接收实例绑定的哨兵值。
//!
//! CAN 不使用负载内的头：消息 ID 就是仲裁 ID，负载就是数据域。

use crate::{ConfigurationError, Endianness, FramingError, MessageId, Packet};
use bytes::Bytes;

/// 头字段最大宽度（字节）
pub const MAX_HEADER_WIDTH: u8 = 4;

/// 标准帧 ID 上限（11 bit）
pub const CAN_STANDARD_ID_MAX: MessageId = 0x7FF;
/// 扩展帧 ID 上限（29 bit）
pub const CAN_EXTENDED_ID_MAX: MessageId = 0x1FFF_FFFF;
/// 经典 CAN 数据域上限
pub const CAN_CLASSIC_PAYLOAD_MAX: usize = 8;
/// CAN FD 数据域上限
pub const CAN_FD_PAYLOAD_MAX: usize = 64;

fn width_max(width: u8) -> u64 {
    (1u64 << (8 * u32::from(width))) - 1
}

/// 流式总线的帧头布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameLayout {
    /// 消息 ID 头宽度（0 表示不带 ID）
    pub id_width: u8,
    /// 负载长度头宽度（0 表示不带长度）
    pub len_width: u8,
    /// 头字段字节序
    pub endianness: Endianness,
}

impl FrameLayout {
    /// 创建并校验布局
    ///
    /// # 错误
    ///
    /// 任一宽度超过 [`MAX_HEADER_WIDTH`] 时返回 `HeaderTooWide`。
    pub fn new(id_width: u8, len_width: u8, endianness: Endianness) -> Result<Self, ConfigurationError> {
        for width in [id_width, len_width] {
            if width > MAX_HEADER_WIDTH {
                return Err(ConfigurationError::HeaderTooWide {
                    width,
                    max: MAX_HEADER_WIDTH,
                });
            }
        }
        Ok(Self {
            id_width,
            len_width,
            endianness,
        })
    }

    /// 头部总长度
    pub fn header_len(&self) -> usize {
        usize::from(self.id_width) + usize::from(self.len_width)
    }

    /// 帧是否携带消息 ID
    pub fn has_id(&self) -> bool {
        self.id_width > 0
    }

    /// 检查消息 ID 是否能用 `id_width` 字节表示
    pub fn check_id(&self, msg_id: MessageId) -> Result<(), ConfigurationError> {
        if self.has_id() && u64::from(msg_id) > width_max(self.id_width) {
            return Err(ConfigurationError::IdOutOfRange {
                id: msg_id,
                width: self.id_width,
            });
        }
        Ok(())
    }

    /// 长度头可表示的最大负载（无长度头时为 `None`）
    pub fn max_payload(&self) -> Option<usize> {
        (self.len_width > 0).then(|| usize::try_from(width_max(self.len_width)).unwrap_or(usize::MAX))
    }

    /// 编码一帧
    ///
    /// # 错误
    ///
    /// - `IdOutOfRange`: `msg_id` 超出 ID 头宽度
    /// - `PayloadTooLong`: 负载长度超出长度头宽度
    pub fn encode(&self, payload: &[u8], msg_id: MessageId) -> Result<Bytes, ConfigurationError> {
        self.check_id(msg_id)?;
        if self.max_payload().is_some_and(|max| payload.len() > max) {
            return Err(ConfigurationError::PayloadTooLong {
                len: payload.len(),
                width: self.len_width,
            });
        }

        let mut out = Vec::with_capacity(self.header_len() + payload.len());
        if self.has_id() {
            self.endianness.write_uint(u64::from(msg_id), usize::from(self.id_width), &mut out);
        }
        if self.len_width > 0 {
            self.endianness
                .write_uint(payload.len() as u64, usize::from(self.len_width), &mut out);
        }
        out.extend_from_slice(payload);
        Ok(Bytes::from(out))
    }

    /// 解码一帧
    ///
    /// 声明长度之后的多余字节被忽略。负载是 `raw` 的零拷贝切片。
    ///
    /// # 参数
    ///
    /// - `sentinel`: `id_width == 0` 时返回的消息 ID
    ///
    /// # 错误
    ///
    /// - `TooShort`: `raw` 比头部短
    /// - `LengthMismatch`: 声明的负载长度超出剩余字节
    pub fn decode(&self, raw: &Bytes, sentinel: MessageId) -> Result<(MessageId, Bytes), FramingError> {
        let header_len = self.header_len();
        if raw.len() < header_len {
            return Err(FramingError::TooShort {
                expected: header_len,
                actual: raw.len(),
            });
        }

        let id_end = usize::from(self.id_width);
        let msg_id = if self.has_id() {
            // id_width <= 4，结果必然落在 u32 范围内
            self.endianness.read_uint(&raw[..id_end]) as MessageId
        } else {
            sentinel
        };

        let remaining = raw.len() - header_len;
        let payload_len = if self.len_width > 0 {
            let declared = self.endianness.read_uint(&raw[id_end..header_len]) as usize;
            if declared > remaining {
                return Err(FramingError::LengthMismatch { declared, remaining });
            }
            declared
        } else {
            remaining
        };

        Ok((msg_id, raw.slice(header_len..header_len + payload_len)))
    }
}

/// 按布局编码（自由函数形式）
pub fn encode(payload: &[u8], msg_id: MessageId, layout: &FrameLayout) -> Result<Bytes, ConfigurationError> {
    layout.encode(payload, msg_id)
}

/// 按布局解码（自由函数形式）
pub fn decode(raw: &Bytes, layout: &FrameLayout, sentinel: MessageId) -> Result<(MessageId, Bytes), FramingError> {
    layout.decode(raw, sentinel)
}

/// CAN 帧布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanLayout {
    /// 使用 29-bit 扩展 ID
    pub extended: bool,
    /// CAN FD（数据域最多 64 字节）
    pub fd: bool,
}

impl CanLayout {
    pub fn max_id(&self) -> MessageId {
        if self.extended {
            CAN_EXTENDED_ID_MAX
        } else {
            CAN_STANDARD_ID_MAX
        }
    }

    pub fn max_payload(&self) -> usize {
        if self.fd {
            CAN_FD_PAYLOAD_MAX
        } else {
            CAN_CLASSIC_PAYLOAD_MAX
        }
    }

    pub fn check_id(&self, msg_id: MessageId) -> Result<(), ConfigurationError> {
        if msg_id > self.max_id() {
            return Err(ConfigurationError::CanIdOutOfRange {
                id: msg_id,
                bits: if self.extended { 29 } else { 11 },
            });
        }
        Ok(())
    }

    /// 构建 CAN 数据包
    pub fn encode(&self, payload: &[u8], msg_id: MessageId) -> Result<Packet, ConfigurationError> {
        self.check_id(msg_id)?;
        if payload.len() > self.max_payload() {
            return Err(ConfigurationError::CanPayloadTooLong {
                len: payload.len(),
                max: self.max_payload(),
            });
        }
        Ok(Packet::can(msg_id, self.extended, Bytes::copy_from_slice(payload)))
    }

    /// 从 CAN 数据包取出（仲裁 ID，数据域）
    pub fn decode(&self, packet: &Packet) -> Result<(MessageId, Bytes), FramingError> {
        let id = packet.id.ok_or(FramingError::MissingMessageId)?;
        Ok((id, packet.data.clone()))
    }
}

/// 一个通道使用的编解码器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Codec {
    /// Serial/SPI 字节流帧
    Stream(FrameLayout),
    /// CAN 仲裁 ID + 数据域
    Can(CanLayout),
}

impl Codec {
    /// 帧是否能区分消息 ID
    ///
    /// 不能区分时，同一通道上同一角色只允许一个实例。
    pub fn is_id_framed(&self) -> bool {
        match self {
            Codec::Stream(layout) => layout.has_id(),
            Codec::Can(_) => true,
        }
    }

    pub fn check_id(&self, msg_id: MessageId) -> Result<(), ConfigurationError> {
        match self {
            Codec::Stream(layout) => layout.check_id(msg_id),
            Codec::Can(layout) => layout.check_id(msg_id),
        }
    }

    /// 单帧可携带的最大负载（`None` 表示不受帧格式限制）
    pub fn max_payload(&self) -> Option<usize> {
        match self {
            Codec::Stream(layout) => layout.max_payload(),
            Codec::Can(layout) => Some(layout.max_payload()),
        }
    }

    pub fn encode(&self, payload: &[u8], msg_id: MessageId) -> Result<Packet, ConfigurationError> {
        match self {
            Codec::Stream(layout) => layout.encode(payload, msg_id).map(Packet::stream),
            Codec::Can(layout) => layout.encode(payload, msg_id),
        }
    }

    pub fn decode(&self, packet: &Packet, sentinel: MessageId) -> Result<(MessageId, Bytes), FramingError> {
        match self {
            Codec::Stream(layout) => layout.decode(&packet.data, sentinel),
            Codec::Can(layout) => layout.decode(packet),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(id: u8, len: u8, endianness: Endianness) -> FrameLayout {
        FrameLayout::new(id, len, endianness).unwrap()
    }

    /// Serial 场景：1 字节 ID，无长度头
    #[test]
    fn test_serial_wire_bytes() {
        let l = layout(1, 0, Endianness::Little);
        let wire = l.encode(b"hi", 0x10).unwrap();
        assert_eq!(&wire[..], &[0x10, 0x68, 0x69]);

        let (id, payload) = l.decode(&wire, 0).unwrap();
        assert_eq!(id, 0x10);
        assert_eq!(&payload[..], b"hi");
    }

    /// SPI 场景：1 字节 ID + 2 字节大端长度
    #[test]
    fn test_spi_wire_bytes() {
        let l = layout(1, 2, Endianness::Big);
        let wire = l.encode(b"AB", 0x01).unwrap();
        assert_eq!(&wire[..], &[0x01, 0x00, 0x02, 0x41, 0x42]);

        let (id, payload) = l.decode(&wire, 0).unwrap();
        assert_eq!(id, 0x01);
        assert_eq!(&payload[..], b"AB");
    }

    #[test]
    fn test_little_endian_length_header() {
        let l = layout(2, 2, Endianness::Little);
        let wire = l.encode(&[0xAA; 3], 0x0102).unwrap();
        assert_eq!(&wire[..], &[0x02, 0x01, 0x03, 0x00, 0xAA, 0xAA, 0xAA]);
    }

    #[test]
    fn test_no_id_uses_sentinel() {
        let l = layout(0, 0, Endianness::Little);
        let wire = l.encode(b"xyz", 0x55).unwrap();
        assert_eq!(&wire[..], b"xyz");

        let (id, payload) = l.decode(&wire, 0x55).unwrap();
        assert_eq!(id, 0x55);
        assert_eq!(&payload[..], b"xyz");
    }

    #[test]
    fn test_id_out_of_range() {
        let l = layout(1, 0, Endianness::Little);
        let err = l.encode(b"x", 0x100).unwrap_err();
        assert_eq!(err, ConfigurationError::IdOutOfRange { id: 0x100, width: 1 });

        // 4 字节 ID 覆盖整个 u32 范围
        let l = layout(4, 0, Endianness::Big);
        assert!(l.encode(b"x", u32::MAX).is_ok());
    }

    #[test]
    fn test_payload_too_long() {
        let l = layout(0, 1, Endianness::Little);
        assert!(l.encode(&[0u8; 255], 0).is_ok());
        let err = l.encode(&[0u8; 256], 0).unwrap_err();
        assert_eq!(err, ConfigurationError::PayloadTooLong { len: 256, width: 1 });
    }

    #[test]
    fn test_header_too_wide() {
        let err = FrameLayout::new(5, 0, Endianness::Little).unwrap_err();
        assert_eq!(err, ConfigurationError::HeaderTooWide { width: 5, max: 4 });
    }

    #[test]
    fn test_decode_too_short() {
        let l = layout(1, 2, Endianness::Big);
        let raw = Bytes::from_static(&[0x01, 0x00]);
        assert_eq!(
            l.decode(&raw, 0).unwrap_err(),
            FramingError::TooShort { expected: 3, actual: 2 }
        );
    }

    #[test]
    fn test_decode_length_mismatch() {
        let l = layout(1, 2, Endianness::Big);
        let raw = Bytes::from_static(&[0x01, 0x00, 0x05, 0x41]);
        assert_eq!(
            l.decode(&raw, 0).unwrap_err(),
            FramingError::LengthMismatch {
                declared: 5,
                remaining: 1
            }
        );
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let l = layout(1, 1, Endianness::Big);
        let raw = Bytes::from_static(&[0x07, 0x01, 0x41, 0x00, 0x00]);
        let (id, payload) = l.decode(&raw, 0).unwrap();
        assert_eq!(id, 7);
        assert_eq!(&payload[..], b"A");
    }

    #[test]
    fn test_can_layout_limits() {
        let std = CanLayout::default();
        assert!(std.encode(&[0; 8], 0x7FF).is_ok());
        assert!(matches!(
            std.encode(&[0; 8], 0x800),
            Err(ConfigurationError::CanIdOutOfRange { bits: 11, .. })
        ));
        assert!(matches!(
            std.encode(&[0; 9], 0x1),
            Err(ConfigurationError::CanPayloadTooLong { len: 9, max: 8 })
        ));

        let ext = CanLayout {
            extended: true,
            fd: true,
        };
        let packet = ext.encode(&[0; 64], 0x1FFF_FFFF).unwrap();
        assert!(packet.is_extended);
        assert_eq!(packet.id, Some(0x1FFF_FFFF));
    }

    #[test]
    fn test_can_decode_requires_id() {
        let layout = CanLayout::default();
        assert_eq!(
            layout.decode(&Packet::stream(vec![1u8])).unwrap_err(),
            FramingError::MissingMessageId
        );
        let (id, data) = layout.decode(&Packet::can(0x20, false, vec![1u8, 2])).unwrap();
        assert_eq!(id, 0x20);
        assert_eq!(&data[..], &[1, 2]);
    }

    #[test]
    fn test_codec_id_framing() {
        assert!(!Codec::Stream(FrameLayout::default()).is_id_framed());
        assert!(Codec::Stream(layout(1, 0, Endianness::Little)).is_id_framed());
        assert!(Codec::Can(CanLayout::default()).is_id_framed());
        assert_eq!(Codec::Stream(FrameLayout::default()).max_payload(), None);
        assert_eq!(Codec::Can(CanLayout::default()).max_payload(), Some(8));
    }
}
