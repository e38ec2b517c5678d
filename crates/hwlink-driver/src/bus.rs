//! 总线配置
//!
//! 每种总线一份配置结构，统一为 [`BusConfig`]。配置负责：
//!
//! - 推导通道键（同一物理端点的所有实例共享一个通道）
//! - 推导帧编解码器
//! - 构造默认传输（Linux 原生后端）
//! - 参数校验

use crate::config::LinkConfig;
use crate::error::DriverError;
use hwlink_protocol::{CanLayout, Codec, ConfigurationError, Endianness, FrameLayout};
use hwlink_transport::Transport;
use std::fmt;
use std::str::FromStr;

/// 串口输入缓冲阈值（字节），超过后清空输入缓冲
pub const SERIAL_BUFFER_THRESHOLD: usize = 64;
/// SPI 输入计数阈值（字节）
pub const SPI_BUFFER_THRESHOLD: usize = 4096;

/// 总线类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BusKind {
    Serial,
    Spi,
    Can,
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BusKind::Serial => "serial",
            BusKind::Spi => "spi",
            BusKind::Can => "can",
        })
    }
}

/// 通道键：物理端点的唯一标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serial/UART 总线
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerialBus {
    /// 设备路径
    pub port: String,
    pub baudrate: u32,
    /// 消息 ID 头宽度（0 表示不带 ID）
    pub msg_id_length: u8,
    pub endianness: Endianness,
    /// 帧终止符（写入时追加，读取时作为分隔）
    pub terminator: Option<u8>,
    /// 单帧最大字节数
    pub packet_size: usize,
    /// 无终止符时的帧间空闲间隔（毫秒）
    pub frame_gap_ms: u64,
}

impl SerialBus {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baudrate: 115_200,
            msg_id_length: 0,
            endianness: Endianness::Little,
            terminator: None,
            packet_size: 256,
            frame_gap_ms: 2,
        }
    }

    pub fn baudrate(mut self, baudrate: u32) -> Self {
        self.baudrate = baudrate;
        self
    }

    pub fn msg_id_length(mut self, width: u8) -> Self {
        self.msg_id_length = width;
        self
    }

    pub fn endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn terminator(mut self, terminator: Option<u8>) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }

    pub fn frame_gap_ms(mut self, gap_ms: u64) -> Self {
        self.frame_gap_ms = gap_ms;
        self
    }
}

/// SPI 总线
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpiBus {
    pub bus: u16,
    pub device: u16,
    /// SPI 模式（0..=3）
    pub mode: u8,
    pub max_speed_hz: u32,
    pub msg_id_length: u8,
    /// 负载长度头宽度（0 表示固定长度读取）
    pub msg_len_length: u8,
    pub endianness: Endianness,
    /// 无长度头时每次读取的字节数
    pub packet_size: usize,
}

impl SpiBus {
    pub fn new(bus: u16, device: u16) -> Self {
        Self {
            bus,
            device,
            mode: 0,
            max_speed_hz: 500_000,
            msg_id_length: 0,
            msg_len_length: 0,
            endianness: Endianness::Big,
            packet_size: 256,
        }
    }

    pub fn mode(mut self, mode: u8) -> Self {
        self.mode = mode;
        self
    }

    pub fn max_speed_hz(mut self, hz: u32) -> Self {
        self.max_speed_hz = hz;
        self
    }

    pub fn msg_id_length(mut self, width: u8) -> Self {
        self.msg_id_length = width;
        self
    }

    pub fn msg_len_length(mut self, width: u8) -> Self {
        self.msg_len_length = width;
        self
    }

    pub fn endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }
}

/// CAN 后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CanBackend {
    /// Linux SocketCAN
    #[default]
    SocketCan,
}

impl FromStr for CanBackend {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "socketcan" => Ok(CanBackend::SocketCan),
            other => Err(ConfigurationError::Invalid(format!("unsupported CAN bustype '{other}'"))),
        }
    }
}

/// CAN 总线
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanBus {
    /// 接口名
    pub interface: String,
    pub bitrate: u32,
    pub backend: CanBackend,
    /// 使用 29-bit 扩展 ID
    pub extended_id: bool,
    /// CAN FD 帧
    pub fd: bool,
}

impl Default for CanBus {
    fn default() -> Self {
        Self::new("can0")
    }
}

impl CanBus {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            bitrate: 250_000,
            backend: CanBackend::SocketCan,
            extended_id: false,
            fd: false,
        }
    }

    pub fn bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn backend(mut self, backend: CanBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn extended_id(mut self, extended: bool) -> Self {
        self.extended_id = extended;
        self
    }

    pub fn fd(mut self, fd: bool) -> Self {
        self.fd = fd;
        self
    }

    pub fn layout(&self) -> CanLayout {
        CanLayout {
            extended: self.extended_id,
            fd: self.fd,
        }
    }
}

/// 任一总线的配置
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BusConfig {
    Serial(SerialBus),
    Spi(SpiBus),
    Can(CanBus),
}

impl From<SerialBus> for BusConfig {
    fn from(bus: SerialBus) -> Self {
        BusConfig::Serial(bus)
    }
}

impl From<SpiBus> for BusConfig {
    fn from(bus: SpiBus) -> Self {
        BusConfig::Spi(bus)
    }
}

impl From<CanBus> for BusConfig {
    fn from(bus: CanBus) -> Self {
        BusConfig::Can(bus)
    }
}

impl BusConfig {
    pub fn kind(&self) -> BusKind {
        match self {
            BusConfig::Serial(_) => BusKind::Serial,
            BusConfig::Spi(_) => BusKind::Spi,
            BusConfig::Can(_) => BusKind::Can,
        }
    }

    /// 通道键：`serial:<port>`、`spi:<bus>.<device>`、`can:<interface>`
    pub fn channel_key(&self) -> ChannelKey {
        match self {
            BusConfig::Serial(bus) => ChannelKey::new(format!("serial:{}", bus.port)),
            BusConfig::Spi(bus) => ChannelKey::new(format!("spi:{}.{}", bus.bus, bus.device)),
            BusConfig::Can(bus) => ChannelKey::new(format!("can:{}", bus.interface)),
        }
    }

    /// 帧编解码器
    pub fn codec(&self) -> Result<Codec, ConfigurationError> {
        Ok(match self {
            BusConfig::Serial(bus) => Codec::Stream(FrameLayout::new(bus.msg_id_length, 0, bus.endianness)?),
            BusConfig::Spi(bus) => {
                Codec::Stream(FrameLayout::new(bus.msg_id_length, bus.msg_len_length, bus.endianness)?)
            },
            BusConfig::Can(bus) => Codec::Can(bus.layout()),
        })
    }

    /// 输入缓冲清空阈值
    pub fn buffer_threshold(&self) -> Option<usize> {
        match self {
            BusConfig::Serial(_) => Some(SERIAL_BUFFER_THRESHOLD),
            BusConfig::Spi(_) => Some(SPI_BUFFER_THRESHOLD),
            BusConfig::Can(_) => None,
        }
    }

    /// 参数校验
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |msg: String| Err(ConfigurationError::Invalid(msg));
        match self {
            BusConfig::Serial(bus) => {
                if bus.port.is_empty() {
                    return invalid("serial port path is empty".into());
                }
                if bus.baudrate == 0 {
                    return invalid("baudrate must be > 0".into());
                }
                if bus.packet_size == 0 {
                    return invalid("packet_size must be > 0".into());
                }
            },
            BusConfig::Spi(bus) => {
                if bus.mode > 3 {
                    return invalid(format!("SPI mode must be 0..=3, got {}", bus.mode));
                }
                if bus.max_speed_hz == 0 {
                    return invalid("max_speed_hz must be > 0".into());
                }
                if bus.msg_len_length == 0 && bus.packet_size == 0 {
                    return invalid("packet_size must be > 0".into());
                }
            },
            BusConfig::Can(bus) => {
                if bus.interface.is_empty() {
                    return invalid("CAN interface name is empty".into());
                }
                if bus.bitrate == 0 {
                    return invalid("bitrate must be > 0".into());
                }
            },
        }
        self.codec().map(|_| ())
    }

    /// 构造本平台的默认传输（未打开）
    #[cfg(target_os = "linux")]
    pub fn default_transport(&self, link: &LinkConfig) -> Result<Box<dyn Transport>, DriverError> {
        use hwlink_transport::{
            SerialTransport, SerialTransportConfig, SocketCanTransport, SpiReadMode, SpiTransport,
            SpiTransportConfig,
        };
        use std::time::Duration;

        Ok(match self {
            BusConfig::Serial(bus) => Box::new(SerialTransport::new(SerialTransportConfig {
                port: bus.port.clone(),
                baudrate: bus.baudrate,
                terminator: bus.terminator,
                packet_size: bus.packet_size,
                frame_gap: Duration::from_millis(bus.frame_gap_ms),
                read_timeout: link.recv_timeout(),
            })),
            BusConfig::Spi(bus) => {
                let read_mode = if bus.msg_len_length > 0 {
                    SpiReadMode::LengthPrefixed {
                        id_width: bus.msg_id_length,
                        len_width: bus.msg_len_length,
                        endianness: bus.endianness,
                        max_payload: SPI_BUFFER_THRESHOLD,
                    }
                } else {
                    SpiReadMode::Fixed {
                        packet_size: bus.packet_size,
                    }
                };
                Box::new(SpiTransport::new(SpiTransportConfig {
                    bus: bus.bus,
                    device: bus.device,
                    mode: bus.mode,
                    max_speed_hz: bus.max_speed_hz,
                    read_mode,
                    read_timeout: link.recv_timeout(),
                }))
            },
            BusConfig::Can(bus) => match bus.backend {
                CanBackend::SocketCan => {
                    if bus.fd {
                        return Err(ConfigurationError::Invalid(
                            "CAN FD is not supported by the socketcan backend".into(),
                        )
                        .into());
                    }
                    Box::new(SocketCanTransport::new(
                        bus.interface.clone(),
                        bus.bitrate,
                        bus.extended_id,
                    ))
                },
            },
        })
    }

    /// 构造本平台的默认传输（未打开）
    #[cfg(not(target_os = "linux"))]
    pub fn default_transport(&self, _link: &LinkConfig) -> Result<Box<dyn Transport>, DriverError> {
        Err(ConfigurationError::Invalid(format!(
            "no native {} transport on this platform; supply one with `.transport(..)`",
            self.kind()
        ))
        .into())
    }
}
