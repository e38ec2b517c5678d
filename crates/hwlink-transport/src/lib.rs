//! # hwlink Transport
//!
//! 物理链路抽象层：把 Serial/UART、SPI、CAN 统一为 [`Transport`] 能力接口。
//!
//! 上层（连接管理、接收循环）只依赖 `open` / `raw_write` / `raw_read` / `close`
//! 四个原语，不关心具体总线。
//!
//! ## 后端
//!
//! | 后端 | 平台 | 模块 |
//! |------|------|------|
//! | UART | Linux（termios） | [`serial`] |
//! | SPI | Linux（spidev） | [`spi`] |
//! | SocketCAN | Linux | [`socketcan`] |
//! | Mock | 全平台（`mock` feature） | [`mock`] |

use hwlink_protocol::{MessageId, Packet};
use std::time::Duration;
use thiserror::Error;

pub use hwlink_protocol;

#[cfg(target_os = "linux")]
pub mod serial;
#[cfg(target_os = "linux")]
pub mod socketcan;
#[cfg(target_os = "linux")]
pub mod spi;

#[cfg(target_os = "linux")]
pub use serial::{SerialTransport, SerialTransportConfig};
#[cfg(target_os = "linux")]
pub use socketcan::SocketCanTransport;
#[cfg(target_os = "linux")]
pub use spi::{SpiReadMode, SpiTransport, SpiTransportConfig};

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(any(test, feature = "mock"))]
pub use mock::MockTransport;

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] DeviceError),
    /// 读超时：在读取时限内没有数据，不是故障
    #[error("Read timeout")]
    Timeout,
    #[error("Buffer overflow")]
    BufferOverflow,
    #[error("Bus off")]
    BusOff,
    #[error("Transport not open")]
    NotOpen,
}

impl TransportError {
    /// 是否为设备级致命错误（设备消失、权限不足等）
    ///
    /// 致命错误仍然走重连流程，但以 `error` 级别记录。
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::Device(e) => e.is_fatal(),
            TransportError::BusOff => true,
            _ => false,
        }
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    Busy,
    UnsupportedConfig,
    InvalidFrame,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    pub message: String,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            DeviceErrorKind::NoDevice | DeviceErrorKind::AccessDenied | DeviceErrorKind::NotFound
        )
    }

    /// 根据打开设备时的 IO 错误推断分类
    pub fn from_open_error(path: &str, err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => DeviceErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => DeviceErrorKind::AccessDenied,
            _ if err.raw_os_error() == Some(16) => DeviceErrorKind::Busy, // EBUSY
            _ if err.raw_os_error() == Some(19) => DeviceErrorKind::NoDevice, // ENODEV
            _ => DeviceErrorKind::Backend,
        };
        Self::new(kind, format!("Failed to open '{}': {}", path, err))
    }
}

impl From<String> for DeviceError {
    fn from(message: String) -> Self {
        Self::new(DeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for DeviceError {
    fn from(message: &str) -> Self {
        Self::new(DeviceErrorKind::Unknown, message)
    }
}

/// 物理链路能力接口
///
/// 每种总线一个实现。实现者独占底层句柄（端口、socket、spidev 文件），
/// 由上层的连接管理器串行调用，因此方法都取 `&mut self`。
///
/// # 读语义
///
/// `raw_read` 在读取时限内阻塞：
/// - 有数据：返回一个 [`Packet`]（流式总线为一段原始字节，CAN 为一帧）
/// - 无数据：返回 [`TransportError::Timeout`]，调用方应视为正常并继续循环
pub trait Transport: Send {
    /// 打开底层设备
    ///
    /// 已打开时再次调用应当是无害的。
    fn open(&mut self) -> Result<(), TransportError>;

    /// 底层设备是否处于打开状态
    fn is_open(&self) -> bool;

    /// 写出一个数据包
    fn raw_write(&mut self, packet: &Packet) -> Result<(), TransportError>;

    /// 读取一个数据包（阻塞至读取时限）
    fn raw_read(&mut self) -> Result<Packet, TransportError>;

    /// 关闭底层设备（幂等）
    fn close(&mut self);

    /// 人类可读的链路描述（用于日志）
    fn describe(&self) -> String;

    /// 设置 `raw_read` 的读取时限
    fn set_read_timeout(&mut self, _timeout: Duration) {}

    /// 丢弃尚未发出的输出
    ///
    /// 已到达但尚未读取的输入不受影响。
    fn clear_buffers(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// 设置接收过滤（仅 CAN 有意义，空列表表示接收全部）
    fn set_filters(&mut self, _ids: &[MessageId]) -> Result<(), TransportError> {
        Ok(())
    }

    /// 非阻塞风格的读取：超时映射为 `Ok(None)`
    fn try_read(&mut self) -> Result<Option<Packet>, TransportError> {
        match self.raw_read() {
            Ok(packet) => Ok(Some(packet)),
            Err(TransportError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<(), TransportError> {
        (**self).open()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn raw_write(&mut self, packet: &Packet) -> Result<(), TransportError> {
        (**self).raw_write(packet)
    }

    fn raw_read(&mut self) -> Result<Packet, TransportError> {
        (**self).raw_read()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        (**self).set_read_timeout(timeout)
    }

    fn clear_buffers(&mut self) -> Result<(), TransportError> {
        (**self).clear_buffers()
    }

    fn set_filters(&mut self, ids: &[MessageId]) -> Result<(), TransportError> {
        (**self).set_filters(ids)
    }
}

/// 当前 Unix 时间（微秒），用于软件时间戳
pub(crate) fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
