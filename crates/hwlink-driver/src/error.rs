//! 驱动层错误类型定义

use hwlink_protocol::{ConfigurationError, FramingError};
use hwlink_transport::TransportError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 参数非法（构造时或违约的 send 时报告，不重试）
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// 帧解析错误
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 在重试时限内没能建立连接
    #[error("Connection to '{channel}' failed after {attempts} attempt(s): {reason}")]
    Connection {
        channel: String,
        attempts: u32,
        reason: String,
    },

    /// 实例已停止
    #[error("Instance already stopped")]
    Stopped,

    /// 操作超时
    #[error("Operation timeout")]
    Timeout,

    /// 通道被其它实例长时间占用
    #[error("Channel '{0}' busy")]
    ChannelBusy(String),
}

impl DriverError {
    /// 是否为配置错误（不应重试）
    pub fn is_configuration(&self) -> bool {
        matches!(self, DriverError::Configuration(_))
    }
}
