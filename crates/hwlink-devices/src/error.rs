//! 设备层错误类型定义

use hwlink_driver::DriverError;
use hwlink_protocol::{ConfigurationError, FramingError};
use thiserror::Error;

/// 设备层错误类型
#[derive(Error, Debug)]
pub enum DecoderError {
    /// 参数或取值非法（在任何 I/O 之前报告）
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// 负载与声明的字段布局不符
    #[error("Payload error: {0}")]
    Payload(#[from] FramingError),

    /// 底层发送方 / 接收方错误
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),
}

impl DecoderError {
    pub fn is_configuration(&self) -> bool {
        match self {
            DecoderError::Configuration(_) => true,
            DecoderError::Driver(e) => e.is_configuration(),
            DecoderError::Payload(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_configuration() {
        assert!(DecoderError::from(ConfigurationError::EmptyFormat).is_configuration());
        assert!(DecoderError::from(DriverError::from(ConfigurationError::EmptyFormat)).is_configuration());
        assert!(!DecoderError::from(DriverError::Timeout).is_configuration());
        assert!(
            !DecoderError::from(FramingError::PayloadLength {
                expected: 8,
                actual: 4
            })
            .is_configuration()
        );
    }
}
