//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use hwlink_sdk::prelude::*;
//! ```

// 驱动层（构建器与角色对象）
pub use crate::driver::{
    BusConfig, CanBus, ChannelRegistry, ConnectionState, LinkConfig, Receiver, ReceiverBuilder, SendStatus,
    Sender, SenderBuilder, SerialBus, SpiBus,
};

// 设备层
pub use crate::devices::{ActuatorCommands, CanImu, Encoder, EncoderConfig, ImuReading, SerialImu};

// 协议层
pub use crate::protocol::{Endianness, FloatWidth, MessageId, Value};

// 错误类型
pub use crate::devices::DecoderError;
pub use crate::driver::DriverError;
pub use crate::protocol::{ConfigurationError, FramingError};
pub use crate::transport::TransportError;
