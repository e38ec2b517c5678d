//! hwlink SDK - Serial / SPI / CAN 统一消息收发
//!
//! 以统一的发送方 / 接收方接口在不同物理链路上收发带帧头的消息，
//! 连接管理、重试与接收缓冲对调用方透明。
//!
//! # 架构设计
//!
//! 从底层到高层：
//!
//! - **协议层** (`protocol`): 帧编解码、结构体格式、浮点字段
//! - **传输层** (`transport`): Serial / SPI / SocketCAN 原始读写
//! - **驱动层** (`driver`): 连接管理、接收线程、注册表、发送方 / 接收方
//! - **设备层** (`devices`): 编码器、IMU、执行器命令
//!
//! # 快速开始
//!
//! ```no_run
//! use hwlink_sdk::prelude::*;
//!
//! hwlink_sdk::init_logging();
//!
//! let sender = SenderBuilder::new("cmd", SerialBus::new("/dev/ttyACM0").msg_id_length(1))
//!     .msg_id(0x10)
//!     .build()?;
//! sender.send(b"hi");
//! # Ok::<(), DriverError>(())
//! ```

pub mod logging;
pub mod prelude;

pub use hwlink_devices as devices;
pub use hwlink_driver as driver;
pub use hwlink_protocol as protocol;
pub use hwlink_transport as transport;

// 驱动层常用类型
pub use driver::{
    BusConfig, CanBus, ChannelKey, ChannelRegistry, ConnectionState, DriverError, LinkConfig, Receiver,
    ReceiverBuilder, SendStatus, Sender, SenderBuilder, SerialBus, SpiBus,
};

// 设备层
pub use devices::{ActuatorCommands, CanImu, DecoderError, Encoder, EncoderConfig, ImuReading, Protocol, SerialImu};

// 协议层 / 传输层错误
pub use protocol::{ConfigurationError, FramingError};
pub use transport::{Transport, TransportError};

pub use logging::{init_logging, init_logging_to_file, try_init_logging};
