//! 驱动层模块
//!
//! 在传输层之上提供面向消息的发送方 / 接收方，包括：
//! - 通道共享（同一物理端点上的实例共用一个连接）
//! - 连接管理（带重试的打开、写失败重连、幂等关闭）
//! - 后台接收线程（解码、按消息 ID 投递到最新值槽位）
//! - 注册表（实例唯一性、诊断与统计查询）
//!
//! # 使用场景
//!
//! 适用于直接以字节负载收发消息的场景；需要浮点数组或结构化命令时，
//! 使用 `hwlink-devices` 提供的更高级接口。

mod builder;
pub mod bus;
mod channel;
pub mod config;
pub mod connection;
mod error;
pub mod heartbeat;
mod pipeline;
mod receiver;
pub mod registry;
mod sender;
pub mod slot;
pub mod state;
pub mod stats;

pub use builder::{ReceiverBuilder, SenderBuilder};
pub use bus::{BusConfig, BusKind, CanBackend, CanBus, ChannelKey, SerialBus, SpiBus};
pub use config::LinkConfig;
pub use connection::ConnectionManager;
pub use error::DriverError;
pub use heartbeat::LinkMonitor;
pub use receiver::Receiver;
pub use registry::{ChannelRegistry, InstanceMetadata, Role};
pub use sender::{SendStatus, Sender};
pub use slot::ReceivedMessage;
pub use state::{AtomicConnectionState, ConnectionState};
pub use stats::ChannelStatsSnapshot;

pub use hwlink_protocol::{Endianness, MessageId};
