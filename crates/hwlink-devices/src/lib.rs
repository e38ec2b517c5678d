//! 设备层模块
//!
//! 在发送方 / 接收方之上解释负载字段：
//! - [`Encoder`]: 定宽浮点数组
//! - [`SerialImu`] / [`CanImu`]: 6 轴 IMU 读数
//! - [`ActuatorCommands`]: 按结构体格式串打包的命令
//!
//! 所有参数校验在构造时完成，发送时的取值校验在 I/O 之前完成。

pub mod actuator;
pub mod encoder;
mod error;
pub mod imu;
mod protocol;

pub use actuator::{ActuatorCommands, PercentPairCommands};
pub use encoder::{Encoder, EncoderConfig};
pub use error::DecoderError;
pub use imu::{AXIS_SUFFIXES, CanImu, CanImuBuilder, IMU_CAN_BITRATE, ImuReading, SerialImu};
pub use protocol::Protocol;

pub use hwlink_protocol::{FloatWidth, Value};
