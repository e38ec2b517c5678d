//! 设备使用的总线选择

use hwlink_driver::{BusConfig, BusKind, CanBus, SerialBus};
use hwlink_protocol::ConfigurationError;

/// 设备驱动可选的总线
///
/// 编码器、IMU 等设备只支持串口与 CAN 两种连接方式。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    Serial(SerialBus),
    Can(CanBus),
}

impl Protocol {
    /// 按名称构造（`"serial"` / `"can"`，不区分大小写）
    ///
    /// # 参数
    ///
    /// - `name`: 协议名
    /// - `channel`: 串口设备路径或 CAN 接口名
    /// - `msg_id_length`: 串口帧头中消息 ID 的宽度（CAN 忽略）
    ///
    /// # 示例
    ///
    /// ```
    /// use hwlink_devices::Protocol;
    ///
    /// let protocol = Protocol::from_name("CAN", "can1", 0).unwrap();
    /// assert!(matches!(protocol, Protocol::Can(ref bus) if bus.interface == "can1"));
    /// assert!(Protocol::from_name("usb", "x", 0).is_err());
    /// ```
    pub fn from_name(name: &str, channel: &str, msg_id_length: u8) -> Result<Self, ConfigurationError> {
        match name.to_ascii_lowercase().as_str() {
            "serial" => Ok(Protocol::Serial(SerialBus::new(channel).msg_id_length(msg_id_length))),
            "can" => Ok(Protocol::Can(CanBus::new(channel))),
            other => Err(ConfigurationError::Invalid(format!(
                "unsupported protocol '{other}': must be 'serial' or 'can'"
            ))),
        }
    }

    pub fn kind(&self) -> BusKind {
        match self {
            Protocol::Serial(_) => BusKind::Serial,
            Protocol::Can(_) => BusKind::Can,
        }
    }
}

impl From<SerialBus> for Protocol {
    fn from(bus: SerialBus) -> Self {
        Protocol::Serial(bus)
    }
}

impl From<CanBus> for Protocol {
    fn from(bus: CanBus) -> Self {
        Protocol::Can(bus)
    }
}

impl From<Protocol> for BusConfig {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Serial(bus) => BusConfig::Serial(bus),
            Protocol::Can(bus) => BusConfig::Can(bus),
        }
    }
}
