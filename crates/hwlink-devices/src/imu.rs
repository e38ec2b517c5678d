//! IMU（三轴加速度 + 三轴角速度）
//!
//! 两种接入方式：
//! - [`SerialImu`]: 一条消息携带 6 个浮点数
//! - [`CanImu`]: 6 个轴各占一个 CAN ID，分别到达，读取时合并

use crate::error::DecoderError;
use hwlink_driver::{BusKind, CanBus, ChannelRegistry, LinkConfig, Receiver, ReceiverBuilder};
use hwlink_protocol::framing::CAN_CLASSIC_PAYLOAD_MAX;
use hwlink_protocol::{ConfigurationError, Endianness, FloatWidth, MessageId, decode_floats};
use hwlink_transport::Transport;
use std::sync::Arc;
use tracing::warn;

/// 轴名后缀（顺序即读数顺序）
pub const AXIS_SUFFIXES: [&str; 6] = ["ax", "ay", "az", "gx", "gy", "gz"];

/// CAN IMU 默认波特率
pub const IMU_CAN_BITRATE: u32 = 500_000;

/// 一次 IMU 读数
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImuReading {
    /// 加速度 [x, y, z]
    pub accel: [f64; 3],
    /// 角速度 [x, y, z]
    pub gyro: [f64; 3],
}

impl ImuReading {
    /// 从 6 个值构造（顺序 ax, ay, az, gx, gy, gz）
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        match values {
            [ax, ay, az, gx, gy, gz] => Some(Self {
                accel: [*ax, *ay, *az],
                gyro: [*gx, *gy, *gz],
            }),
            _ => None,
        }
    }

    pub fn to_array(&self) -> [f64; 6] {
        [
            self.accel[0],
            self.accel[1],
            self.accel[2],
            self.gyro[0],
            self.gyro[1],
            self.gyro[2],
        ]
    }
}

/// 单消息 IMU（串口 / SPI）
#[derive(Debug)]
pub struct SerialImu {
    receiver: Receiver,
    float_width: FloatWidth,
    endianness: Endianness,
}

impl SerialImu {
    /// # 错误
    ///
    /// 接收方位于 CAN 总线时返回配置错误（6 个浮点数放不进一帧）。
    pub fn new(receiver: Receiver, float_width: FloatWidth, endianness: Endianness) -> Result<Self, DecoderError> {
        if receiver.bus_kind() == BusKind::Can {
            return Err(ConfigurationError::CanPayloadTooLong {
                len: 6 * float_width.bytes(),
                max: CAN_CLASSIC_PAYLOAD_MAX,
            }
            .into());
        }
        Ok(Self {
            receiver,
            float_width,
            endianness,
        })
    }

    /// 最新读数
    ///
    /// 无数据或负载长度不符时返回 `None`。
    pub fn receive(&self) -> Option<ImuReading> {
        let payload = self.receiver.receive()?;
        match decode_floats(&payload, 6, self.float_width, self.endianness) {
            Ok(values) => ImuReading::from_slice(&values),
            Err(e) => {
                warn!("IMU '{}': {}", self.receiver.msg_name(), e);
                None
            },
        }
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    pub fn stop(&self) {
        self.receiver.stop();
    }
}

/// 六消息 IMU（CAN）
///
/// 只有当 6 个轴都至少收到过一次值时才返回读数；每次读取都取各轴的最新值，
/// 不检查各轴之间的时间差。
#[derive(Debug)]
pub struct CanImu {
    axes: Vec<Receiver>,
    float_width: FloatWidth,
    endianness: Endianness,
}

impl CanImu {
    pub fn builder(msg_name: impl Into<String>, bus: CanBus, msg_ids: [MessageId; 6]) -> CanImuBuilder {
        CanImuBuilder::new(msg_name, bus, msg_ids)
    }

    /// 合并后的最新读数
    pub fn receive(&self) -> Option<ImuReading> {
        if self.ready_axes() < self.axes.len() {
            return None;
        }
        let mut values = [0.0; 6];
        for (value, axis) in values.iter_mut().zip(&self.axes) {
            let payload = axis.receive()?;
            match decode_floats(&payload, 1, self.float_width, self.endianness) {
                Ok(decoded) => *value = decoded.first().copied().unwrap_or_default(),
                Err(e) => {
                    warn!("IMU axis '{}': {}", axis.msg_name(), e);
                    return None;
                },
            }
        }
        let [ax, ay, az, gx, gy, gz] = values;
        Some(ImuReading {
            accel: [ax, ay, az],
            gyro: [gx, gy, gz],
        })
    }

    /// 至少一个轴有未读值时返回合并读数，并把各轴标记为已读
    pub fn receive_fresh(&self) -> Option<ImuReading> {
        if !self.axes.iter().any(Receiver::has_fresh) {
            return None;
        }
        self.receive()
    }

    /// 已收到值的轴数
    pub fn ready_axes(&self) -> usize {
        self.axes.iter().filter(|axis| axis.has_value()).count()
    }

    pub fn axes(&self) -> &[Receiver] {
        &self.axes
    }

    pub fn stop(&self) {
        for axis in &self.axes {
            axis.stop();
        }
    }
}

/// [`CanImu`] 构建器
pub struct CanImuBuilder {
    msg_name: String,
    bus: CanBus,
    msg_ids: [MessageId; 6],
    float_width: FloatWidth,
    endianness: Endianness,
    link: LinkConfig,
    registry: Option<Arc<ChannelRegistry>>,
    transport: Option<Box<dyn Transport>>,
}

impl CanImuBuilder {
    /// 波特率默认为 [`IMU_CAN_BITRATE`]，每轴默认 f64 小端
    pub fn new(msg_name: impl Into<String>, bus: CanBus, msg_ids: [MessageId; 6]) -> Self {
        Self {
            msg_name: msg_name.into(),
            bus: bus.bitrate(IMU_CAN_BITRATE),
            msg_ids,
            float_width: FloatWidth::F64,
            endianness: Endianness::Little,
            link: LinkConfig::default(),
            registry: None,
            transport: None,
        }
    }

    pub fn bitrate(mut self, bitrate: u32) -> Self {
        self.bus = self.bus.bitrate(bitrate);
        self
    }

    pub fn float_width(mut self, width: FloatWidth) -> Self {
        self.float_width = width;
        self
    }

    pub fn endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn link_config(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    pub fn registry(mut self, registry: Arc<ChannelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 自定义传输（由第一个轴的接收方使用，其余轴共享同一通道）
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// 构建 6 个接收方 `{name}_ax` .. `{name}_gz`
    ///
    /// 任一轴失败时已构建的轴会被释放。
    pub fn build(self) -> Result<CanImu, DecoderError> {
        let mut transport = self.transport;
        let mut axes = Vec::with_capacity(6);
        for (suffix, msg_id) in AXIS_SUFFIXES.iter().zip(self.msg_ids) {
            let mut builder = ReceiverBuilder::new(format!("{}_{}", self.msg_name, suffix), self.bus.clone())
                .msg_id(msg_id)
                .link_config(self.link);
            if let Some(registry) = &self.registry {
                builder = builder.registry(Arc::clone(registry));
            }
            if let Some(transport) = transport.take() {
                builder = builder.transport(transport);
            }
            axes.push(builder.build()?);
        }
        Ok(CanImu {
            axes,
            float_width: self.float_width,
            endianness: self.endianness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwlink_driver::SerialBus;
    use hwlink_protocol::{Packet, encode_floats};
    use hwlink_transport::mock::MockTransport;
    use std::thread;
    use std::time::{Duration, Instant};

    fn fast_link() -> LinkConfig {
        LinkConfig {
            connect_timeout_ms: 500,
            retry_interval_ms: 10,
            recv_timeout_ms: 5,
            stop_grace_ms: 1000,
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_reading_layout() {
        let reading = ImuReading::from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(reading.accel, [1.0, 2.0, 3.0]);
        assert_eq!(reading.gyro, [4.0, 5.0, 6.0]);
        assert_eq!(reading.to_array(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(ImuReading::from_slice(&[1.0; 5]).is_none());
    }

    #[test]
    fn test_serial_imu() {
        let mock = MockTransport::new();
        let receiver = ReceiverBuilder::new("imu", SerialBus::new("/dev/ttyI0"))
            .link_config(fast_link())
            .registry(ChannelRegistry::new())
            .transport(mock.clone())
            .build()
            .unwrap();
        let imu = SerialImu::new(receiver, FloatWidth::F32, Endianness::Little).unwrap();
        assert!(imu.receive().is_none());

        let values = [0.1, 0.2, 9.81, 0.0, -0.5, 1.0];
        mock.push_bytes(&encode_floats(&values, FloatWidth::F32, Endianness::Little));
        assert!(wait_until(Duration::from_secs(2), || imu.receive().is_some()));

        let reading = imu.receive().unwrap();
        assert!((reading.accel[2] - 9.81).abs() < 1e-5);
        assert_eq!(reading.gyro[1], -0.5);
    }

    #[test]
    fn test_can_imu_waits_for_all_axes() {
        let registry = ChannelRegistry::new();
        let mock = MockTransport::new();
        let ids = [0x101, 0x102, 0x103, 0x104, 0x105, 0x106];
        let imu = CanImu::builder("imu", CanBus::new("vcanI0"), ids)
            .link_config(fast_link())
            .registry(registry.clone())
            .transport(mock.clone())
            .build()
            .unwrap();
        assert_eq!(registry.instances().len(), 6);
        assert!(registry.instance("imu_gz").is_some());
        assert_eq!(mock.filters(), ids.to_vec());

        let axis = |id: MessageId, v: f64| Packet::can(id, false, encode_floats(&[v], FloatWidth::F64, Endianness::Little));
        for (i, id) in ids.iter().take(3).enumerate() {
            mock.push_incoming(axis(*id, i as f64));
        }
        assert!(wait_until(Duration::from_secs(2), || imu.ready_axes() == 3));
        assert!(imu.receive().is_none());

        for (i, id) in ids.iter().enumerate().skip(3) {
            mock.push_incoming(axis(*id, i as f64));
        }
        assert!(wait_until(Duration::from_secs(2), || imu.ready_axes() == 6));
        let reading = imu.receive().unwrap();
        assert_eq!(reading.to_array(), [0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

        // 读取不消耗值：旧轴仍可参与下一次合并
        mock.push_incoming(axis(0x101, 42.0));
        assert!(wait_until(Duration::from_secs(2), || imu.receive().map(|r| r.accel[0]) == Some(42.0)));

        imu.stop();
        assert!(registry.instances().is_empty());
    }

    #[test]
    fn test_can_imu_receive_fresh() {
        let registry = ChannelRegistry::new();
        let mock = MockTransport::new();
        let ids = [0x111, 0x112, 0x113, 0x114, 0x115, 0x116];
        let imu = CanImu::builder("imu_fresh", CanBus::new("vcanI2"), ids)
            .link_config(fast_link())
            .registry(registry.clone())
            .transport(mock.clone())
            .build()
            .unwrap();

        let axis = |id: MessageId, v: f64| Packet::can(id, false, encode_floats(&[v], FloatWidth::F64, Endianness::Little));
        for (i, id) in ids.iter().take(5).enumerate() {
            mock.push_incoming(axis(*id, i as f64));
        }
        assert!(wait_until(Duration::from_secs(2), || imu.ready_axes() == 5));
        // 缺一个轴：不合并，也不消耗已到的值
        assert!(imu.receive_fresh().is_none());

        mock.push_incoming(axis(ids[5], 5.0));
        assert!(wait_until(Duration::from_secs(2), || imu.ready_axes() == 6));
        let reading = imu.receive_fresh().unwrap();
        assert_eq!(reading.to_array(), [0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(imu.receive_fresh().is_none());
        assert!(imu.receive().is_some());

        // 单个轴更新即可再次得到新读数
        mock.push_incoming(axis(ids[2], 9.0));
        assert!(wait_until(Duration::from_secs(2), || imu.axes()[2].has_fresh()));
        assert_eq!(imu.receive_fresh().unwrap().accel[2], 9.0);
        imu.stop();
    }

    #[test]
    fn test_serial_imu_rejects_can_receiver() {
        let receiver = ReceiverBuilder::new("imu_can", CanBus::new("vcanI1"))
            .msg_id(0x10)
            .link_config(fast_link())
            .registry(ChannelRegistry::new())
            .transport(MockTransport::new())
            .build()
            .unwrap();
        assert!(SerialImu::new(receiver, FloatWidth::F32, Endianness::Little).is_err());
    }
}
