//! 编码器
//!
//! 编码器负载是 `num_encoders` 个连续排列的定宽浮点数。

use crate::error::DecoderError;
use crate::protocol::Protocol;
use hwlink_driver::{BusKind, Receiver, ReceiverBuilder};
use hwlink_protocol::framing::CAN_CLASSIC_PAYLOAD_MAX;
use hwlink_protocol::{ConfigurationError, Endianness, FloatWidth, FramingError, MessageId, decode_floats};
use tracing::error;

/// 编码器负载布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EncoderConfig {
    /// 编码器个数（≥ 1）
    pub num_encoders: usize,
    pub float_width: FloatWidth,
    pub endianness: Endianness,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            num_encoders: 1,
            float_width: FloatWidth::F64,
            endianness: Endianness::Little,
        }
    }
}

impl EncoderConfig {
    pub fn new(num_encoders: usize) -> Self {
        Self {
            num_encoders,
            ..Self::default()
        }
    }

    pub fn float_width(mut self, width: FloatWidth) -> Self {
        self.float_width = width;
        self
    }

    pub fn endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    /// 期望的负载字节数
    pub fn payload_len(&self) -> usize {
        self.num_encoders * self.float_width.bytes()
    }

    /// 校验布局（CAN 上负载不能超过一帧）
    pub fn validate(&self, bus: BusKind) -> Result<(), ConfigurationError> {
        if self.num_encoders == 0 {
            return Err(ConfigurationError::Invalid("num_encoders must be greater than 0".into()));
        }
        if bus == BusKind::Can && self.payload_len() > CAN_CLASSIC_PAYLOAD_MAX {
            return Err(ConfigurationError::CanPayloadTooLong {
                len: self.payload_len(),
                max: CAN_CLASSIC_PAYLOAD_MAX,
            });
        }
        Ok(())
    }

    /// 解码一个负载
    pub fn decode(&self, payload: &[u8]) -> Result<Vec<f64>, FramingError> {
        decode_floats(payload, self.num_encoders, self.float_width, self.endianness)
    }
}

/// 编码器读数接收方
#[derive(Debug)]
pub struct Encoder {
    receiver: Receiver,
    config: EncoderConfig,
}

impl Encoder {
    /// 在已构建的接收方上创建编码器
    ///
    /// # 错误
    ///
    /// 布局非法（个数为 0，或 CAN 上超过 8 字节）时返回配置错误。
    pub fn new(receiver: Receiver, config: EncoderConfig) -> Result<Self, DecoderError> {
        config.validate(receiver.bus_kind())?;
        Ok(Self { receiver, config })
    }

    /// 以默认链路设置在全局注册表上创建编码器
    ///
    /// 布局在打开设备之前校验。
    pub fn open(
        msg_name: impl Into<String>,
        protocol: impl Into<Protocol>,
        msg_id: MessageId,
        config: EncoderConfig,
    ) -> Result<Self, DecoderError> {
        let protocol = protocol.into();
        config.validate(protocol.kind())?;
        let receiver = ReceiverBuilder::new(msg_name, protocol).msg_id(msg_id).build()?;
        Self::new(receiver, config)
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// 最新读数
    ///
    /// 无数据时返回 `None`；负载长度不符时记录错误日志并返回 `None`。
    pub fn receive(&self) -> Option<Vec<f64>> {
        let payload = self.receiver.receive()?;
        self.decode_logged(&payload)
    }

    /// 仅在有未读数据时返回读数
    pub fn receive_fresh(&self) -> Option<Vec<f64>> {
        let payload = self.receiver.receive_fresh()?;
        self.decode_logged(&payload)
    }

    /// 单个编码器的读数（多个编码器时取第一个）
    pub fn receive_single(&self) -> Option<f64> {
        self.receive().and_then(|values| values.first().copied())
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    pub fn stop(&self) {
        self.receiver.stop();
    }

    fn decode_logged(&self, payload: &[u8]) -> Option<Vec<f64>> {
        match self.config.decode(payload) {
            Ok(values) => Some(values),
            Err(e) => {
                error!("Encoder '{}': error unpacking encoder data: {}", self.receiver.msg_name(), e);
                None
            },
        }
    }
}
