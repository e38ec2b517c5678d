//! 执行器命令
//!
//! 按结构体格式串（每个字符一个字段）打包一组命令值，经发送方发出。
//! 格式、名称与取值的校验都在 I/O 之前完成。

use crate::error::DecoderError;
use hwlink_driver::{SendStatus, Sender};
use hwlink_protocol::{ConfigurationError, Endianness, StructFormat, Value};
use std::collections::HashSet;

/// 结构化执行器命令发送方
#[derive(Debug)]
pub struct ActuatorCommands {
    sender: Sender,
    format: StructFormat,
    names: Option<Vec<String>>,
}

impl ActuatorCommands {
    /// # 参数
    ///
    /// - `sender`: 底层发送方
    /// - `format`: 格式串，字符取自 `b B ? h H i I q Q e f d`，不带字节序前缀
    /// - `names`: 可选的执行器名称，必须唯一且数量等于字段数
    /// - `endianness`: 打包字节序
    ///
    /// # 错误
    ///
    /// 格式串非法、名称不符，或打包后长度超过发送方的单帧上限（CAN 为 8 字节）。
    ///
    /// # 示例
    ///
    /// ```no_run
    /// use hwlink_devices::ActuatorCommands;
    /// use hwlink_driver::{Endianness, SenderBuilder, SerialBus};
    /// use hwlink_protocol::Value;
    ///
    /// let sender = SenderBuilder::new("actuator_commands", SerialBus::new("/dev/ttyACM0").msg_id_length(1))
    ///     .msg_id(0x10)
    ///     .build()?;
    /// let commands = ActuatorCommands::new(
    ///     sender,
    ///     "bf",
    ///     Some(vec!["actuator1".into(), "actuator2".into()]),
    ///     Endianness::Little,
    /// )?;
    /// commands.send(&[Value::from(1i8), Value::from(2.5f32)])?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new(
        sender: Sender,
        format: &str,
        names: Option<Vec<String>>,
        endianness: Endianness,
    ) -> Result<Self, DecoderError> {
        let format = StructFormat::parse(format, endianness)?;
        if let Some(max) = sender.max_payload()
            && format.size() > max
        {
            return Err(ConfigurationError::Invalid(format!(
                "format '{}' packs to {} bytes, one message carries at most {}",
                format.to_prefixed_string(),
                format.size(),
                max
            ))
            .into());
        }
        if let Some(names) = &names {
            validate_names(names, format.len())?;
        }
        Ok(Self { sender, format, names })
    }

    pub fn format(&self) -> &StructFormat {
        &self.format
    }

    pub fn names(&self) -> Option<&[String]> {
        self.names.as_deref()
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    /// 按字段顺序发送一组值
    ///
    /// # 错误
    ///
    /// 数量、类型或范围不符时返回配置错误，不做任何 I/O；
    /// 传输失败体现在返回的 [`SendStatus`] 中。
    pub fn send(&self, values: &[Value]) -> Result<SendStatus, DecoderError> {
        let packed = self.format.pack(values)?;
        Ok(self.sender.send(&packed))
    }

    /// 按执行器名称发送（顺序任意，每个名称恰好出现一次）
    pub fn send_named(&self, values: &[(&str, Value)]) -> Result<SendStatus, DecoderError> {
        let Some(names) = &self.names else {
            return Err(ConfigurationError::Invalid("actuator names were not configured".into()).into());
        };
        if values.len() != names.len() {
            return Err(ConfigurationError::ValueCountMismatch {
                expected: names.len(),
                actual: values.len(),
            }
            .into());
        }

        let mut ordered: Vec<Option<Value>> = vec![None; names.len()];
        for (name, value) in values {
            let index = names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| ConfigurationError::Invalid(format!("unknown actuator '{name}'")))?;
            if ordered[index].replace(*value).is_some() {
                return Err(ConfigurationError::Invalid(format!("actuator '{name}' given twice")).into());
            }
        }
        let ordered: Vec<Value> = ordered.into_iter().flatten().collect();
        self.send(&ordered)
    }

    pub fn stop(&self) {
        self.sender.stop();
    }
}

fn validate_names(names: &[String], fields: usize) -> Result<(), ConfigurationError> {
    let unique: HashSet<&str> = names.iter().map(String::as_str).collect();
    if unique.len() != names.len() {
        return Err(ConfigurationError::Invalid(format!(
            "actuator names must be unique, got {names:?}"
        )));
    }
    if names.len() != fields {
        return Err(ConfigurationError::Invalid(format!(
            "actuator names length must match the format length, got {} and {}",
            names.len(),
            fields
        )));
    }
    Ok(())
}

/// 双通道百分比命令
///
/// 两个有符号 8 位字段，取值钳位到 [-100, 100]。
#[derive(Debug)]
pub struct PercentPairCommands {
    inner: ActuatorCommands,
}

impl PercentPairCommands {
    pub const LIMIT: i64 = 100;

    pub fn new(sender: Sender) -> Result<Self, DecoderError> {
        Ok(Self {
            inner: ActuatorCommands::new(sender, "bb", None, Endianness::Little)?,
        })
    }

    /// 截断为整数、钳位后发送
    pub fn send(&self, cmd1: f64, cmd2: f64) -> SendStatus {
        let clamp = |v: f64| Value::Int((v as i64).clamp(-Self::LIMIT, Self::LIMIT));
        match self.inner.send(&[clamp(cmd1), clamp(cmd2)]) {
            Ok(status) => status,
            Err(_) => SendStatus::Failed,
        }
    }

    pub fn stop(&self) {
        self.inner.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwlink_driver::{CanBus, ChannelRegistry, LinkConfig, SenderBuilder, SerialBus};
    use hwlink_transport::mock::MockTransport;

    fn sender_on(bus: impl Into<hwlink_driver::BusConfig>, mock: &MockTransport) -> Sender {
        SenderBuilder::new("actuators", bus)
            .msg_id(0x10)
            .link_config(LinkConfig::default().with_timeout(std::time::Duration::from_millis(200)))
            .registry(ChannelRegistry::new())
            .transport(mock.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn test_send_packs_with_endianness() {
        let mock = MockTransport::new();
        let commands = ActuatorCommands::new(
            sender_on(SerialBus::new("/dev/ttyA0").msg_id_length(1), &mock),
            "bf",
            Some(vec!["a1".into(), "a2".into()]),
            Endianness::Little,
        )
        .unwrap();

        let status = commands.send(&[Value::from(1i8), Value::from(2.5f32)]).unwrap();
        assert_eq!(status, SendStatus::Sent);
        assert_eq!(&mock.written()[0].data[..], &[0x10, 0x01, 0x00, 0x00, 0x20, 0x40]);
    }

    #[test]
    fn test_count_mismatch_fails_before_io() {
        let mock = MockTransport::new();
        let commands = ActuatorCommands::new(
            sender_on(SerialBus::new("/dev/ttyA1").msg_id_length(1), &mock),
            "hhf",
            None,
            Endianness::Little,
        )
        .unwrap();

        let err = commands.send(&[Value::from(1i16), Value::from(2i16)]).unwrap_err();
        assert!(matches!(
            err,
            DecoderError::Configuration(ConfigurationError::ValueCountMismatch { expected: 3, actual: 2 })
        ));
        assert!(mock.written().is_empty());
        assert_eq!(mock.open_calls(), 0);
    }

    #[test]
    fn test_value_type_and_range_checked() {
        let mock = MockTransport::new();
        let commands = ActuatorCommands::new(
            sender_on(SerialBus::new("/dev/ttyA2").msg_id_length(1), &mock),
            "B?",
            None,
            Endianness::Little,
        )
        .unwrap();

        assert!(commands.send(&[Value::from(256u16), Value::from(true)]).is_err());
        assert!(commands.send(&[Value::from(1.5), Value::from(true)]).is_err());
        assert!(commands.send(&[Value::from(255u8), Value::from(0i32)]).is_ok());
    }

    #[test]
    fn test_can_format_limited_to_eight_bytes() {
        let mock = MockTransport::new();
        let err = ActuatorCommands::new(
            sender_on(CanBus::new("vcanA0"), &mock),
            "dd",
            None,
            Endianness::Little,
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_names_validated() {
        let mock = MockTransport::new();
        let sender = sender_on(SerialBus::new("/dev/ttyA3"), &mock);
        assert!(ActuatorCommands::new(sender, "bb", Some(vec!["x".into(), "x".into()]), Endianness::Little).is_err());

        let sender = sender_on(SerialBus::new("/dev/ttyA4"), &mock);
        assert!(ActuatorCommands::new(sender, "bb", Some(vec!["x".into()]), Endianness::Little).is_err());

        let sender = sender_on(SerialBus::new("/dev/ttyA5"), &mock);
        assert!(ActuatorCommands::new(sender, "b<", None, Endianness::Little).is_err());
    }

    #[test]
    fn test_send_named_any_order() {
        let mock = MockTransport::new();
        let commands = ActuatorCommands::new(
            sender_on(SerialBus::new("/dev/ttyA6"), &mock),
            "bB",
            Some(vec!["left".into(), "right".into()]),
            Endianness::Big,
        )
        .unwrap();

        commands
            .send_named(&[("right", Value::from(7u8)), ("left", Value::from(-1i8))])
            .unwrap();
        assert_eq!(&mock.written()[0].data[..], &[0xFF, 0x07]);

        assert!(commands.send_named(&[("left", Value::from(1i8))]).is_err());
        assert!(
            commands
                .send_named(&[("left", Value::from(1i8)), ("left", Value::from(2i8))])
                .is_err()
        );
        assert!(
            commands
                .send_named(&[("left", Value::from(1i8)), ("middle", Value::from(2i8))])
                .is_err()
        );
    }

    #[test]
    fn test_percent_pair_clamps() {
        let mock = MockTransport::new();
        let commands = PercentPairCommands::new(sender_on(SerialBus::new("/dev/ttyA7"), &mock)).unwrap();
        assert!(commands.send(250.0, -99.7).is_sent());
        assert_eq!(&mock.written()[0].data[..], &[100, (-99i8) as u8]);
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(64))]
        #[test]
        fn test_percent_commands_stay_in_range(cmd1 in -1.0e6f64..1.0e6, cmd2 in -1.0e6f64..1.0e6) {
            let mock = MockTransport::new();
            let commands = PercentPairCommands::new(sender_on(SerialBus::new("/dev/ttyA9").msg_id_length(1), &mock)).unwrap();
            proptest::prop_assert_eq!(commands.send(cmd1, cmd2), SendStatus::Sent);

            let expect = |v: f64| (v as i64).clamp(-100, 100) as i8 as u8;
            let written = mock.written();
            proptest::prop_assert_eq!(&written[0].data[..], &[0x10, expect(cmd1), expect(cmd2)]);
        }
    }
}
