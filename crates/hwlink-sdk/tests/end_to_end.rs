//! SDK 端到端场景（Mock 传输）
//!
//! 发送端写出的数据包原样注入接收端的 Mock，模拟一条点对点链路。

use hwlink_sdk::prelude::*;
use hwlink_sdk::Protocol;
use hwlink_sdk::transport::mock::MockTransport;
use std::sync::Arc;
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

/// 把发送端已写出的数据包转发给接收端
fn forward(from: &MockTransport, to: &MockTransport, already: &mut usize) {
    let written = from.written();
    for packet in &written[*already..] {
        to.push_incoming(packet.clone());
    }
    *already = written.len();
}

#[test]
fn test_actuator_to_encoder_over_serial() {
    let registry = ChannelRegistry::new();
    let tx_mock = MockTransport::new();
    let rx_mock = MockTransport::new();

    let sender = SenderBuilder::new("wheel_cmd", SerialBus::new("/dev/ttyE0").msg_id_length(1))
        .msg_id(0x31)
        .link_config(fast_link())
        .registry(registry.clone())
        .transport(tx_mock.clone())
        .build()
        .unwrap();
    let commands = ActuatorCommands::new(
        sender,
        "ff",
        Some(vec!["left".into(), "right".into()]),
        Endianness::Little,
    )
    .unwrap();

    let receiver = ReceiverBuilder::new("wheel_speed", SerialBus::new("/dev/ttyE1").msg_id_length(1))
        .msg_id(0x31)
        .link_config(fast_link())
        .registry(registry.clone())
        .transport(rx_mock.clone())
        .build()
        .unwrap();
    let encoder = Encoder::new(receiver, EncoderConfig::new(2).float_width(FloatWidth::F32)).unwrap();
    assert!(encoder.receive().is_none());

    let status = commands
        .send_named(&[("right", Value::from(-2.0f32)), ("left", Value::from(1.5f32))])
        .unwrap();
    assert_eq!(status, SendStatus::Sent);

    let mut forwarded = 0;
    forward(&tx_mock, &rx_mock, &mut forwarded);
    assert!(wait_until(Duration::from_secs(2), || encoder.receiver().has_fresh()));
    assert_eq!(encoder.receive_fresh(), Some(vec![1.5, -2.0]));
    assert!(encoder.receive_fresh().is_none());

    commands.stop();
    encoder.stop();
    assert!(registry.instances().is_empty());
}

#[test]
fn test_actuator_rejects_wrong_arity_before_io() {
    let registry = ChannelRegistry::new();
    let mock = MockTransport::new();
    let sender = SenderBuilder::new("arm_cmd", SerialBus::new("/dev/ttyE2").msg_id_length(1))
        .msg_id(0x40)
        .link_config(fast_link())
        .registry(registry.clone())
        .transport(mock.clone())
        .build()
        .unwrap();
    let commands = ActuatorCommands::new(sender, "bbf", None, Endianness::Big).unwrap();

    let err = commands.send(&[Value::from(1i8), Value::from(2i8)]).unwrap_err();
    assert!(err.is_configuration());
    assert!(mock.written().is_empty());
    assert_eq!(commands.sender().message_count(), 0);
}

#[test]
fn test_can_imu_partial_axes_yield_nothing() {
    let registry = ChannelRegistry::new();
    let mock = MockTransport::new();
    let ids = [0x201, 0x202, 0x203, 0x204, 0x205, 0x206];
    let imu = CanImu::builder("body_imu", CanBus::new("vcanE0"), ids)
        .float_width(FloatWidth::F32)
        .link_config(fast_link())
        .registry(registry.clone())
        .transport(mock.clone())
        .build()
        .unwrap();

    let axis = |id: MessageId, v: f64| {
        hwlink_sdk::protocol::Packet::can(
            id,
            false,
            hwlink_sdk::protocol::encode_floats(&[v], FloatWidth::F32, Endianness::Little),
        )
    };
    for id in &ids[..3] {
        mock.push_incoming(axis(*id, 1.0));
    }
    assert!(wait_until(Duration::from_secs(2), || imu.ready_axes() == 3));
    assert!(imu.receive().is_none());

    for id in &ids[3..] {
        mock.push_incoming(axis(*id, 0.25));
    }
    assert!(wait_until(Duration::from_secs(2), || imu.receive().is_some()));
    let reading = imu.receive().unwrap();
    assert_eq!(reading.accel, [1.0, 1.0, 1.0]);
    assert_eq!(reading.gyro, [0.25, 0.25, 0.25]);

    // 六个轴共享一个 CAN 通道
    assert_eq!(registry.channels().len(), 1);
    imu.stop();
}

#[test]
fn test_serial_imu_from_sdk() {
    let registry = ChannelRegistry::new();
    let mock = MockTransport::new();
    let receiver = ReceiverBuilder::new("serial_imu", SerialBus::new("/dev/ttyE3").msg_id_length(1))
        .msg_id(0x07)
        .link_config(fast_link())
        .registry(registry.clone())
        .transport(mock.clone())
        .build()
        .unwrap();
    let imu = SerialImu::new(receiver, FloatWidth::F32, Endianness::Little).unwrap();

    let mut frame = vec![0x07u8];
    frame.extend(hwlink_sdk::protocol::encode_floats(
        &[0.0, 0.0, 9.5, 0.5, 0.0, -1.0],
        FloatWidth::F32,
        Endianness::Little,
    ));
    mock.push_bytes(&frame);

    assert!(wait_until(Duration::from_secs(2), || imu.receive().is_some()));
    let reading = imu.receive().unwrap();
    assert_eq!(reading.to_array(), [0.0, 0.0, 9.5, 0.5, 0.0, -1.0]);
}

#[test]
fn test_protocol_name_selects_bus() {
    let protocol = Protocol::from_name("serial", "/dev/ttyE4", 1).unwrap();
    assert!(matches!(protocol, Protocol::Serial(_)));
    assert!(Protocol::from_name("i2c", "bus0", 1).is_err());
}

#[test]
fn test_sender_shared_across_threads() {
    let registry = ChannelRegistry::new();
    let mock = MockTransport::new();
    let sender = Arc::new(
        SenderBuilder::new("shared_tx", SpiBus::new(1, 0).msg_id_length(1).msg_len_length(1))
            .msg_id(0x05)
            .link_config(fast_link())
            .registry(registry.clone())
            .transport(mock.clone())
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..4u8)
        .map(|i| {
            let sender = sender.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    assert!(sender.send(&[i]).is_sent());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let written = mock.written();
    assert_eq!(written.len(), 40);
    // 每帧完整：ID + 长度 + 1 字节负载
    assert!(written.iter().all(|p| p.data.len() == 3 && p.data[0] == 0x05 && p.data[1] == 1));
    assert_eq!(sender.message_count(), 40);
}

#[cfg(feature = "serde")]
#[test]
fn test_stats_snapshot_serializes() {
    let registry = ChannelRegistry::new();
    let mock = MockTransport::new();
    let sender = SenderBuilder::new("stats_tx", SerialBus::new("/dev/ttyE5").msg_id_length(1))
        .msg_id(0x01)
        .link_config(fast_link())
        .registry(registry.clone())
        .transport(mock.clone())
        .build()
        .unwrap();
    sender.send(b"x");

    let json = serde_json::to_value(sender.stats()).unwrap();
    assert_eq!(json["frames_sent"], 1);
    assert_eq!(json["bytes_sent"], 2);
}
