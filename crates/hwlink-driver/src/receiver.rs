//! 接收方

use crate::bus::{BusKind, ChannelKey};
use crate::error::DriverError;
use crate::registry::Membership;
use crate::slot::{ReceiveSlot, ReceivedMessage};
use crate::state::ConnectionState;
use crate::stats::ChannelStatsSnapshot;
use bytes::Bytes;
use hwlink_protocol::MessageId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// 绑定到一个消息 ID 的接收方
///
/// 通道的后台接收线程把解码后的负载写入本接收方的槽位，槽位只保留最新值。
/// 所有读取方法都不阻塞（[`wait_for_message`](Self::wait_for_message) 除外）。
///
/// # 示例
///
/// ```no_run
/// use hwlink_driver::{ReceiverBuilder, SerialBus};
///
/// let receiver = ReceiverBuilder::new("status", SerialBus::new("/dev/ttyACM0").msg_id_length(1))
///     .msg_id(0x10)
///     .build()?;
///
/// if let Some(payload) = receiver.receive() {
///     println!("{} bytes", payload.len());
/// }
/// # Ok::<(), hwlink_driver::DriverError>(())
/// ```
pub struct Receiver {
    membership: Membership,
    slot: Arc<ReceiveSlot>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("msg_name", &self.msg_name())
            .field("msg_id", &self.msg_id())
            .field("channel", self.channel_key())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl Receiver {
    pub(crate) fn new(membership: Membership, slot: Arc<ReceiveSlot>) -> Self {
        Self {
            membership,
            slot,
            stopped: AtomicBool::new(false),
        }
    }

    /// 最新负载（无值或已停止时为 `None`）
    ///
    /// 同一个值可以被重复读取；只有第一次读取算作新鲜。
    pub fn receive(&self) -> Option<Bytes> {
        self.receive_message().map(|message| message.payload)
    }

    /// 最新消息（含序号、到达时间与新鲜标记）
    pub fn receive_message(&self) -> Option<ReceivedMessage> {
        if self.is_stopped() {
            return None;
        }
        let message = self.slot.take_latest()?;
        if message.fresh {
            self.membership.count_message();
        }
        Some(message)
    }

    /// 仅在有未读值时返回，每个值恰好返回一次
    pub fn receive_fresh(&self) -> Option<Bytes> {
        if self.is_stopped() {
            return None;
        }
        let message = self.slot.take_fresh()?;
        self.membership.count_message();
        Some(message.payload)
    }

    /// 是否有未读值
    pub fn has_fresh(&self) -> bool {
        !self.is_stopped() && self.slot.has_fresh()
    }

    /// 槽位中是否有值（无论是否已读）
    pub fn has_value(&self) -> bool {
        !self.is_stopped() && self.slot.has_value()
    }

    /// 阻塞等待下一个未读值
    ///
    /// # 错误
    ///
    /// - [`DriverError::Stopped`]: 已停止
    /// - [`DriverError::Timeout`]: 时限内没有新值
    pub fn wait_for_message(&self, timeout: Duration) -> Result<ReceivedMessage, DriverError> {
        if self.is_stopped() {
            return Err(DriverError::Stopped);
        }
        let message = self.slot.wait_fresh(timeout).ok_or(DriverError::Timeout)?;
        self.membership.count_message();
        Ok(message)
    }

    /// 停止接收方（幂等）
    ///
    /// 移除槽位；通道上最后一个接收方离开时停止接收线程并在宽限期内等待其退出，
    /// 最后一个实例离开时关闭连接。
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.membership.detach();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// 通道的接收线程是否在运行
    pub fn is_loop_alive(&self) -> bool {
        !self.is_stopped() && self.membership.channel().is_loop_alive()
    }

    pub fn msg_name(&self) -> &str {
        self.membership.name()
    }

    pub fn msg_id(&self) -> MessageId {
        self.membership.msg_id()
    }

    pub fn channel_key(&self) -> &ChannelKey {
        self.membership.channel().key()
    }

    pub fn bus_kind(&self) -> BusKind {
        self.membership.channel().kind()
    }

    /// 当前连接状态（停止后恒为 `Closed`）
    pub fn connection_state(&self) -> ConnectionState {
        if self.is_stopped() {
            return ConnectionState::Closed;
        }
        self.membership.channel().state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// 本实例读到的新鲜消息数
    pub fn message_count(&self) -> u64 {
        self.membership.message_count()
    }

    /// 距通道上次收到任意帧的时间
    pub fn time_since_last_rx(&self) -> Option<Duration> {
        self.membership.channel().monitor().time_since_last_rx()
    }

    /// 所在通道的统计快照
    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.membership.channel().stats().snapshot()
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.stop();
    }
}
