//! 发送方

use crate::bus::{BusKind, ChannelKey};
use crate::error::DriverError;
use crate::registry::Membership;
use crate::state::ConnectionState;
use crate::stats::ChannelStatsSnapshot;
use hwlink_protocol::{Codec, MessageId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{trace, warn};

/// 发送结果码
///
/// 调用方只需要一个"成功 / 失败"信号时使用；详细原因见 [`Sender::try_send`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum SendStatus {
    Sent = 0,
    Failed = 1,
}

impl SendStatus {
    pub fn as_code(self) -> u8 {
        self.into()
    }

    pub fn is_sent(self) -> bool {
        self == SendStatus::Sent
    }
}

/// 绑定到一个消息 ID 的发送方
///
/// 通过 [`SenderBuilder`](crate::SenderBuilder) 创建。同一通道上的多个发送方共享连接，
/// 写操作在通道的连接锁下串行执行，不会交错。
pub struct Sender {
    membership: Membership,
    codec: Codec,
    stopped: AtomicBool,
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("msg_name", &self.msg_name())
            .field("msg_id", &self.msg_id())
            .field("channel", self.channel_key())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl Sender {
    pub(crate) fn new(membership: Membership, codec: Codec) -> Self {
        Self {
            membership,
            codec,
            stopped: AtomicBool::new(false),
        }
    }

    /// 发送一条消息，返回结果码
    ///
    /// 失败原因会记录到日志；需要区分原因时使用 [`try_send`](Self::try_send)。
    pub fn send(&self, data: &[u8]) -> SendStatus {
        match self.try_send(data) {
            Ok(()) => SendStatus::Sent,
            Err(e) => {
                warn!("Sender '{}': send failed: {}", self.msg_name(), e);
                SendStatus::Failed
            },
        }
    }

    /// 发送一条消息
    ///
    /// 未连接时会在超时时限内阻塞重连；写入失败时重连后重发。
    ///
    /// # 错误
    ///
    /// - [`DriverError::Stopped`]: 已调用 `stop()`
    /// - [`DriverError::Configuration`]: 负载超出分帧限制（不做任何 I/O）
    /// - [`DriverError::ChannelBusy`]: 超时时限内拿不到通道
    /// - [`DriverError::Connection`] / [`DriverError::Transport`]: 时限内未能写出
    pub fn try_send(&self, data: &[u8]) -> Result<(), DriverError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(DriverError::Stopped);
        }
        let channel = self.membership.channel();
        let msg_id = self.membership.msg_id();

        let packet = match self.codec.encode(data, msg_id) {
            Ok(packet) => packet,
            Err(e) => {
                channel.stats().record_send(msg_id, 0, false);
                return Err(e.into());
            },
        };

        let timeout = self.membership.link().connect_timeout();
        let result = match channel.connection().try_lock_for(timeout) {
            Some(mut conn) => conn.write(&packet, timeout, &self.stopped),
            None => Err(DriverError::ChannelBusy(channel.key().to_string())),
        };

        channel.stats().record_send(msg_id, packet.len(), result.is_ok());
        if result.is_ok() {
            self.membership.count_message();
            trace!(
                "Sender '{}': {} bytes written as ID 0x{:X}",
                self.msg_name(),
                packet.len(),
                msg_id
            );
        }
        result
    }

    /// 停止发送方（幂等）
    ///
    /// 从注册表注销；通道上最后一个实例离开时连接被关闭。
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.membership.detach();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
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

    /// 分帧规则下单条消息的最大负载
    pub fn max_payload(&self) -> Option<usize> {
        self.codec.max_payload()
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

    /// 本实例成功发送的消息数
    pub fn message_count(&self) -> u64 {
        self.membership.message_count()
    }

    /// 距上次成功写出的时间
    pub fn time_since_last_tx(&self) -> Option<Duration> {
        self.membership.channel().monitor().time_since_last_tx()
    }

    /// 所在通道的统计快照
    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.membership.channel().stats().snapshot()
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_status_codes() {
        assert_eq!(SendStatus::Sent.as_code(), 0);
        assert_eq!(SendStatus::Failed.as_code(), 1);
        assert!(SendStatus::Sent.is_sent());
        assert!(!SendStatus::Failed.is_sent());
    }
}
