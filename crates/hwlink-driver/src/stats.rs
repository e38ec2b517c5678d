//! 通道操作统计
//!
//! 每个物理通道一份计数器，由该通道上的所有实例（发送方、接收方、接收线程）共同更新。
//! 所有更新经过同一把锁，避免并发更新丢失，也保证快照内各字段相互一致。

use crate::registry::Role;
use hwlink_protocol::MessageId;
use parking_lot::Mutex;
use std::collections::HashMap;

/// 统计快照（不可变，用于读取）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelStatsSnapshot {
    /// 成功写出的字节数（含帧头）
    pub bytes_sent: u64,
    /// 读入的字节数（含帧头与被丢弃的畸形帧）
    pub bytes_received: u64,
    /// 发送尝试次数（无论成败）
    pub send_attempts: u64,
    /// 成功发送的帧数
    pub frames_sent: u64,
    /// 成功解码的帧数
    pub frames_received: u64,
    /// 发送失败次数
    pub send_failures: u64,
    /// 读取失败次数（传输层错误）
    pub receive_failures: u64,
    /// 畸形帧次数
    pub framing_errors: u64,
    /// 未读值被覆盖的次数
    ///
    /// 如果这个值快速增长，说明消费方读取速度跟不上数据到达速度。
    pub overflows: u64,
    /// 解码成功但没有接收方订阅的帧数
    pub unrouted_frames: u64,
    /// 重新建立连接的次数
    pub reconnects: u64,
    /// 输入缓冲超过阈值而被清空的次数
    pub buffer_flushes: u64,
}

impl ChannelStatsSnapshot {
    /// 覆盖率（百分比）
    ///
    /// 返回 0.0 到 100.0 之间的值。如果 `frames_received` 为 0，返回 0.0。
    pub fn overflow_rate(&self) -> f64 {
        if self.frames_received == 0 {
            return 0.0;
        }
        (self.overflows as f64 / self.frames_received as f64) * 100.0
    }

    /// 发送失败率（百分比）
    pub fn send_failure_rate(&self) -> f64 {
        if self.send_attempts == 0 {
            return 0.0;
        }
        (self.send_failures as f64 / self.send_attempts as f64) * 100.0
    }
}

#[derive(Debug, Default)]
struct Counters {
    totals: ChannelStatsSnapshot,
    per_message: HashMap<(Role, MessageId), u64>,
    rx_buffered: usize,
}

/// 通道计数器（单一更新路径）
#[derive(Debug, Default)]
pub struct ChannelStats {
    inner: Mutex<Counters>,
}

impl ChannelStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次发送尝试
    pub fn record_send(&self, msg_id: MessageId, bytes: usize, ok: bool) {
        let mut c = self.inner.lock();
        c.totals.send_attempts += 1;
        if ok {
            c.totals.frames_sent += 1;
            c.totals.bytes_sent += bytes as u64;
            *c.per_message.entry((Role::Sender, msg_id)).or_default() += 1;
        } else {
            c.totals.send_failures += 1;
        }
    }

    /// 记录一帧成功解码并投递
    pub fn record_receive(&self, msg_id: MessageId, bytes: usize, overwrote: bool) {
        let mut c = self.inner.lock();
        c.totals.frames_received += 1;
        c.totals.bytes_received += bytes as u64;
        if overwrote {
            c.totals.overflows += 1;
        }
        *c.per_message.entry((Role::Receiver, msg_id)).or_default() += 1;
    }

    /// 记录一帧成功解码但无人订阅
    pub fn record_unrouted(&self, bytes: usize) {
        let mut c = self.inner.lock();
        c.totals.unrouted_frames += 1;
        c.totals.bytes_received += bytes as u64;
    }

    /// 记录一帧畸形数据
    pub fn record_framing_error(&self, bytes: usize) {
        let mut c = self.inner.lock();
        c.totals.framing_errors += 1;
        c.totals.bytes_received += bytes as u64;
    }

    pub fn record_receive_failure(&self) {
        self.inner.lock().totals.receive_failures += 1;
    }

    pub fn record_reconnect(&self) {
        self.inner.lock().totals.reconnects += 1;
    }

    /// 累计已读入的字节数，超过阈值时清零并返回 true
    ///
    /// `threshold` 为 `None` 时不做跟踪。
    pub fn track_rx_buffered(&self, bytes: usize, threshold: Option<usize>) -> bool {
        let Some(threshold) = threshold else {
            return false;
        };
        let mut c = self.inner.lock();
        c.rx_buffered += bytes;
        if c.rx_buffered > threshold {
            c.rx_buffered = 0;
            c.totals.buffer_flushes += 1;
            return true;
        }
        false
    }

    /// 指定角色、消息 ID 的累计消息数
    pub fn message_count(&self, role: Role, msg_id: MessageId) -> u64 {
        self.inner
            .lock()
            .per_message
            .get(&(role, msg_id))
            .copied()
            .unwrap_or(0)
    }

    /// 获取快照
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        self.inner.lock().totals
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        *self.inner.lock() = Counters::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_send_counters() {
        let stats = ChannelStats::new();
        stats.record_send(0x10, 3, true);
        stats.record_send(0x10, 3, false);

        let snap = stats.snapshot();
        assert_eq!(snap.send_attempts, 2);
        assert_eq!(snap.frames_sent, 1);
        assert_eq!(snap.send_failures, 1);
        assert_eq!(snap.bytes_sent, 3);
        assert_eq!(snap.send_failure_rate(), 50.0);
        assert_eq!(stats.message_count(Role::Sender, 0x10), 1);
        assert_eq!(stats.message_count(Role::Receiver, 0x10), 0);
    }

    #[test]
    fn test_receive_counters() {
        let stats = ChannelStats::new();
        stats.record_receive(0x20, 4, false);
        stats.record_receive(0x20, 4, true);
        stats.record_unrouted(2);
        stats.record_framing_error(1);

        let snap = stats.snapshot();
        assert_eq!(snap.frames_received, 2);
        assert_eq!(snap.overflows, 1);
        assert_eq!(snap.unrouted_frames, 1);
        assert_eq!(snap.framing_errors, 1);
        assert_eq!(snap.bytes_received, 11);
        assert_eq!(snap.overflow_rate(), 50.0);
        assert_eq!(stats.message_count(Role::Receiver, 0x20), 2);
    }

    #[test]
    fn test_rates_with_no_traffic() {
        let snap = ChannelStatsSnapshot::default();
        assert_eq!(snap.overflow_rate(), 0.0);
        assert_eq!(snap.send_failure_rate(), 0.0);
    }

    #[test]
    fn test_buffer_threshold() {
        let stats = ChannelStats::new();
        assert!(!stats.track_rx_buffered(1000, None));

        assert!(!stats.track_rx_buffered(40, Some(64)));
        assert!(!stats.track_rx_buffered(24, Some(64)));
        assert!(stats.track_rx_buffered(1, Some(64)));
        // 清零后重新累计
        assert!(!stats.track_rx_buffered(10, Some(64)));
        assert_eq!(stats.snapshot().buffer_flushes, 1);
    }

    #[test]
    fn test_reset() {
        let stats = ChannelStats::new();
        stats.record_send(1, 1, true);
        stats.record_reconnect();
        stats.reset();
        assert_eq!(stats.snapshot(), ChannelStatsSnapshot::default());
        assert_eq!(stats.message_count(Role::Sender, 1), 0);
    }

    /// 并发更新不丢计数
    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(ChannelStats::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let stats = stats.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_send(i, 2, true);
                        stats.record_receive(i, 2, false);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.frames_sent, 4000);
        assert_eq!(snap.frames_received, 4000);
        assert_eq!(snap.bytes_sent, 8000);
    }
}
