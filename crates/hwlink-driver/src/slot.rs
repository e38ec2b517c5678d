//! 最新值槽位
//!
//! 每个（通道，消息 ID）一个槽位，只保留最近一次成功解码的负载，不排队。
//! 接收线程是唯一写者；读者取值时只翻转"已消费"标记。
//!
//! 写入时若上一个值尚未被消费，视为一次溢出：旧值被丢弃，新值生效，
//! 写者从不等待读者。

use bytes::Bytes;
use hwlink_protocol::MessageId;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// 取出的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub msg_id: MessageId,
    pub payload: Bytes,
    /// 槽位内单调递增的序号（第一条为 1）
    pub sequence: u64,
    pub received_at: Instant,
    /// 本次读取之前是否未被消费过
    pub fresh: bool,
}

#[derive(Debug)]
struct Stored {
    payload: Bytes,
    sequence: u64,
    received_at: Instant,
    consumed: bool,
}

#[derive(Debug, Default)]
struct SlotState {
    latest: Option<Stored>,
    sequence: u64,
}

/// 接收槽位
#[derive(Debug)]
pub struct ReceiveSlot {
    msg_id: MessageId,
    state: Mutex<SlotState>,
    arrived: Condvar,
}

impl ReceiveSlot {
    pub fn new(msg_id: MessageId) -> Self {
        Self {
            msg_id,
            state: Mutex::new(SlotState::default()),
            arrived: Condvar::new(),
        }
    }

    pub fn msg_id(&self) -> MessageId {
        self.msg_id
    }

    /// 写入新值，返回是否覆盖了未读值
    pub fn store(&self, payload: Bytes) -> bool {
        let overwrote = {
            let mut state = self.state.lock();
            state.sequence += 1;
            let overwrote = state.latest.as_ref().is_some_and(|prev| !prev.consumed);
            state.latest = Some(Stored {
                payload,
                sequence: state.sequence,
                received_at: Instant::now(),
                consumed: false,
            });
            overwrote
        };
        self.arrived.notify_all();
        overwrote
    }

    /// 取最新值并标记为已消费
    pub fn take_latest(&self) -> Option<ReceivedMessage> {
        let mut state = self.state.lock();
        let stored = state.latest.as_mut()?;
        let fresh = !stored.consumed;
        stored.consumed = true;
        Some(self.message(stored, fresh))
    }

    /// 仅在存在未消费值时取出
    pub fn take_fresh(&self) -> Option<ReceivedMessage> {
        let mut state = self.state.lock();
        let stored = state.latest.as_mut().filter(|s| !s.consumed)?;
        stored.consumed = true;
        Some(self.message(stored, true))
    }

    /// 查看最新值，不改变消费标记
    pub fn peek(&self) -> Option<ReceivedMessage> {
        let state = self.state.lock();
        state.latest.as_ref().map(|s| self.message(s, !s.consumed))
    }

    /// 是否存在未消费值
    pub fn has_fresh(&self) -> bool {
        self.state.lock().latest.as_ref().is_some_and(|s| !s.consumed)
    }

    /// 是否曾经收到过值（且未被作废）
    pub fn has_value(&self) -> bool {
        self.state.lock().latest.is_some()
    }

    /// 已写入的总次数
    pub fn sequence(&self) -> u64 {
        self.state.lock().sequence
    }

    /// 作废当前值（连接丢失时调用），序号保持不变
    pub fn invalidate(&self) {
        self.state.lock().latest = None;
    }

    /// 等待未消费值到达并取出
    ///
    /// 超时返回 `None`。
    pub fn wait_fresh(&self, timeout: Duration) -> Option<ReceivedMessage> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(stored) = state.latest.as_mut().filter(|s| !s.consumed) {
                stored.consumed = true;
                return Some(self.message(stored, true));
            }
            if self.arrived.wait_until(&mut state, deadline).timed_out() {
                return None;
            }
        }
    }

    fn message(&self, stored: &Stored, fresh: bool) -> ReceivedMessage {
        ReceivedMessage {
            msg_id: self.msg_id,
            payload: stored.payload.clone(),
            sequence: stored.sequence,
            received_at: stored.received_at,
            fresh,
        }
    }
}
