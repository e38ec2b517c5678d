//! 连接状态
//!
//! `Disconnected → Connecting → Connected → Closing → Closed`
//!
//! 原子版本供接收线程与调用方线程共享读取。

use std::sync::atomic::{AtomicU8, Ordering};

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, num_enum::FromPrimitive, num_enum::IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ConnectionState {
    /// 尚未打开
    #[default]
    Disconnected = 0,
    /// 正在打开或重试
    Connecting = 1,
    /// 已连接
    Connected = 2,
    /// 正在关闭
    Closing = 3,
    /// 已关闭（重试耗尽或已停止）
    Closed = 4,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// 是否处于关闭流程中或已关闭
    pub fn is_closing_or_closed(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

/// 连接状态（原子版本，用于线程间共享）
#[derive(Debug, Default)]
pub struct AtomicConnectionState {
    inner: AtomicU8,
}

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            inner: AtomicU8::new(state.into()),
        }
    }

    /// 获取当前状态
    pub fn get(&self, ordering: Ordering) -> ConnectionState {
        ConnectionState::from(self.inner.load(ordering))
    }

    /// 设置状态
    pub fn set(&self, state: ConnectionState, ordering: Ordering) {
        self.inner.store(state.into(), ordering);
    }

    /// 仅当当前状态为 `current` 时切换到 `new`
    pub fn transition(&self, current: ConnectionState, new: ConnectionState) -> bool {
        self.inner
            .compare_exchange(current.into(), new.into(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_u8() {
        assert_eq!(ConnectionState::from(0u8), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::from(2u8), ConnectionState::Connected);
        assert_eq!(ConnectionState::from(4u8), ConnectionState::Closed);
        // 无效值回落到默认状态
        assert_eq!(ConnectionState::from(99u8), ConnectionState::Disconnected);
        assert_eq!(u8::from(ConnectionState::Closing), 3);
    }

    #[test]
    fn test_state_predicates() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::Closing.is_closing_or_closed());
        assert!(!ConnectionState::Disconnected.is_closing_or_closed());
    }

    #[test]
    fn test_atomic_state_transition() {
        let state = AtomicConnectionState::new(ConnectionState::Connected);
        assert!(!state.transition(ConnectionState::Connecting, ConnectionState::Closed));
        assert!(state.transition(ConnectionState::Connected, ConnectionState::Closing));
        assert_eq!(state.get(Ordering::Acquire), ConnectionState::Closing);

        state.set(ConnectionState::Closed, Ordering::Release);
        assert_eq!(state.get(Ordering::Acquire), ConnectionState::Closed);
    }
}
