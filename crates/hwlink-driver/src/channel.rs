//! 共享物理通道
//!
//! 同一物理端点上的所有发送方、接收方共享一个 [`Channel`]：
//! 一个连接管理器、一份统计、一组接收槽位、至多一个接收线程。

use crate::bus::{BusKind, ChannelKey};
use crate::config::LinkConfig;
use crate::connection::ConnectionManager;
use crate::error::DriverError;
use crate::heartbeat::LinkMonitor;
use crate::pipeline::{ReceiveLoop, receive_loop};
use crate::slot::ReceiveSlot;
use crate::state::{AtomicConnectionState, ConnectionState};
use crate::stats::ChannelStats;
use hwlink_protocol::{Codec, ConfigurationError, MessageId};
use hwlink_transport::Transport;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct ReaderState {
    /// 当前接收线程使用的解码器（无接收方时为 `None`）
    codec: Option<Codec>,
    /// 无 ID 帧使用的消息 ID
    sentinel: MessageId,
    running: Option<ReceiveLoop>,
}

/// 一个物理端点
#[derive(Debug)]
pub(crate) struct Channel {
    key: ChannelKey,
    kind: BusKind,
    buffer_threshold: Option<usize>,
    connection: Mutex<ConnectionManager>,
    state: Arc<AtomicConnectionState>,
    monitor: Arc<LinkMonitor>,
    stats: ChannelStats,
    slots: RwLock<HashMap<MessageId, Arc<ReceiveSlot>>>,
    reader: Mutex<ReaderState>,
    /// 挂在该通道上的实例数
    users: AtomicUsize,
}

impl Channel {
    pub(crate) fn new(
        key: ChannelKey,
        kind: BusKind,
        buffer_threshold: Option<usize>,
        transport: Box<dyn Transport>,
        link: LinkConfig,
    ) -> Self {
        let connection = ConnectionManager::new(transport, link, key.as_str());
        Self {
            state: connection.state_handle(),
            monitor: connection.monitor(),
            connection: Mutex::new(connection),
            key,
            kind,
            buffer_threshold,
            stats: ChannelStats::new(),
            slots: RwLock::new(HashMap::new()),
            reader: Mutex::new(ReaderState::default()),
            users: AtomicUsize::new(0),
        }
    }

    pub(crate) fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub(crate) fn kind(&self) -> BusKind {
        self.kind
    }

    pub(crate) fn buffer_threshold(&self) -> Option<usize> {
        self.buffer_threshold
    }

    pub(crate) fn connection(&self) -> &Mutex<ConnectionManager> {
        &self.connection
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state.get(Ordering::Acquire)
    }

    pub(crate) fn monitor(&self) -> &LinkMonitor {
        &self.monitor
    }

    pub(crate) fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    pub(crate) fn users(&self) -> usize {
        self.users.load(Ordering::Acquire)
    }

    pub(crate) fn add_user(&self) -> usize {
        self.users.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn remove_user(&self) -> usize {
        let prev = self.users.fetch_sub(1, Ordering::AcqRel);
        prev.saturating_sub(1)
    }

    /// 通道闲置后被重新使用：重置连接管理器
    pub(crate) fn revive(&self, transport: Option<Box<dyn Transport>>, link: LinkConfig) {
        self.connection.lock().revive(transport, link);
        debug!("Channel '{}' reused after idle period", self.key);
    }

    pub(crate) fn slot(&self, msg_id: MessageId) -> Option<Arc<ReceiveSlot>> {
        self.slots.read().get(&msg_id).cloned()
    }

    /// 数据可能已过期：作废所有槽位中的未读值
    pub(crate) fn invalidate_slots(&self) {
        for slot in self.slots.read().values() {
            slot.invalidate();
        }
    }

    /// 订阅一个消息 ID：创建槽位，必要时启动接收线程
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        msg_id: MessageId,
        codec: Codec,
        link: LinkConfig,
    ) -> Result<Arc<ReceiveSlot>, DriverError> {
        let mut reader = self.reader.lock();
        if let Some(active) = &reader.codec
            && *active != codec
        {
            return Err(ConfigurationError::Invalid(format!(
                "channel '{}' is already decoded as {:?}, cannot add a receiver framed as {:?}",
                self.key, active, codec
            ))
            .into());
        }

        let slot = Arc::new(ReceiveSlot::new(msg_id));
        self.slots.write().insert(msg_id, Arc::clone(&slot));
        if reader.codec.is_none() {
            reader.codec = Some(codec);
            reader.sentinel = msg_id;
        }

        let alive = reader.running.as_ref().is_some_and(ReceiveLoop::is_alive);
        if !alive {
            if let Some(dead) = reader.running.take() {
                warn!("Channel '{}': previous receive loop had exited, restarting", self.key);
                dead.signal_stop();
            }
            let is_running = Arc::new(AtomicBool::new(true));
            let channel = Arc::clone(self);
            let flag = Arc::clone(&is_running);
            let sentinel = reader.sentinel;
            let spawned = std::thread::Builder::new()
                .name(format!("hwlink-rx-{}", self.key))
                .spawn(move || receive_loop(channel, codec, sentinel, flag, link));
            match spawned {
                Ok(thread) => {
                    reader.running = Some(ReceiveLoop::new(thread, is_running));
                    debug!("Channel '{}': receive loop started", self.key);
                },
                Err(e) => {
                    self.slots.write().remove(&msg_id);
                    if self.slots.read().is_empty() {
                        reader.codec = None;
                    }
                    return Err(hwlink_transport::TransportError::Io(e).into());
                },
            }
        }
        Ok(slot)
    }

    /// 取消订阅
    ///
    /// 最后一个接收方离开时返回接收线程句柄（已发出停止信号），由调用方在锁外等待其退出。
    pub(crate) fn unsubscribe(&self, msg_id: MessageId) -> Option<ReceiveLoop> {
        let mut reader = self.reader.lock();
        let now_empty = {
            let mut slots = self.slots.write();
            slots.remove(&msg_id);
            slots.is_empty()
        };
        if !now_empty {
            return None;
        }

        reader.codec = None;
        let running = reader.running.take()?;
        running.signal_stop();
        Some(running)
    }

    pub(crate) fn is_loop_alive(&self) -> bool {
        self.reader.lock().running.as_ref().is_some_and(ReceiveLoop::is_alive)
    }

    /// 把订阅的 ID 集合下发为 CAN 接收过滤
    ///
    /// 可能等待连接锁至 `connect_timeout`，调用方不得持有注册表的锁。
    pub(crate) fn refresh_filters(&self, link: &LinkConfig) {
        if self.kind != BusKind::Can {
            return;
        }
        let mut ids: Vec<MessageId> = self.slots.read().keys().copied().collect();
        if ids.is_empty() {
            return;
        }
        ids.sort_unstable();
        match self.connection.try_lock_for(link.connect_timeout()) {
            Some(mut conn) => conn.set_filters(&ids),
            None => warn!("Channel '{}': connection busy, receive filters not updated", self.key),
        }
    }
}
