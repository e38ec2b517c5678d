//! 通道注册表
//!
//! 记录所有物理通道与挂在其上的实例，保证：
//!
//! - 实例名全局唯一
//! - 同一通道、同一角色下消息 ID 唯一
//! - 不带消息 ID 的通道上，每个角色至多一个实例
//!
//! 默认使用进程级的 [`ChannelRegistry::global`]，测试或多套隔离环境可以
//! 通过构建器注入独立的注册表。

use crate::bus::{BusConfig, BusKind, ChannelKey};
use crate::channel::Channel;
use crate::config::LinkConfig;
use crate::error::DriverError;
use crate::slot::ReceiveSlot;
use crate::state::ConnectionState;
use crate::stats::ChannelStatsSnapshot;
use hwlink_protocol::{Codec, ConfigurationError, MessageId};
use hwlink_transport::Transport;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;
use tracing::{debug, error, info};

/// 实例角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Role {
    Sender,
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Sender => "sender",
            Role::Receiver => "receiver",
        })
    }
}

/// 实例元数据（诊断用快照）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceMetadata {
    pub msg_name: String,
    pub role: Role,
    pub msg_id: MessageId,
    pub channel: ChannelKey,
    pub bus: BusKind,
    pub created_at: SystemTime,
    /// 所在通道的连接状态
    pub state: ConnectionState,
    /// 成功发送 / 新鲜读取的消息数
    pub message_count: u64,
}

#[derive(Debug)]
struct InstanceRecord {
    role: Role,
    msg_id: MessageId,
    id_framed: bool,
    channel: Arc<Channel>,
    created_at: SystemTime,
    messages: Arc<AtomicU64>,
}

impl InstanceRecord {
    fn metadata(&self, name: &str) -> InstanceMetadata {
        InstanceMetadata {
            msg_name: name.to_string(),
            role: self.role,
            msg_id: self.msg_id,
            channel: self.channel.key().clone(),
            bus: self.channel.kind(),
            created_at: self.created_at,
            state: self.channel.state(),
            message_count: self.messages.load(Ordering::Relaxed),
        }
    }
}

/// 挂载请求
pub(crate) struct AttachRequest<'a> {
    pub name: String,
    pub role: Role,
    pub msg_id: MessageId,
    pub bus: &'a BusConfig,
    pub codec: Codec,
    pub transport: Option<Box<dyn Transport>>,
    pub link: LinkConfig,
}

/// 一个实例在注册表中的成员身份
#[derive(Debug)]
pub(crate) struct Membership {
    registry: Arc<ChannelRegistry>,
    channel: Arc<Channel>,
    name: String,
    role: Role,
    msg_id: MessageId,
    link: LinkConfig,
    messages: Arc<AtomicU64>,
    slot: Option<Arc<ReceiveSlot>>,
}

impl Membership {
    pub(crate) fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn msg_id(&self) -> MessageId {
        self.msg_id
    }

    pub(crate) fn link(&self) -> &LinkConfig {
        &self.link
    }

    pub(crate) fn slot(&self) -> Option<&Arc<ReceiveSlot>> {
        self.slot.as_ref()
    }

    pub(crate) fn count_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_count(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    /// 从注册表中注销（调用方保证只调用一次）
    pub(crate) fn detach(&self) {
        self.registry.detach(self);
    }
}

/// 通道与实例注册表
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Mutex<HashMap<ChannelKey, Arc<Channel>>>,
    instances: Mutex<HashMap<String, InstanceRecord>>,
}

static GLOBAL: OnceLock<Arc<ChannelRegistry>> = OnceLock::new();

impl ChannelRegistry {
    /// 创建一个独立的注册表
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 进程级默认注册表
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(ChannelRegistry::new))
    }

    /// 挂载一个实例
    ///
    /// 校验唯一性、获取（或创建 / 复用）通道；接收方还会订阅槽位并确保接收线程运行。
    pub(crate) fn attach(self: &Arc<Self>, request: AttachRequest<'_>) -> Result<Membership, DriverError> {
        let AttachRequest {
            name,
            role,
            msg_id,
            bus,
            codec,
            transport,
            link,
        } = request;
        let key = bus.channel_key();
        let kind = bus.kind();

        let mut instances = self.instances.lock();
        if instances.contains_key(&name) {
            return Err(ConfigurationError::Invalid(format!("instance name '{name}' is already in use")).into());
        }
        for (other, record) in instances.iter() {
            if record.role != role || record.channel.key() != &key {
                continue;
            }
            if !codec.is_id_framed() || !record.id_framed {
                return Err(ConfigurationError::Invalid(format!(
                    "channel '{key}' carries no message IDs and already has {role} '{other}'"
                ))
                .into());
            }
            if record.msg_id == msg_id {
                return Err(ConfigurationError::Invalid(format!(
                    "message ID 0x{msg_id:X} on '{key}' already has {role} '{other}'"
                ))
                .into());
            }
        }

        let channel = {
            let mut channels = self.channels.lock();
            let channel = match channels.get(&key) {
                Some(existing) => {
                    if existing.kind() != kind {
                        return Err(ConfigurationError::Invalid(format!(
                            "channel '{key}' is a {} bus, requested {kind}",
                            existing.kind()
                        ))
                        .into());
                    }
                    // 计数先于复位递增，release_channel 据此判断连接是否已被复用
                    if existing.add_user() == 1 {
                        let transport = match transport {
                            Some(transport) => transport,
                            None => match bus.default_transport(&link) {
                                Ok(transport) => transport,
                                Err(e) => {
                                    existing.remove_user();
                                    return Err(e);
                                },
                            },
                        };
                        existing.revive(Some(transport), link);
                    } else if transport.is_some() {
                        debug!("Channel '{}' already in use, supplied transport ignored", key);
                    }
                    Arc::clone(existing)
                },
                None => {
                    let transport = match transport {
                        Some(transport) => transport,
                        None => bus.default_transport(&link)?,
                    };
                    let channel = Arc::new(Channel::new(
                        key.clone(),
                        kind,
                        bus.buffer_threshold(),
                        transport,
                        link,
                    ));
                    channel.add_user();
                    channels.insert(key.clone(), Arc::clone(&channel));
                    info!("Channel '{}' created", key);
                    channel
                },
            };
            channel
        };

        let slot = match role {
            Role::Receiver => match channel.subscribe(msg_id, codec, link) {
                Ok(slot) => Some(slot),
                Err(e) => {
                    drop(instances);
                    self.release_channel(&channel, &link);
                    return Err(e);
                },
            },
            Role::Sender => None,
        };

        let messages = Arc::new(AtomicU64::new(0));
        instances.insert(
            name.clone(),
            InstanceRecord {
                role,
                msg_id,
                id_framed: codec.is_id_framed(),
                channel: Arc::clone(&channel),
                created_at: SystemTime::now(),
                messages: Arc::clone(&messages),
            },
        );
        drop(instances);
        debug!("Registered {} '{}' (ID 0x{:X}) on '{}'", role, name, msg_id, key);

        if role == Role::Receiver {
            channel.refresh_filters(&link);
        }

        Ok(Membership {
            registry: Arc::clone(self),
            channel,
            name,
            role,
            msg_id,
            link,
            messages,
            slot,
        })
    }

    fn detach(&self, membership: &Membership) {
        self.instances.lock().remove(&membership.name);

        if membership.role == Role::Receiver {
            match membership.channel.unsubscribe(membership.msg_id) {
                Some(running) => {
                    running.stop(membership.link.stop_grace());
                },
                None => membership.channel.refresh_filters(&membership.link),
            }
        }

        self.release_channel(&membership.channel, &membership.link);
        debug!(
            "Unregistered {} '{}' from '{}'",
            membership.role,
            membership.name,
            membership.channel.key()
        );
    }

    /// 减少通道引用计数，最后一个用户离开时关闭连接
    ///
    /// 不持有注册表的锁：等待连接锁期间诊断查询和其它实例的挂载不受影响。
    fn release_channel(&self, channel: &Channel, link: &LinkConfig) {
        if channel.remove_user() > 0 {
            return;
        }
        match channel.connection().try_lock_for(link.stop_grace()) {
            // 等锁期间可能已有新实例挂载并复位了连接
            Some(mut conn) if channel.users() == 0 => conn.close(),
            Some(_) => debug!("Channel '{}' reused before close, keeping connection", channel.key()),
            None => error!("Channel '{}': connection still busy, close skipped", channel.key()),
        }
    }

    /// 所有实例的元数据（按名称排序）
    pub fn instances(&self) -> Vec<InstanceMetadata> {
        let mut list: Vec<_> = self
            .instances
            .lock()
            .iter()
            .map(|(name, record)| record.metadata(name))
            .collect();
        list.sort_by(|a, b| a.msg_name.cmp(&b.msg_name));
        list
    }

    /// 按名称查询实例
    pub fn instance(&self, name: &str) -> Option<InstanceMetadata> {
        self.instances.lock().get(name).map(|record| record.metadata(name))
    }

    /// 已知的所有通道键
    pub fn channels(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<_> = self.channels.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// 通道统计快照
    pub fn channel_stats(&self, key: &ChannelKey) -> Option<ChannelStatsSnapshot> {
        self.channels.lock().get(key).map(|channel| channel.stats().snapshot())
    }

    /// 所有通道的统计快照
    pub fn all_channel_stats(&self) -> Vec<(ChannelKey, ChannelStatsSnapshot)> {
        let mut list: Vec<_> = self
            .channels
            .lock()
            .iter()
            .map(|(key, channel)| (key.clone(), channel.stats().snapshot()))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    /// 重置通道统计
    pub fn reset_channel_stats(&self, key: &ChannelKey) -> bool {
        match self.channels.lock().get(key) {
            Some(channel) => {
                channel.stats().reset();
                true
            },
            None => false,
        }
    }

    pub fn channel_state(&self, key: &ChannelKey) -> Option<ConnectionState> {
        self.channels.lock().get(key).map(|channel| channel.state())
    }

    /// 通道上的实例数
    pub fn channel_users(&self, key: &ChannelKey) -> usize {
        self.channels.lock().get(key).map_or(0, |channel| channel.users())
    }

    /// 通道上指定角色、消息 ID 的累计消息数
    pub fn message_count(&self, key: &ChannelKey, role: Role, msg_id: MessageId) -> u64 {
        self.channels
            .lock()
            .get(key)
            .map_or(0, |channel| channel.stats().message_count(role, msg_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{CanBus, SerialBus};
    use hwlink_transport::mock::MockTransport;
    use std::time::{Duration, Instant};

    fn request<'a>(name: &str, role: Role, msg_id: MessageId, bus: &'a BusConfig, mock: &MockTransport) -> AttachRequest<'a> {
        AttachRequest {
            name: name.to_string(),
            role,
            msg_id,
            bus,
            codec: bus.codec().unwrap(),
            transport: Some(Box::new(mock.clone())),
            link: LinkConfig::default(),
        }
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Sender.to_string(), "sender");
        assert_eq!(Role::Receiver.to_string(), "receiver");
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = ChannelRegistry::new();
        let mock = MockTransport::new();
        let bus: BusConfig = SerialBus::new("/dev/ttyMOCK0").msg_id_length(1).into();

        let first = registry.attach(request("cmd", Role::Sender, 1, &bus, &mock)).unwrap();
        let err = registry.attach(request("cmd", Role::Sender, 2, &bus, &mock)).unwrap_err();
        assert!(err.is_configuration());

        first.detach();
        assert!(registry.instance("cmd").is_none());
    }

    #[test]
    fn test_duplicate_id_per_role() {
        let registry = ChannelRegistry::new();
        let mock = MockTransport::new();
        let bus: BusConfig = SerialBus::new("/dev/ttyMOCK1").msg_id_length(1).into();

        let a = registry.attach(request("a", Role::Sender, 0x10, &bus, &mock)).unwrap();
        assert!(registry.attach(request("b", Role::Sender, 0x10, &bus, &mock)).is_err());
        let c = registry.attach(request("c", Role::Sender, 0x11, &bus, &mock)).unwrap();
        assert_eq!(registry.channel_users(&bus.channel_key()), 2);

        a.detach();
        c.detach();
        assert_eq!(registry.channel_users(&bus.channel_key()), 0);
    }

    #[test]
    fn test_idless_channel_is_exclusive() {
        let registry = ChannelRegistry::new();
        let mock = MockTransport::new();
        let bus: BusConfig = SerialBus::new("/dev/ttyMOCK2").into();

        let a = registry.attach(request("a", Role::Sender, 0, &bus, &mock)).unwrap();
        assert!(registry.attach(request("b", Role::Sender, 1, &bus, &mock)).is_err());
        a.detach();
        let b = registry.attach(request("b", Role::Sender, 1, &bus, &mock)).unwrap();
        b.detach();
    }

    #[test]
    fn test_metadata_snapshot() {
        let registry = ChannelRegistry::new();
        let mock = MockTransport::new();
        let bus: BusConfig = SerialBus::new("/dev/ttyMOCK3").msg_id_length(2).into();

        let member = registry.attach(request("speed", Role::Sender, 0x0102, &bus, &mock)).unwrap();
        member.count_message();

        let meta = registry.instance("speed").unwrap();
        assert_eq!(meta.role, Role::Sender);
        assert_eq!(meta.msg_id, 0x0102);
        assert_eq!(meta.channel.as_str(), "serial:/dev/ttyMOCK3");
        assert_eq!(meta.bus, BusKind::Serial);
        assert_eq!(meta.state, ConnectionState::Disconnected);
        assert_eq!(meta.message_count, 1);
        assert_eq!(registry.instances().len(), 1);
        member.detach();
    }

    #[test]
    fn test_last_user_closes_connection() {
        let registry = ChannelRegistry::new();
        let mock = MockTransport::new();
        let bus: BusConfig = SerialBus::new("/dev/ttyMOCK4").msg_id_length(1).into();

        let member = registry.attach(request("x", Role::Sender, 1, &bus, &mock)).unwrap();
        member.channel().connection().lock().try_open().unwrap();
        assert!(mock.is_open_now());

        member.detach();
        assert!(!mock.is_open_now());
        assert_eq!(registry.channel_state(&bus.channel_key()), Some(ConnectionState::Closed));
    }

    /// 在超时内轮询，要求每次查询本身都立即返回
    fn poll_quickly(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let started = Instant::now();
            let done = cond();
            assert!(started.elapsed() < Duration::from_millis(200), "registry query stalled");
            if done {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn slow_link() -> LinkConfig {
        LinkConfig {
            connect_timeout_ms: 2000,
            retry_interval_ms: 10,
            recv_timeout_ms: 5,
            stop_grace_ms: 2000,
        }
    }

    #[test]
    fn test_filter_update_does_not_block_queries() {
        let registry = ChannelRegistry::new();
        let mock = MockTransport::new();
        let bus: BusConfig = CanBus::new("vcanR0").into();
        let first = registry.attach(request("ax", Role::Receiver, 0x101, &bus, &mock)).unwrap();

        // 模拟发送方正持锁重连
        let channel = Arc::clone(first.channel());
        let busy = channel.connection().lock();

        let handle = {
            let registry = Arc::clone(&registry);
            let mock = mock.clone();
            std::thread::spawn(move || {
                let bus: BusConfig = CanBus::new("vcanR0").into();
                let mut req = request("ay", Role::Receiver, 0x102, &bus, &mock);
                req.link = slow_link();
                registry.attach(req).unwrap()
            })
        };

        assert!(poll_quickly(Duration::from_secs(1), || registry.instance("ay").is_some()));
        assert_eq!(registry.instances().len(), 2);

        drop(busy);
        let second = handle.join().unwrap();
        assert_eq!(mock.filters(), vec![0x101, 0x102]);

        second.detach();
        assert_eq!(mock.filters(), vec![0x101]);
        first.detach();
    }

    #[test]
    fn test_release_does_not_block_queries() {
        let registry = ChannelRegistry::new();
        let mock = MockTransport::new();
        let bus: BusConfig = SerialBus::new("/dev/ttyMOCK5").msg_id_length(1).into();
        let mut req = request("tx", Role::Sender, 1, &bus, &mock);
        req.link = slow_link();
        let member = registry.attach(req).unwrap();
        member.channel().connection().lock().try_open().unwrap();

        let channel = Arc::clone(member.channel());
        let busy = channel.connection().lock();
        let handle = std::thread::spawn(move || member.detach());

        let key = bus.channel_key();
        assert!(poll_quickly(Duration::from_secs(1), || registry.channel_users(&key) == 0));
        assert!(registry.instances().is_empty());

        drop(busy);
        handle.join().unwrap();
        assert!(!mock.is_open_now());
    }
}
