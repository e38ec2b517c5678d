//! Builder 模式实现
//!
//! 提供链式构造 [`Sender`] / [`Receiver`] 的便捷方式。

use crate::bus::BusConfig;
use crate::config::LinkConfig;
use crate::error::DriverError;
use crate::receiver::Receiver;
use crate::registry::{AttachRequest, ChannelRegistry, Membership, Role};
use crate::sender::Sender;
use hwlink_protocol::{Codec, MessageId};
use hwlink_transport::Transport;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::warn;

/// 两种角色共用的构造参数
struct InstanceOptions {
    msg_name: String,
    bus: BusConfig,
    msg_id: MessageId,
    link: LinkConfig,
    registry: Option<Arc<ChannelRegistry>>,
    transport: Option<Box<dyn Transport>>,
    require_connection: bool,
}

impl InstanceOptions {
    fn new(msg_name: String, bus: BusConfig) -> Self {
        Self {
            msg_name,
            bus,
            msg_id: 0,
            link: LinkConfig::default(),
            registry: None,
            transport: None,
            require_connection: false,
        }
    }

    /// 校验参数并挂载到注册表
    fn attach(self, role: Role) -> Result<(Membership, Codec, bool), DriverError> {
        if self.msg_name.is_empty() {
            return Err(hwlink_protocol::ConfigurationError::Invalid("message name is empty".into()).into());
        }
        self.bus.validate()?;
        let codec = self.bus.codec()?;
        codec.check_id(self.msg_id)?;

        let registry = self.registry.unwrap_or_else(ChannelRegistry::global);
        let membership = registry.attach(AttachRequest {
            name: self.msg_name,
            role,
            msg_id: self.msg_id,
            bus: &self.bus,
            codec,
            transport: self.transport,
            link: self.link,
        })?;
        Ok((membership, codec, self.require_connection))
    }
}

/// 立即建立连接（阻塞至超时时限）
fn connect_now(membership: &Membership) -> Result<(), DriverError> {
    let channel = membership.channel();
    let timeout = membership.link().connect_timeout();
    let mut conn = channel
        .connection()
        .try_lock_for(timeout)
        .ok_or_else(|| DriverError::ChannelBusy(channel.key().to_string()))?;
    conn.open(timeout, &AtomicBool::new(false))
}

macro_rules! common_setters {
    () => {
        /// 消息 ID（带 ID 的分帧中写入帧头；CAN 上即帧 ID）
        pub fn msg_id(mut self, msg_id: MessageId) -> Self {
            self.options.msg_id = msg_id;
            self
        }

        /// 完整的时序配置
        pub fn link_config(mut self, link: LinkConfig) -> Self {
            self.options.link = link;
            self
        }

        /// 连接重试 / 发送阻塞时限
        pub fn timeout(mut self, timeout: Duration) -> Self {
            self.options.link = self.options.link.with_timeout(timeout);
            self
        }

        /// 两次连接尝试之间的间隔
        pub fn retry_interval(mut self, interval: Duration) -> Self {
            self.options.link = self.options.link.with_retry_interval(interval);
            self
        }

        /// 使用独立的注册表（默认为进程级全局注册表）
        pub fn registry(mut self, registry: Arc<ChannelRegistry>) -> Self {
            self.options.registry = Some(registry);
            self
        }

        /// 使用自定义传输代替平台默认实现
        ///
        /// 通道已被其它实例打开时，此传输被忽略。
        pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
            self.options.transport = Some(Box::new(transport));
            self
        }

        /// 构造时是否必须连接成功
        ///
        /// 为 `true` 时 `build()` 在超时时限内阻塞重试，失败返回
        /// [`DriverError::Connection`]；为 `false`（默认）时连接在后台或首次发送时建立。
        pub fn require_connection(mut self, require: bool) -> Self {
            self.options.require_connection = require;
            self
        }
    };
}

/// Sender Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use hwlink_driver::{SenderBuilder, SpiBus};
/// use std::time::Duration;
///
/// let sender = SenderBuilder::new("setpoint", SpiBus::new(0, 0).msg_id_length(1).msg_len_length(1))
///     .msg_id(0x20)
///     .timeout(Duration::from_secs(1))
///     .build()?;
/// sender.send(b"AB");
/// # Ok::<(), hwlink_driver::DriverError>(())
/// ```
pub struct SenderBuilder {
    options: InstanceOptions,
}

impl SenderBuilder {
    pub fn new(msg_name: impl Into<String>, bus: impl Into<BusConfig>) -> Self {
        Self {
            options: InstanceOptions::new(msg_name.into(), bus.into()),
        }
    }

    common_setters!();

    /// 构建发送方
    ///
    /// # 错误
    ///
    /// - [`DriverError::Configuration`]: 参数非法、名称或消息 ID 冲突
    /// - [`DriverError::Connection`]: `require_connection(true)` 且时限内未能连接
    pub fn build(self) -> Result<Sender, DriverError> {
        let (membership, codec, require) = self.options.attach(Role::Sender)?;
        if require && let Err(e) = connect_now(&membership) {
            membership.detach();
            return Err(e);
        }
        Ok(Sender::new(membership, codec))
    }
}

/// Receiver Builder（链式构造）
pub struct ReceiverBuilder {
    options: InstanceOptions,
}

impl ReceiverBuilder {
    pub fn new(msg_name: impl Into<String>, bus: impl Into<BusConfig>) -> Self {
        Self {
            options: InstanceOptions::new(msg_name.into(), bus.into()),
        }
    }

    common_setters!();

    /// 单次 `raw_read` 的阻塞上限，也是停止信号的响应粒度
    pub fn recv_timeout(mut self, timeout: Duration) -> Self {
        self.options.link = self.options.link.with_recv_timeout(timeout);
        self
    }

    /// 构建接收方并确保通道的接收线程在运行
    ///
    /// # 错误
    ///
    /// - [`DriverError::Configuration`]: 参数非法、名称或消息 ID 冲突，
    ///   或与通道上已有接收方的分帧规则不一致
    /// - [`DriverError::Connection`]: `require_connection(true)` 且时限内未能连接
    pub fn build(self) -> Result<Receiver, DriverError> {
        let (membership, _codec, require) = self.options.attach(Role::Receiver)?;
        let Some(slot) = membership.slot().cloned() else {
            membership.detach();
            return Err(DriverError::Stopped);
        };
        if require && let Err(e) = connect_now(&membership) {
            membership.detach();
            return Err(e);
        }
        if !require && !membership.channel().state().is_connected() {
            warn!(
                "Receiver '{}': '{}' not connected yet, connecting in background",
                membership.name(),
                membership.channel().key()
            );
        }
        Ok(Receiver::new(membership, slot))
    }
}
