//! 连接管理
//!
//! [`ConnectionManager`] 独占一个 [`Transport`]，负责：
//!
//! - 打开（带重试，时限内按固定间隔重试）
//! - 写入失败后的重连与重发
//! - 读取失败后降级为 `Connecting`，由调用方决定何时重连
//! - 幂等关闭
//!
//! 管理器本身不加锁，由所在通道用一把 `Mutex` 串行化所有访问。

use crate::config::LinkConfig;
use crate::error::DriverError;
use crate::heartbeat::LinkMonitor;
use crate::state::{AtomicConnectionState, ConnectionState};
use hwlink_protocol::{MessageId, Packet};
use hwlink_transport::{Transport, TransportError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 可取消睡眠的检查粒度
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// 睡眠 `duration`，每个小片检查一次取消标志
///
/// 返回 `false` 表示睡眠被取消。
pub(crate) fn sleep_cancellable(duration: Duration, cancelled: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        spin_sleep::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

/// 单个物理通道的连接管理器
pub struct ConnectionManager {
    transport: Box<dyn Transport>,
    state: Arc<AtomicConnectionState>,
    monitor: Arc<LinkMonitor>,
    config: LinkConfig,
    label: String,
    /// `close()` 之后为 true，此后不再自动重连
    retired: bool,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("label", &self.label)
            .field("state", &self.state())
            .field("retired", &self.retired)
            .finish()
    }
}

impl ConnectionManager {
    /// 创建管理器（不打开设备）
    pub fn new(mut transport: Box<dyn Transport>, config: LinkConfig, label: impl Into<String>) -> Self {
        transport.set_read_timeout(config.recv_timeout());
        Self {
            transport,
            state: Arc::new(AtomicConnectionState::new(ConnectionState::Disconnected)),
            monitor: Arc::new(LinkMonitor::new()),
            config,
            label: label.into(),
            retired: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get(Ordering::Acquire)
    }

    /// 共享的状态句柄（无锁读取）
    pub fn state_handle(&self) -> Arc<AtomicConnectionState> {
        Arc::clone(&self.state)
    }

    pub fn monitor(&self) -> Arc<LinkMonitor> {
        Arc::clone(&self.monitor)
    }

    /// 状态为 `Connected` 且底层设备确实打开
    pub fn is_connected(&self) -> bool {
        self.state().is_connected() && self.transport.is_open()
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// 健康检查：状态与底层设备不一致时降级为 `Connecting`
    pub fn health_check(&mut self) -> bool {
        if self.state().is_connected() && !self.transport.is_open() {
            warn!("Connection '{}': device closed underneath, marking as reconnecting", self.label);
            self.state.set(ConnectionState::Connecting, Ordering::Release);
            return false;
        }
        self.is_connected()
    }

    /// 单次打开尝试
    ///
    /// 失败时状态停留在 `Connecting`。
    pub fn try_open(&mut self) -> Result<(), DriverError> {
        if self.retired {
            return Err(DriverError::Stopped);
        }
        if self.is_connected() {
            return Ok(());
        }
        self.state.set(ConnectionState::Connecting, Ordering::Release);
        // 半开状态的句柄先关掉
        self.transport.close();
        match self.transport.open() {
            Ok(()) => {
                self.state.set(ConnectionState::Connected, Ordering::Release);
                debug!("Connection '{}' established", self.label);
                Ok(())
            },
            Err(e) => Err(e.into()),
        }
    }

    /// 在 `timeout` 时限内重试打开
    ///
    /// 每两次尝试之间等待 `retry_interval`（不超过剩余时限）。
    /// `cancel` 置位后立即放弃。
    ///
    /// # 错误
    ///
    /// 时限耗尽时状态置为 `Closed` 并返回 [`DriverError::Connection`]。
    pub fn open(&mut self, timeout: Duration, cancel: &AtomicBool) -> Result<(), DriverError> {
        if self.retired {
            return Err(DriverError::Stopped);
        }
        if self.is_connected() {
            return Ok(());
        }

        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;
        let last_error = loop {
            attempts += 1;
            let err = match self.try_open() {
                Ok(()) => {
                    if attempts > 1 {
                        info!("Connection '{}' established after {} attempts", self.label, attempts);
                    }
                    return Ok(());
                },
                Err(e) => e,
            };

            let now = Instant::now();
            if now >= deadline || cancel.load(Ordering::Acquire) {
                break err;
            }
            let wait = self.config.retry_interval().min(deadline - now);
            warn!(
                "Connection '{}' attempt {} failed: {}. Retrying in {:?}",
                self.label, attempts, err, wait
            );
            if !sleep_cancellable(wait, || cancel.load(Ordering::Acquire)) {
                break err;
            }
        };

        self.state.set(ConnectionState::Closed, Ordering::Release);
        error!(
            "Connection '{}' failed after {} attempt(s): {}",
            self.label, attempts, last_error
        );
        Err(DriverError::Connection {
            channel: self.label.clone(),
            attempts,
            reason: last_error.to_string(),
        })
    }

    /// 写出一个数据包
    ///
    /// 未连接时先打开；写入失败时关闭设备、降级为 `Connecting`，
    /// 重连后重发，直到成功或 `timeout` 耗尽。
    pub fn write(&mut self, packet: &Packet, timeout: Duration, cancel: &AtomicBool) -> Result<(), DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.open(remaining, cancel)?;

            match self.transport.raw_write(packet) {
                Ok(()) => {
                    self.monitor.register_tx();
                    return Ok(());
                },
                Err(e) => {
                    warn!("Connection '{}': write failed: {}", self.label, e);
                    self.demote();
                    let now = Instant::now();
                    if now >= deadline || cancel.load(Ordering::Acquire) {
                        return Err(e.into());
                    }
                    let wait = self.config.retry_interval().min(deadline - now);
                    if !sleep_cancellable(wait, || cancel.load(Ordering::Acquire)) {
                        return Err(e.into());
                    }
                },
            }
        }
    }

    /// 读取一个数据包
    ///
    /// # 返回值
    ///
    /// - `Ok(Some(packet))`：读到数据
    /// - `Ok(None)`：读取时限内无数据
    /// - `Err(_)`：传输层错误，连接已降级为 `Connecting`
    pub fn read(&mut self) -> Result<Option<Packet>, DriverError> {
        if !self.is_connected() {
            return Err(TransportError::NotOpen.into());
        }
        match self.transport.try_read() {
            Ok(packet) => Ok(packet),
            Err(e) => {
                self.demote();
                Err(e.into())
            },
        }
    }

    pub fn clear_buffers(&mut self) {
        if !self.is_connected() {
            return;
        }
        if let Err(e) = self.transport.clear_buffers() {
            warn!("Connection '{}': failed to flush output buffer: {}", self.label, e);
        }
    }

    pub fn set_filters(&mut self, ids: &[MessageId]) {
        if let Err(e) = self.transport.set_filters(ids) {
            warn!("Connection '{}': failed to apply receive filters: {}", self.label, e);
        }
    }

    /// 关闭连接（幂等）
    pub fn close(&mut self) {
        if self.retired {
            return;
        }
        self.state.set(ConnectionState::Closing, Ordering::Release);
        self.transport.close();
        self.state.set(ConnectionState::Closed, Ordering::Release);
        self.retired = true;
        debug!("Connection '{}' closed", self.label);
    }

    /// 让已关闭的管理器重新可用，可选替换底层传输
    pub fn revive(&mut self, transport: Option<Box<dyn Transport>>, config: LinkConfig) {
        if let Some(mut transport) = transport {
            self.transport.close();
            transport.set_read_timeout(config.recv_timeout());
            self.transport = transport;
        } else {
            self.transport.set_read_timeout(config.recv_timeout());
        }
        self.config = config;
        self.retired = false;
        self.state.set(ConnectionState::Disconnected, Ordering::Release);
    }

    fn demote(&mut self) {
        self.transport.close();
        self.state.set(ConnectionState::Connecting, Ordering::Release);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}
