//! 链路时序配置

use std::time::Duration;

/// 连接、重试与接收循环的时序参数
///
/// # Example
///
/// ```
/// use hwlink_driver::LinkConfig;
/// use std::time::Duration;
///
/// let config = LinkConfig::default().with_timeout(Duration::from_secs(1));
/// assert_eq!(config.connect_timeout(), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkConfig {
    /// 连接重试与发送阻塞的总时限（毫秒）
    pub connect_timeout_ms: u64,
    /// 两次连接尝试之间的间隔（毫秒）
    pub retry_interval_ms: u64,
    /// 单次 `raw_read` 的阻塞上限（毫秒），也是停止信号的响应粒度
    pub recv_timeout_ms: u64,
    /// `stop()` 等待接收线程退出的宽限期（毫秒）
    pub stop_grace_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            retry_interval_ms: 2000,
            recv_timeout_ms: 50,
            stop_grace_ms: 2000,
        }
    }
}

impl LinkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace_ms = grace.as_millis() as u64;
        self
    }
}
