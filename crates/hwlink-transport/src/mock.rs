//! Mock 传输（无硬件依赖）
//!
//! 克隆出的句柄共享同一份状态：测试保留一个句柄注入数据、检查写出，
//! 另一个句柄交给驱动层使用。

use crate::{DeviceError, DeviceErrorKind, Transport, TransportError};
use hwlink_protocol::{MessageId, Packet};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct MockState {
    incoming: VecDeque<Packet>,
    written: Vec<Packet>,
    is_open: bool,
    open_failures: u32,
    read_failures: u32,
    fail_writes: bool,
    read_timeout: Duration,
    open_calls: u32,
    close_calls: u32,
    clear_calls: u32,
    filters: Vec<MessageId>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            incoming: VecDeque::new(),
            written: Vec::new(),
            is_open: false,
            open_failures: 0,
            read_failures: 0,
            fail_writes: false,
            read_timeout: Duration::from_millis(2),
            open_calls: 0,
            close_calls: 0,
            clear_calls: 0,
            filters: Vec::new(),
        }
    }
}

/// 可编程的 Mock 传输
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 排队一个待读取的数据包
    pub fn push_incoming(&self, packet: Packet) {
        self.state.lock().incoming.push_back(packet);
    }

    /// 排队一段流式原始字节
    pub fn push_bytes(&self, data: &[u8]) {
        self.push_incoming(Packet::stream(data.to_vec()));
    }

    /// 尚未被读取的数据包数量
    pub fn pending_incoming(&self) -> usize {
        self.state.lock().incoming.len()
    }

    /// 已写出的全部数据包
    pub fn written(&self) -> Vec<Packet> {
        self.state.lock().written.clone()
    }

    /// 接下来 `n` 次 `open` 失败
    pub fn fail_next_opens(&self, n: u32) {
        self.state.lock().open_failures = n;
    }

    /// 接下来 `n` 次 `raw_read` 返回 IO 错误
    pub fn fail_next_reads(&self, n: u32) {
        self.state.lock().read_failures = n;
    }

    /// 所有写操作失败（直到关闭此开关）
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// 模拟设备被拔出：链路变为未打开
    pub fn unplug(&self) {
        self.state.lock().is_open = false;
    }

    pub fn open_calls(&self) -> u32 {
        self.state.lock().open_calls
    }

    pub fn close_calls(&self) -> u32 {
        self.state.lock().close_calls
    }

    pub fn clear_calls(&self) -> u32 {
        self.state.lock().clear_calls
    }

    /// 最近一次设置的接收过滤
    pub fn filters(&self) -> Vec<MessageId> {
        self.state.lock().filters.clone()
    }

    pub fn is_open_now(&self) -> bool {
        self.state.lock().is_open
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.open_calls += 1;
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(DeviceError::new(DeviceErrorKind::NotFound, "mock device unavailable").into());
        }
        state.is_open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().is_open
    }

    fn raw_write(&mut self, packet: &Packet) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.is_open {
            return Err(TransportError::NotOpen);
        }
        if state.fail_writes {
            return Err(TransportError::Io(std::io::Error::other("mock write failure")));
        }
        state.written.push(packet.clone());
        Ok(())
    }

    fn raw_read(&mut self) -> Result<Packet, TransportError> {
        let read_timeout = {
            let mut state = self.state.lock();
            if !state.is_open {
                return Err(TransportError::NotOpen);
            }
            if state.read_failures > 0 {
                state.read_failures -= 1;
                return Err(TransportError::Io(std::io::Error::other("mock read failure")));
            }
            if let Some(packet) = state.incoming.pop_front() {
                return Ok(packet);
            }
            state.read_timeout
        };

        // 不持锁等待，测试线程可以同时注入数据
        std::thread::sleep(read_timeout);
        Err(TransportError::Timeout)
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        if state.is_open {
            state.close_calls += 1;
        }
        state.is_open = false;
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.state.lock().read_timeout = timeout;
    }

    fn clear_buffers(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.clear_calls += 1;
        Ok(())
    }

    fn set_filters(&mut self, ids: &[MessageId]) -> Result<(), TransportError> {
        self.state.lock().filters = ids.to_vec();
        Ok(())
    }
}
