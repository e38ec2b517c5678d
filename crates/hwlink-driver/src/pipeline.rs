//! 接收线程
//!
//! 每个有接收方的通道一个后台线程，循环执行：
//!
//! 1. 检查运行标志
//! 2. 未连接时尝试打开（失败则作废槽位、等待重试间隔）
//! 3. 在读取时限内读取一个数据包
//! 4. 按通道的分帧规则解码，投递到对应消息 ID 的槽位
//!
//! 畸形帧只记录统计并丢弃，不会终止循环；读取时限保证停止信号在
//! `recv_timeout` 量级内得到响应。

use crate::channel::Channel;
use crate::config::LinkConfig;
use crate::connection::sleep_cancellable;
use crate::error::DriverError;
use hwlink_protocol::{Codec, MessageId, Packet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 带超时的 join
pub(crate) trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);

        // 看门狗线程负责真正的 join
        spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 正在运行的接收线程
#[derive(Debug)]
pub(crate) struct ReceiveLoop {
    thread: JoinHandle<()>,
    is_running: Arc<AtomicBool>,
}

impl ReceiveLoop {
    pub(crate) fn new(thread: JoinHandle<()>, is_running: Arc<AtomicBool>) -> Self {
        Self { thread, is_running }
    }

    pub(crate) fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }

    pub(crate) fn signal_stop(&self) {
        // Release: 保证之前的写入对接收线程可见
        self.is_running.store(false, Ordering::Release);
    }

    /// 发出停止信号并在宽限期内等待线程退出
    ///
    /// 返回线程是否在宽限期内退出。
    pub(crate) fn stop(self, grace: Duration) -> bool {
        self.signal_stop();
        let name = self.thread.thread().name().unwrap_or("hwlink-rx").to_string();
        match self.thread.join_timeout(grace) {
            Ok(()) => {
                trace!("Receive loop '{}' joined", name);
                true
            },
            Err(_) => {
                error!("Receive loop '{}' did not exit within {:?}", name, grace);
                false
            },
        }
    }
}

enum Step {
    Data(Packet),
    /// 读取超时，无数据
    Idle,
    /// 刚重新打开，尚未读取
    Reopened,
    OpenFailed(DriverError),
    ReadFailed(DriverError),
}

/// 接收循环主体
///
/// # 参数
///
/// - `channel`: 所属通道
/// - `codec`: 解码规则（通道上所有接收方一致）
/// - `sentinel`: 无 ID 帧使用的消息 ID
/// - `is_running`: 运行标志，置为 false 后循环在下一轮退出
/// - `link`: 时序参数
pub(crate) fn receive_loop(
    channel: Arc<Channel>,
    codec: Codec,
    sentinel: MessageId,
    is_running: Arc<AtomicBool>,
    link: LinkConfig,
) {
    let key = channel.key().clone();
    let lock_wait = link.recv_timeout().max(Duration::from_millis(1));
    let stopped = || !is_running.load(Ordering::Acquire);
    let mut outage_reported = false;
    let mut connected_once = false;

    debug!("Receive loop '{}' running ({:?})", key, codec);

    loop {
        // Acquire: If we see false, we must see all cleanup writes from other threads
        if !is_running.load(Ordering::Acquire) {
            trace!("Receive loop '{}': is_running flag is false, exiting", key);
            break;
        }

        // ============================================================
        // 1. 连接检查 + 读取（持有连接锁）
        // ============================================================
        let step = {
            // 发送方可能正持锁重连，拿不到锁就回到循环顶部检查停止标志
            let Some(mut conn) = channel.connection().try_lock_for(lock_wait) else {
                continue;
            };
            if conn.is_retired() {
                drop(conn);
                sleep_cancellable(lock_wait, stopped);
                continue;
            }
            if !conn.is_connected() {
                match conn.try_open() {
                    Ok(()) => {
                        if connected_once {
                            channel.stats().record_reconnect();
                            trace!("Receive loop '{}': reopened", key);
                        }
                        connected_once = true;
                        Step::Reopened
                    },
                    Err(e) => Step::OpenFailed(e),
                }
            } else {
                connected_once = true;
                match conn.read() {
                    Ok(Some(packet)) => Step::Data(packet),
                    Ok(None) => Step::Idle,
                    Err(e) => Step::ReadFailed(e),
                }
            }
        };

        // ============================================================
        // 2. 处理结果（已释放连接锁）
        // ============================================================
        // 重新打开不代表链路恢复，一次成功的读取才算
        if outage_reported && matches!(step, Step::Idle | Step::Data(_)) {
            info!("Receive loop '{}': connection restored", key);
            outage_reported = false;
        }

        match step {
            Step::Reopened | Step::Idle => {},
            Step::OpenFailed(e) => {
                channel.invalidate_slots();
                if !outage_reported {
                    warn!(
                        "Receive loop '{}': device unavailable ({}), retrying every {:?}",
                        key,
                        e,
                        link.retry_interval()
                    );
                    outage_reported = true;
                } else {
                    trace!("Receive loop '{}': reconnect attempt failed: {}", key, e);
                }
                sleep_cancellable(link.retry_interval(), stopped);
            },
            Step::ReadFailed(e) => {
                channel.invalidate_slots();
                channel.stats().record_receive_failure();
                if outage_reported {
                    trace!("Receive loop '{}': read failed again: {}", key, e);
                } else if matches!(&e, DriverError::Transport(te) if te.is_fatal()) {
                    error!("Receive loop '{}': fatal read error: {}, reconnecting", key, e);
                } else {
                    warn!("Receive loop '{}': read error: {}, reconnecting", key, e);
                }
                outage_reported = true;
                sleep_cancellable(link.retry_interval(), stopped);
            },
            Step::Data(packet) => {
                handle_packet(&channel, &codec, sentinel, packet, lock_wait);
            },
        }
    }

    debug!("Receive loop '{}' exited", key);
}

/// 解码并投递一个数据包
fn handle_packet(channel: &Channel, codec: &Codec, sentinel: MessageId, packet: Packet, lock_wait: Duration) {
    let bytes = packet.len();

    if channel.stats().track_rx_buffered(bytes, channel.buffer_threshold()) {
        if let Some(mut conn) = channel.connection().try_lock_for(lock_wait) {
            conn.clear_buffers();
        }
        debug!("Receive loop '{}': buffer threshold reached, output flushed", channel.key());
    }

    let (msg_id, payload) = match codec.decode(&packet, sentinel) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(
                "Receive loop '{}': dropping malformed frame ({} bytes): {}",
                channel.key(),
                bytes,
                e
            );
            channel.stats().record_framing_error(bytes);
            return;
        },
    };

    let Some(slot) = channel.slot(msg_id) else {
        trace!("Receive loop '{}': no receiver for ID 0x{:X}", channel.key(), msg_id);
        channel.stats().record_unrouted(bytes);
        return;
    };

    let overwrote = slot.store(payload);
    if overwrote {
        debug!(
            "Receive loop '{}': unread value for ID 0x{:X} overwritten",
            channel.key(),
            msg_id
        );
    }
    channel.stats().record_receive(msg_id, bytes, overwrote);
    channel.monitor().register_rx();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_join_timeout_finished_thread() {
        let handle = thread::spawn(|| {});
        assert!(handle.join_timeout(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_join_timeout_expires() {
        let handle = thread::spawn(|| thread::sleep(Duration::from_millis(300)));
        assert!(handle.join_timeout(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_receive_loop_stop() {
        let is_running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&is_running);
        let thread = thread::spawn(move || {
            while flag.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
        });
        let rx = ReceiveLoop::new(thread, is_running);
        assert!(rx.is_alive());
        assert!(rx.stop(Duration::from_secs(1)));
    }
}
