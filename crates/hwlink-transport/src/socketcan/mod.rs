//! SocketCAN 传输
//!
//! ## 限制
//!
//! - **仅限 Linux 平台**
//! - **仅经典帧**：数据域最多 8 字节，FD 帧在写入时被拒绝
//! - **波特率**：由系统工具（`ip link set can0 type can bitrate 250000`）配置，
//!   这里只记录期望值
//! - 错误帧被过滤；Bus-Off 映射为 [`TransportError::BusOff`]

use crate::{DeviceError, DeviceErrorKind, Transport, TransportError, now_micros};
use hwlink_protocol::{MessageId, Packet};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use socketcan::{
    CanError as SocketCanError, CanErrorFrame, CanFilter, CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame,
    Socket, SocketOptions, StandardId,
};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::{Duration, Instant};
use tracing::{error, trace, warn};

mod interface_check;

pub use interface_check::check_interface_status;

/// SocketCAN 传输
#[derive(Debug)]
pub struct SocketCanTransport {
    /// 接口名称（如 "can0"）
    interface: String,
    /// 期望波特率（仅记录）
    bitrate: u32,
    /// 打开后的 socket
    socket: Option<CanSocket>,
    /// 读超时
    read_timeout: Duration,
    /// 接收过滤 ID
    filters: Vec<MessageId>,
    /// 过滤器按扩展帧匹配
    extended: bool,
}

impl SocketCanTransport {
    /// 创建传输（不打开接口）
    ///
    /// # 参数
    /// - `interface`: 接口名（如 "can0"、"vcan0"）
    /// - `bitrate`: 期望波特率，仅用于日志
    /// - `extended`: 过滤器是否按 29-bit ID 匹配
    pub fn new(interface: impl Into<String>, bitrate: u32, extended: bool) -> Self {
        Self {
            interface: interface.into(),
            bitrate,
            socket: None,
            read_timeout: Duration::from_millis(50),
            filters: Vec::new(),
            extended,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    fn apply_filters(&self, socket: &CanSocket) -> Result<(), TransportError> {
        if self.filters.is_empty() {
            return Ok(());
        }

        let (flag, mask) = if self.extended {
            (libc::CAN_EFF_FLAG, libc::CAN_EFF_MASK)
        } else {
            (0, libc::CAN_SFF_MASK)
        };
        // 掩码带上 EFF 位，标准帧过滤器不会匹配到同低位的扩展帧
        let filters: Vec<CanFilter> = self
            .filters
            .iter()
            .map(|&id| CanFilter::new(id | flag, mask | libc::CAN_EFF_FLAG))
            .collect();

        socket.set_filters(&filters).map_err(|e| {
            TransportError::Io(std::io::Error::other(format!("Failed to set CAN filters: {}", e)))
        })?;

        trace!(
            "SocketCAN '{}' filters applied: {:X?}",
            self.interface, self.filters
        );
        Ok(())
    }

    fn to_can_frame(packet: &Packet) -> Result<CanFrame, TransportError> {
        let id = packet.id.ok_or_else(|| {
            DeviceError::new(DeviceErrorKind::InvalidFrame, "CAN packet without arbitration ID")
        })?;
        let data = &packet.data[..];
        if data.len() > 8 {
            return Err(DeviceError::new(
                DeviceErrorKind::UnsupportedConfig,
                format!("CAN FD payload of {} bytes is not supported by SocketCAN backend", data.len()),
            )
            .into());
        }

        let frame = if packet.is_extended {
            ExtendedId::new(id).and_then(|id| CanFrame::new(id, data))
        } else {
            u16::try_from(id)
                .ok()
                .and_then(StandardId::new)
                .and_then(|id| CanFrame::new(id, data))
        };
        frame.ok_or_else(|| {
            DeviceError::new(
                DeviceErrorKind::InvalidFrame,
                format!("Failed to build CAN frame with ID 0x{:X}", id),
            )
            .into()
        })
    }

    /// 等待可读，返回是否有数据
    fn wait_readable(socket: &CanSocket, timeout: Duration) -> Result<bool, TransportError> {
        let fd = socket.as_raw_fd();
        let pollfd = PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, PollFlags::POLLIN);
        let timeout_ms = timeout.as_millis().min(65535) as u16;
        match poll(&mut [pollfd], PollTimeout::from(timeout_ms)) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(nix::errno::Errno::EINTR) => Ok(false),
            Err(e) => Err(TransportError::Io(std::io::Error::other(format!("poll failed: {}", e)))),
        }
    }
}

impl Transport for SocketCanTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.socket.is_some() {
            return Ok(());
        }

        match check_interface_status(&self.interface)? {
            true => trace!("CAN interface '{}' is UP", self.interface),
            false => {
                return Err(DeviceError::new(
                    DeviceErrorKind::NoDevice,
                    format!(
                        "CAN interface '{}' exists but is not UP. Start it first:\n  sudo ip link set up {}",
                        self.interface, self.interface
                    ),
                )
                .into());
            },
        }

        let socket = CanSocket::open(&self.interface).map_err(|e| {
            DeviceError::new(
                DeviceErrorKind::Backend,
                format!("Failed to open CAN interface '{}': {}", self.interface, e),
            )
        })?;
        self.apply_filters(&socket)?;

        trace!(
            "SocketCAN interface '{}' opened (bitrate {} set externally)",
            self.interface, self.bitrate
        );
        self.socket = Some(socket);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn raw_write(&mut self, packet: &Packet) -> Result<(), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotOpen)?;
        let frame = Self::to_can_frame(packet)?;
        socket.write_frame(&frame).map_err(TransportError::Io)?;
        trace!(
            "Sent CAN frame: ID=0x{:X}, len={}",
            frame.raw_id(),
            packet.len()
        );
        Ok(())
    }

    fn raw_read(&mut self) -> Result<Packet, TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotOpen)?;
        let deadline = Instant::now() + self.read_timeout;

        // 错误帧被跳过，直到读到数据帧或时限耗尽
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !Self::wait_readable(socket, remaining)? {
                return Err(TransportError::Timeout);
            }

            let frame = match socket.read_frame() {
                Ok(frame) => frame,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Err(TransportError::Timeout),
                Err(e) => return Err(TransportError::Io(e)),
            };

            if frame.is_error_frame() {
                match CanErrorFrame::try_from(frame).map(SocketCanError::from) {
                    Ok(SocketCanError::BusOff) => {
                        error!("CAN Bus Off error detected on '{}'", self.interface);
                        return Err(TransportError::BusOff);
                    },
                    Ok(other) => warn!("CAN Error Frame received: {}, ignoring", other),
                    Err(_) => warn!("Received CAN error frame but failed to parse, ignoring"),
                }
                continue;
            }

            let packet = Packet::can(frame.raw_id(), frame.is_extended(), frame.data().to_vec())
                .with_timestamp(now_micros());
            trace!(
                "Received CAN frame: ID=0x{:X}, len={}",
                frame.raw_id(),
                packet.len()
            );
            return Ok(packet);
        }
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            trace!("SocketCAN interface '{}' closed", self.interface);
        }
    }

    fn describe(&self) -> String {
        format!("socketcan:{}", self.interface)
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    fn set_filters(&mut self, ids: &[MessageId]) -> Result<(), TransportError> {
        self.filters = ids.to_vec();
        if let Some(socket) = self.socket.as_ref() {
            if ids.is_empty() {
                socket.set_filter_accept_all().map_err(TransportError::Io)?;
            } else {
                self.apply_filters(socket)?;
            }
        }
        Ok(())
    }
}

impl Drop for SocketCanTransport {
    fn drop(&mut self) {
        self.close();
    }
}
