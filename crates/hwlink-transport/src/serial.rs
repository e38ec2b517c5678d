//! Serial/UART 传输（Linux termios）
//!
//! UART 是字节流，没有天然的帧边界。一次 `raw_read` 按以下规则切出一帧：
//!
//! 1. 配置了终止符：读到终止符为止（终止符本身被丢弃）
//! 2. 否则：读到线路空闲超过 `frame_gap` 为止
//! 3. 任一情况下单帧不超过 `packet_size` 字节
//!
//! 写入时若配置了终止符，会追加在帧尾。

use crate::{DeviceError, DeviceErrorKind, Transport, TransportError, now_micros};
use hwlink_protocol::Packet;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::termios::{self, BaudRate, ControlFlags, FlushArg, SetArg, SpecialCharacterIndices};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::time::Duration;
use tracing::{trace, warn};

/// 串口传输配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialTransportConfig {
    /// 设备路径（如 "/dev/ttyACM0"）
    pub port: String,
    /// 波特率
    pub baudrate: u32,
    /// 帧终止符
    pub terminator: Option<u8>,
    /// 单帧最大字节数
    pub packet_size: usize,
    /// 帧间空闲间隔
    pub frame_gap: Duration,
    /// 读取时限
    pub read_timeout: Duration,
}

impl Default for SerialTransportConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baudrate: 115_200,
            terminator: None,
            packet_size: 256,
            frame_gap: Duration::from_millis(2),
            read_timeout: Duration::from_millis(50),
        }
    }
}

/// 把整数波特率映射到 termios 常量
pub fn baud_rate(baudrate: u32) -> Option<BaudRate> {
    Some(match baudrate {
        1200 => BaudRate::B1200,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19_200 => BaudRate::B19200,
        38_400 => BaudRate::B38400,
        57_600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        230_400 => BaudRate::B230400,
        460_800 => BaudRate::B460800,
        500_000 => BaudRate::B500000,
        921_600 => BaudRate::B921600,
        1_000_000 => BaudRate::B1000000,
        2_000_000 => BaudRate::B2000000,
        _ => return None,
    })
}

/// 串口传输
#[derive(Debug)]
pub struct SerialTransport {
    config: SerialTransportConfig,
    file: Option<File>,
    /// 已读入但尚未切成帧的字节
    pending: Vec<u8>,
}

impl SerialTransport {
    pub fn new(config: SerialTransportConfig) -> Self {
        Self {
            config,
            file: None,
            pending: Vec::new(),
        }
    }

    pub fn config(&self) -> &SerialTransportConfig {
        &self.config
    }

    fn configure_port(file: &File, baud: BaudRate) -> Result<(), TransportError> {
        let mut tio = termios::tcgetattr(file).map_err(|e| TransportError::Io(e.into()))?;
        termios::cfmakeraw(&mut tio);
        termios::cfsetspeed(&mut tio, baud).map_err(|e| TransportError::Io(e.into()))?;
        tio.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
        // 非规范模式下立即返回，超时由 poll 控制
        tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
        tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(file, SetArg::TCSANOW, &tio).map_err(|e| TransportError::Io(e.into()))?;
        termios::tcflush(file, FlushArg::TCIOFLUSH).map_err(|e| TransportError::Io(e.into()))?;
        Ok(())
    }

    fn wait_readable(file: &File, timeout: Duration) -> Result<bool, TransportError> {
        let pollfd = PollFd::new(file.as_fd(), PollFlags::POLLIN);
        let timeout_ms = timeout.as_millis().min(65535) as u16;
        match poll(&mut [pollfd], PollTimeout::from(timeout_ms)) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(nix::errno::Errno::EINTR) => Ok(false),
            Err(e) => Err(TransportError::Io(std::io::Error::other(format!("poll failed: {}", e)))),
        }
    }

    /// 从缓冲中切出一帧（仅终止符模式）
    fn split_terminated(pending: &mut Vec<u8>, terminator: Option<u8>) -> Option<Vec<u8>> {
        let terminator = terminator?;
        let end = pending.iter().position(|&b| b == terminator)?;
        let mut frame: Vec<u8> = pending.drain(..=end).collect();
        frame.pop();
        Some(frame)
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.file.is_some() {
            return Ok(());
        }

        let baud = baud_rate(self.config.baudrate).ok_or_else(|| {
            DeviceError::new(
                DeviceErrorKind::UnsupportedConfig,
                format!("Unsupported baudrate {}", self.config.baudrate),
            )
        })?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&self.config.port)
            .map_err(|e| DeviceError::from_open_error(&self.config.port, &e))?;

        Self::configure_port(&file, baud)?;

        // 配置完成（CLOCAL 已置位）后恢复阻塞模式，读取由 poll 控制超时
        if unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETFL, 0) } < 0 {
            return Err(TransportError::Io(std::io::Error::last_os_error()));
        }

        trace!(
            "Serial port '{}' opened at {} baud",
            self.config.port, self.config.baudrate
        );
        self.pending.clear();
        self.file = Some(file);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn raw_write(&mut self, packet: &Packet) -> Result<(), TransportError> {
        let file = self.file.as_mut().ok_or(TransportError::NotOpen)?;
        file.write_all(&packet.data)?;
        if let Some(terminator) = self.config.terminator {
            file.write_all(&[terminator])?;
        }
        file.flush()?;
        trace!("Serial '{}' wrote {} bytes", self.config.port, packet.len());
        Ok(())
    }

    fn raw_read(&mut self) -> Result<Packet, TransportError> {
        let file = self.file.as_mut().ok_or(TransportError::NotOpen)?;

        if let Some(frame) = Self::split_terminated(&mut self.pending, self.config.terminator) {
            return Ok(Packet::stream(frame).with_timestamp(now_micros()));
        }
        if self.pending.is_empty() && !Self::wait_readable(file, self.config.read_timeout)? {
            return Err(TransportError::Timeout);
        }

        let mut chunk = [0u8; 256];
        loop {
            match file.read(&mut chunk) {
                Ok(0) => {
                    // poll 报告可读但读到 EOF：设备已断开
                    return Err(DeviceError::new(
                        DeviceErrorKind::NoDevice,
                        format!("Serial port '{}' disconnected", self.config.port),
                    )
                    .into());
                },
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(TransportError::Io(e)),
            }

            if let Some(frame) = Self::split_terminated(&mut self.pending, self.config.terminator) {
                return Ok(Packet::stream(frame).with_timestamp(now_micros()));
            }
            if self.pending.len() >= self.config.packet_size {
                break;
            }
            if !Self::wait_readable(file, self.config.frame_gap)? {
                break;
            }
        }

        let take = self.pending.len().min(self.config.packet_size);
        if self.config.terminator.is_some() {
            warn!(
                "Serial '{}': {} bytes without terminator, delivering as one frame",
                self.config.port, take
            );
        }
        let frame: Vec<u8> = self.pending.drain(..take).collect();
        Ok(Packet::stream(frame).with_timestamp(now_micros()))
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            self.pending.clear();
            trace!("Serial port '{}' closed", self.config.port);
        }
    }

    fn describe(&self) -> String {
        format!("serial:{}", self.config.port)
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.config.read_timeout = timeout;
    }

    fn clear_buffers(&mut self) -> Result<(), TransportError> {
        // 已到达的输入（内核缓冲与 pending）保持不动
        if let Some(file) = self.file.as_ref() {
            termios::tcflush(file, FlushArg::TCOFLUSH).map_err(|e| TransportError::Io(e.into()))?;
        }
        trace!("Serial '{}' output buffer flushed", self.config.port);
        Ok(())
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}
