//! SPI 传输（Linux spidev）
//!
//! 主机侧全双工传输：写入时丢弃回读字节，读取时发送全零占位。
//!
//! ## 读取模式
//!
//! - [`SpiReadMode::Fixed`]: 每次传输固定 `packet_size` 字节
//! - [`SpiReadMode::LengthPrefixed`]: 先传输帧头（ID + 长度），再按声明长度传输负载
//!
//! 全 0x00 或全 0xFF 的回读视为总线空闲（从机没有数据）。

use crate::{DeviceError, DeviceErrorKind, Transport, TransportError, now_micros};
use hwlink_protocol::{Endianness, Packet};
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::time::Duration;
use tracing::trace;

mod ioctl {
    use nix::{ioctl_write_buf, ioctl_write_ptr};

    const SPI_IOC_MAGIC: u8 = b'k';

    /// `struct spi_ioc_transfer`（linux/spi/spidev.h）
    #[repr(C)]
    #[derive(Debug, Default)]
    pub struct SpiIocTransfer {
        pub tx_buf: u64,
        pub rx_buf: u64,
        pub len: u32,
        pub speed_hz: u32,
        pub delay_usecs: u16,
        pub bits_per_word: u8,
        pub cs_change: u8,
        pub tx_nbits: u8,
        pub rx_nbits: u8,
        pub word_delay_usecs: u8,
        pub pad: u8,
    }

    ioctl_write_ptr!(set_mode, SPI_IOC_MAGIC, 1, u8);
    ioctl_write_ptr!(set_bits_per_word, SPI_IOC_MAGIC, 3, u8);
    ioctl_write_ptr!(set_max_speed_hz, SPI_IOC_MAGIC, 4, u32);
    ioctl_write_buf!(message, SPI_IOC_MAGIC, 0, SpiIocTransfer);
}

/// SPI 读取模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiReadMode {
    /// 固定长度传输
    Fixed { packet_size: usize },
    /// 先读帧头，再按长度头读负载
    LengthPrefixed {
        id_width: u8,
        len_width: u8,
        endianness: Endianness,
        /// 单帧负载上限，超出视为无效帧
        max_payload: usize,
    },
}

/// SPI 传输配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiTransportConfig {
    pub bus: u16,
    pub device: u16,
    /// SPI 模式（CPOL/CPHA，0..=3）
    pub mode: u8,
    pub max_speed_hz: u32,
    pub read_mode: SpiReadMode,
    /// 总线空闲时的等待时长（相当于读取时限）
    pub read_timeout: Duration,
}

impl Default for SpiTransportConfig {
    fn default() -> Self {
        Self {
            bus: 0,
            device: 0,
            mode: 0,
            max_speed_hz: 500_000,
            read_mode: SpiReadMode::Fixed { packet_size: 256 },
            read_timeout: Duration::from_millis(50),
        }
    }
}

impl SpiTransportConfig {
    /// spidev 设备路径
    pub fn path(&self) -> String {
        format!("/dev/spidev{}.{}", self.bus, self.device)
    }
}

/// SPI 传输
#[derive(Debug)]
pub struct SpiTransport {
    config: SpiTransportConfig,
    file: Option<File>,
}

impl SpiTransport {
    pub fn new(config: SpiTransportConfig) -> Self {
        Self { config, file: None }
    }

    pub fn config(&self) -> &SpiTransportConfig {
        &self.config
    }

    /// 一次全双工传输，返回回读字节
    fn transfer(&self, tx: &[u8]) -> Result<Vec<u8>, TransportError> {
        let file = self.file.as_ref().ok_or(TransportError::NotOpen)?;
        let mut rx = vec![0u8; tx.len()];
        if tx.is_empty() {
            return Ok(rx);
        }

        let len = u32::try_from(tx.len()).map_err(|_| {
            DeviceError::new(DeviceErrorKind::UnsupportedConfig, "SPI transfer too large")
        })?;
        let transfer = ioctl::SpiIocTransfer {
            tx_buf: tx.as_ptr() as u64,
            rx_buf: rx.as_mut_ptr() as u64,
            len,
            speed_hz: self.config.max_speed_hz,
            bits_per_word: 8,
            ..Default::default()
        };

        unsafe { ioctl::message(file.as_raw_fd(), std::slice::from_ref(&transfer)) }
            .map_err(|e| TransportError::Io(e.into()))?;
        Ok(rx)
    }

    /// 读取 `len` 字节（发送全零）
    fn read_exact(&self, len: usize) -> Result<Vec<u8>, TransportError> {
        self.transfer(&vec![0u8; len])
    }

    fn is_idle(bytes: &[u8]) -> bool {
        bytes.iter().all(|&b| b == 0x00) || bytes.iter().all(|&b| b == 0xFF)
    }

    fn idle(&self) -> TransportError {
        std::thread::sleep(self.config.read_timeout);
        TransportError::Timeout
    }
}

impl Transport for SpiTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.file.is_some() {
            return Ok(());
        }
        if self.config.mode > 3 {
            return Err(DeviceError::new(
                DeviceErrorKind::UnsupportedConfig,
                format!("SPI mode must be 0..=3, got {}", self.config.mode),
            )
            .into());
        }

        let path = self.config.path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| DeviceError::from_open_error(&path, &e))?;

        let fd = file.as_raw_fd();
        let mode = self.config.mode;
        let bits: u8 = 8;
        let speed = self.config.max_speed_hz;
        unsafe {
            ioctl::set_mode(fd, &mode).map_err(|e| TransportError::Io(e.into()))?;
            ioctl::set_bits_per_word(fd, &bits).map_err(|e| TransportError::Io(e.into()))?;
            ioctl::set_max_speed_hz(fd, &speed).map_err(|e| TransportError::Io(e.into()))?;
        }

        trace!(
            "SPI device '{}' opened (mode {}, {} Hz)",
            path, self.config.mode, self.config.max_speed_hz
        );
        self.file = Some(file);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn raw_write(&mut self, packet: &Packet) -> Result<(), TransportError> {
        self.transfer(&packet.data)?;
        trace!("SPI '{}' wrote {} bytes", self.config.path(), packet.len());
        Ok(())
    }

    fn raw_read(&mut self) -> Result<Packet, TransportError> {
        if self.file.is_none() {
            return Err(TransportError::NotOpen);
        }

        match self.config.read_mode {
            SpiReadMode::Fixed { packet_size } => {
                let data = self.read_exact(packet_size)?;
                if Self::is_idle(&data) {
                    return Err(self.idle());
                }
                Ok(Packet::stream(data).with_timestamp(now_micros()))
            },
            SpiReadMode::LengthPrefixed {
                id_width,
                len_width,
                endianness,
                max_payload,
            } => {
                let header_len = usize::from(id_width) + usize::from(len_width);
                let mut frame = self.read_exact(header_len)?;
                if Self::is_idle(&frame) {
                    return Err(self.idle());
                }

                let declared = endianness.read_uint(&frame[usize::from(id_width)..]) as usize;
                if declared > max_payload {
                    return Err(DeviceError::new(
                        DeviceErrorKind::InvalidFrame,
                        format!("SPI frame declares {} bytes (max {})", declared, max_payload),
                    )
                    .into());
                }
                frame.extend(self.read_exact(declared)?);
                Ok(Packet::stream(frame).with_timestamp(now_micros()))
            },
        }
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            trace!("SPI device '{}' closed", self.config.path());
        }
    }

    fn describe(&self) -> String {
        format!("spi:{}.{}", self.config.bus, self.config.device)
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.config.read_timeout = timeout;
    }
}

impl Drop for SpiTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_struct_layout() {
        // 与内核 spi_ioc_transfer 一致（32 字节）
        assert_eq!(std::mem::size_of::<ioctl::SpiIocTransfer>(), 32);
    }

    #[test]
    fn test_path_and_describe() {
        let config = SpiTransportConfig {
            bus: 1,
            device: 2,
            ..Default::default()
        };
        assert_eq!(config.path(), "/dev/spidev1.2");
        assert_eq!(SpiTransport::new(config).describe(), "spi:1.2");
    }

    #[test]
    fn test_idle_detection() {
        assert!(SpiTransport::is_idle(&[0, 0, 0]));
        assert!(SpiTransport::is_idle(&[0xFF, 0xFF]));
        assert!(!SpiTransport::is_idle(&[0x01, 0x00, 0x02]));
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let mut transport = SpiTransport::new(SpiTransportConfig {
            mode: 4,
            ..Default::default()
        });
        assert!(matches!(
            transport.open(),
            Err(TransportError::Device(DeviceError {
                kind: DeviceErrorKind::UnsupportedConfig,
                ..
            }))
        ));
    }

    #[test]
    fn test_read_requires_open() {
        let mut transport = SpiTransport::new(SpiTransportConfig::default());
        assert!(matches!(transport.raw_read(), Err(TransportError::NotOpen)));
    }
}
