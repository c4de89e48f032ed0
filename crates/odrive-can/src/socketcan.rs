//! SocketCAN CAN 适配器实现
//!
//! Linux 内核级 CAN 通讯接口。
//!
//! ## 限制
//!
//! - **仅限 Linux 平台**
//! - **接口配置**：波特率等配置由系统工具（`ip link`）完成，不在应用层设置
//! - 只收发标准帧；扩展帧和错误帧在接收时被丢弃

use crate::{CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError, OdriveFrame};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame, Socket, StandardId};
use std::os::fd::BorrowedFd;
use std::os::unix::io::AsRawFd;
use std::time::Duration;
use tracing::{trace, warn};

/// SocketCAN 适配器
///
/// ```no_run
/// use odrive_can::{CanAdapter, OdriveFrame, SocketCanAdapter};
///
/// let mut adapter = SocketCanAdapter::new("can0").unwrap();
/// adapter.send(OdriveFrame::new(0x02E, &[0xCD, 0xCC, 0xCC, 0x3D])).unwrap();
/// ```
#[derive(Debug)]
pub struct SocketCanAdapter {
    /// `None` 表示已关闭
    socket: Option<CanSocket>,
    interface: String,
    read_timeout: Duration,
}

impl SocketCanAdapter {
    /// 打开 SocketCAN 接口（接口必须已 UP）
    pub fn new(interface: impl Into<String>) -> Result<Self, CanError> {
        let interface = interface.into();

        let socket = CanSocket::open(&interface).map_err(|e| {
            CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::NotFound,
                format!("Failed to open CAN interface '{}': {}", interface, e),
            ))
        })?;

        // 禁用 Loopback：本机发出的命令帧不应再被自己的接收循环读到
        let loopback_enabled: libc::c_int = 0;
        let loopback_result = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_CAN_RAW,
                libc::CAN_RAW_LOOPBACK,
                &loopback_enabled as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if loopback_result < 0 {
            warn!(
                "Failed to disable CAN_RAW_LOOPBACK on '{}': {}",
                interface,
                std::io::Error::last_os_error()
            );
        }

        let read_timeout = Duration::from_millis(2);
        trace!("SocketCAN interface '{}' opened", interface);

        Ok(Self {
            socket: Some(socket),
            interface,
            read_timeout,
        })
    }

    /// 获取接口名称
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn is_started(&self) -> bool {
        self.socket.is_some()
    }

    fn socket(&self) -> Result<&CanSocket, CanError> {
        self.socket.as_ref().ok_or(CanError::NotStarted)
    }

    /// 等待 socket 可读（`poll(2)`），超时返回 `false`
    fn wait_readable(&self, timeout: Duration) -> Result<bool, CanError> {
        let socket = self.socket()?;
        // fd 由 self.socket 持有，在本函数返回前不会关闭
        let fd = unsafe { BorrowedFd::borrow_raw(socket.as_raw_fd()) };
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];

        // PollTimeout 以毫秒计，最大 65535ms
        let timeout_ms = timeout.as_millis().min(u16::MAX as u128) as u16;
        match poll(&mut fds, PollTimeout::from(timeout_ms)) {
            Ok(0) | Err(Errno::EINTR) => Ok(false),
            Ok(_) => Ok(fds[0]
                .revents()
                .is_some_and(|events| events.contains(PollFlags::POLLIN))),
            Err(e) => Err(CanError::Io(std::io::Error::from(e))),
        }
    }
}

/// CanFrame -> OdriveFrame；扩展帧和错误帧返回 `None`
fn to_odrive_frame(frame: &CanFrame) -> Option<OdriveFrame> {
    match frame {
        CanFrame::Error(err) => {
            trace!("Dropping CAN error frame: {:?}", err);
            None
        },
        _ if frame.is_extended() => None,
        CanFrame::Remote(_) => Some(OdriveFrame::new_remote(
            frame.raw_id() as u16,
            frame.dlc() as u8,
        )),
        CanFrame::Data(_) => Some(OdriveFrame::new(frame.raw_id() as u16, frame.data())),
    }
}

/// OdriveFrame -> CanFrame
fn to_can_frame(frame: &OdriveFrame) -> Result<CanFrame, CanError> {
    let id = StandardId::new(frame.id as u16).ok_or_else(|| {
        CanDeviceError::new(
            CanDeviceErrorKind::InvalidFrame,
            format!("Invalid standard ID 0x{:X}", frame.id),
        )
    })?;
    let can_frame = if frame.is_remote {
        CanFrame::new_remote(id, frame.len as usize)
    } else {
        CanFrame::new(id, frame.data_slice())
    };
    can_frame.ok_or_else(|| {
        CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::InvalidFrame,
            format!("Failed to create frame with ID 0x{:X}", frame.id),
        ))
    })
}

impl Drop for SocketCanAdapter {
    fn drop(&mut self) {
        if self.socket.is_some() {
            trace!("[Auto-Drop] SocketCAN interface '{}' closed", self.interface);
        }
    }
}

impl CanAdapter for SocketCanAdapter {
    fn send(&mut self, frame: OdriveFrame) -> Result<(), CanError> {
        let can_frame = to_can_frame(&frame)?;
        self.socket()?.write_frame(&can_frame).map_err(CanError::Io)?;
        trace!("Sent CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
        Ok(())
    }

    /// 接收帧（阻塞直到收到有效数据帧或超时）
    ///
    /// 自动过滤错误帧与扩展帧，只返回 CANSimple 关心的标准帧。
    fn receive(&mut self) -> Result<OdriveFrame, CanError> {
        loop {
            if !self.wait_readable(self.read_timeout)? {
                return Err(CanError::Timeout);
            }
            let can_frame = self.socket()?.read_frame().map_err(CanError::Io)?;
            if let Some(frame) = to_odrive_frame(&can_frame) {
                trace!("Received CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
                return Ok(frame);
            }
        }
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<OdriveFrame, CanError> {
        let old_timeout = self.read_timeout;
        self.read_timeout = timeout;
        let result = self.receive();
        self.read_timeout = old_timeout;
        result
    }

    fn shutdown(&mut self) -> Result<(), CanError> {
        if self.socket.take().is_some() {
            trace!("SocketCAN interface '{}' shut down", self.interface);
        }
        Ok(())
    }
}
